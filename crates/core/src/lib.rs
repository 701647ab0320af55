//! Core types for tvar
//!
//! This crate defines the foundational types shared by the runtime crates:
//! - VarId / TxId: identifiers for variables and transactions
//! - StmError: error type for the ambient layers (notifier, config)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

pub use error::{StmError, StmResult};
pub use types::{TxId, VarId};
