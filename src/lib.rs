//! tvar - transactional variables for software transactional memory
//!
//! A [`Var<T>`] can be read without blocking, and writes that are observable
//! under the variable's equality policy wake every transaction parked on a
//! stale read of it. The wake uses a handshake on the transaction's own lock
//! and condition variable, so a signal is never sent into the gap between a
//! transaction deciding to sleep and actually sleeping.
//!
//! # Quick Start
//!
//! ```
//! use tvar::{Transaction, Var};
//!
//! let counter = Var::new(0);
//! counter.write(5);
//! assert_eq!(counter.read(), 5);
//! assert_eq!(counter.version(), Some(2));
//!
//! let tx = Transaction::begin();
//! assert_eq!(tx.read(&counter), 5);
//! tx.complete();
//! ```
//!
//! # Architecture
//!
//! - `tvar-core`: identifiers and the error type
//! - `tvar-concurrency`: snapshots, variables, registries, the transaction
//!   handshake and the notifier pool

pub use tvar_concurrency::*;
pub use tvar_core::{StmError, StmResult, TxId, VarId};
