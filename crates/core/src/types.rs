//! Core identifier types
//!
//! - VarId: identity of a transactional variable
//! - TxId: identity of a transaction
//!
//! Both are allocated from process-wide monotonic counters, so they are
//! unique for the lifetime of the process and cheap to hash.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_VAR_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_TX_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transactional variable
///
/// Transactions key their read records by `VarId`, and the wake protocol
/// looks up a transaction's record for "this variable" through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VarId(u64);

impl VarId {
    /// Allocate the next unused VarId
    pub fn next() -> Self {
        Self(NEXT_VAR_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a raw id (tests and diagnostics)
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw id
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "var#{}", self.0)
    }
}

/// Unique identifier for a transaction
///
/// Used as the key of a variable's watcher registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId(u64);

impl TxId {
    /// Allocate the next unused TxId
    pub fn next() -> Self {
        Self(NEXT_TX_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a raw id (tests and diagnostics)
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw id
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx#{}", self.0)
    }
}
