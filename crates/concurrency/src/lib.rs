//! Transactional variables for an STM runtime
//!
//! This crate implements the shared-variable layer of a software
//! transactional memory:
//! - Snapshot: versioned or predicate-compared value wrapper
//! - Var: lock-free readable variable with an observable-write check
//! - Registry / WatchToken: weak watcher membership per variable
//! - Transaction: the lock, condition variable and read records a blocked
//!   transaction exposes to the wake handshake
//! - Notifier: bounded worker pool running wake fan-outs
//!
//! # Blocking on a change
//!
//! ```
//! use std::thread;
//! use tvar_concurrency::{Transaction, Var};
//!
//! let ready = Var::new(false);
//!
//! let waiter = {
//!     let ready = ready.clone();
//!     thread::spawn(move || loop {
//!         let tx = Transaction::begin();
//!         if tx.read(&ready) {
//!             tx.complete();
//!             return;
//!         }
//!         tx.watch_reads();
//!         tx.park();
//!         tx.complete();
//!     })
//! };
//!
//! ready.write(true);
//! waiter.join().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod notifier;
pub mod registry;
pub mod snapshot;
pub mod transaction;
pub mod var;

pub use config::NotifierConfig;
pub use notifier::{Notifier, NotifierStats};
pub use registry::{Registry, WatchToken};
pub use snapshot::{ChangedFn, Snapshot, INITIAL_VERSION};
pub use transaction::{ReadRecord, Transaction, TxState};
pub use var::Var;

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Var<u64>: Send, Sync, Clone);
    assert_impl_all!(Snapshot<String>: Send, Sync, Clone);
    assert_impl_all!(Transaction: Send, Sync);
    assert_impl_all!(Notifier: Send, Sync);
    assert_impl_all!(WatchToken: Send, Sync);
}
