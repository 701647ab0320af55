//! Per-variable watcher registry
//!
//! A variable keeps the set of transactions that want to be woken when it
//! changes. Membership is weak and non-owning: the registry stores
//! `Weak<Transaction>`, and the transaction owns the [`WatchToken`] that
//! removes its entry again.
//!
//! # Iteration
//!
//! The wake protocol never iterates the map directly. It takes a
//! [`Registry::snapshot`] and walks the copy, so no shard lock is held while
//! the notifier blocks on a transaction's condition variable. Entries added
//! after the snapshot are missed and entries removed after it are still
//! visited; both are fine because every entry is re-checked under the
//! transaction's own lock.

use crate::transaction::Transaction;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tracing::debug;
use tvar_core::{TxId, VarId};

/// Watchers of one variable
#[derive(Debug)]
pub struct Registry {
    var_id: VarId,
    watchers: DashMap<TxId, Weak<Transaction>>,
}

impl Registry {
    /// Create an empty registry for `var_id`
    pub fn new(var_id: VarId) -> Self {
        Self {
            var_id,
            watchers: DashMap::new(),
        }
    }

    /// Variable this registry belongs to
    pub fn var_id(&self) -> VarId {
        self.var_id
    }

    /// Register `tx` as a watcher and return the token that removes it.
    ///
    /// Registering the same transaction twice keeps a single entry.
    pub fn register(self: &Arc<Self>, tx: &Arc<Transaction>) -> WatchToken {
        self.watchers.insert(tx.id(), Arc::downgrade(tx));
        WatchToken {
            var_id: self.var_id,
            tx_id: tx.id(),
            registry: Arc::downgrade(self),
        }
    }

    /// Remove the entry identified by `token`.
    ///
    /// Returns `false` if the token belongs to another variable or the entry
    /// is already gone.
    pub fn deregister(&self, token: &WatchToken) -> bool {
        if token.var_id != self.var_id {
            return false;
        }
        self.watchers.remove(&token.tx_id).is_some()
    }

    /// Whether `tx_id` is currently registered
    pub fn contains(&self, tx_id: TxId) -> bool {
        self.watchers.contains_key(&tx_id)
    }

    /// Number of entries, including ones whose transaction was dropped
    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    /// Whether the registry has no entries
    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    /// Copy the current entries out of the map.
    pub fn snapshot(&self) -> Vec<(TxId, Weak<Transaction>)> {
        self.watchers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Remove the entry for `tx_id` if its transaction has been dropped.
    pub fn prune_dead(&self, tx_id: TxId) -> bool {
        let pruned = self
            .watchers
            .remove_if(&tx_id, |_, weak| weak.strong_count() == 0)
            .is_some();
        if pruned {
            debug!(var = %self.var_id, tx = %tx_id, "pruned dropped transaction from registry");
        }
        pruned
    }
}

/// Proof of registration, held by the watching transaction.
///
/// The token only ever removes its own entry. Dropping it without calling
/// [`WatchToken::release`] leaves the entry in place.
#[derive(Debug)]
pub struct WatchToken {
    var_id: VarId,
    tx_id: TxId,
    registry: Weak<Registry>,
}

impl WatchToken {
    /// Variable being watched
    pub fn var_id(&self) -> VarId {
        self.var_id
    }

    /// Watching transaction
    pub fn tx_id(&self) -> TxId {
        self.tx_id
    }

    /// Remove the registry entry. Returns `false` if it was already gone or
    /// the variable no longer exists.
    pub fn release(self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.deregister(&self),
            None => false,
        }
    }
}
