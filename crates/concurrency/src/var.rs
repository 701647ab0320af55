//! Transactional variables
//!
//! A [`Var<T>`] holds its current [`Snapshot`] in an `ArcSwap` slot, so reads
//! are a single atomic load and never block. Writes install a successor
//! snapshot and, when the write is observable under the variable's equality
//! policy, hand the wake protocol to the [`Notifier`] pool.
//!
//! ## Write sequence
//!
//! ```text
//! 1. old = slot.load()
//! 2. new = old.successor(value)
//! 3. slot.store(new)                 last store wins
//! 4. if old.is_changed(new):
//!        submit wake_watchers(new)   caller does not wait
//! ```
//!
//! A fan-out the notifier rejects (queue full, or shut down) runs on a
//! detached overflow thread. It never runs on the writer's stack: the
//! writer may itself be a running watcher of the variable.
//!
//! ## Wake protocol
//!
//! For every registered transaction (walking a copy of the registry):
//!
//! ```text
//! lock tx
//! if tx read this variable and that read is_changed(new):
//!     broadcast, then wait until tx is Parked or Completed
//! unlock tx
//! stop if the slot has moved past `new`
//! ```
//!
//! The early stop hands responsibility to the fan-out of the newer write.
//! The slot is not mutually excluded against concurrent writers; callers that
//! need one writer at a time hold [`Var::lock_writes`].

use crate::notifier::Notifier;
use crate::registry::{Registry, WatchToken};
use crate::snapshot::Snapshot;
use crate::transaction::{ReadRecord, Transaction};
use arc_swap::ArcSwap;
use parking_lot::{Mutex, MutexGuard};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};
use tvar_core::VarId;

struct VarInner<T> {
    id: VarId,
    slot: ArcSwap<Snapshot<T>>,
    registry: Arc<Registry>,
    write_lock: Mutex<()>,
    notifier: Arc<Notifier>,
}

/// A transactional variable.
///
/// Cloning a `Var` yields another handle to the same variable.
pub struct Var<T> {
    inner: Arc<VarInner<T>>,
}

impl<T> Clone for Var<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Var<T>
where
    T: Send + Sync + 'static,
{
    /// Create a variable where every write is observable.
    pub fn new(value: T) -> Self {
        Self::from_snapshot(Snapshot::versioned(value), Notifier::global())
    }

    /// Create a variable whose observability is decided by `changed(old, new)`.
    pub fn new_custom<F>(value: T, changed: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Self::from_snapshot(Snapshot::custom(value, changed), Notifier::global())
    }

    /// Create a default-equality variable bound to a specific notifier.
    pub fn with_notifier(value: T, notifier: Arc<Notifier>) -> Self {
        Self::from_snapshot(Snapshot::versioned(value), notifier)
    }

    /// Create a variable from its initial snapshot.
    ///
    /// The snapshot's variant fixes the equality policy for the variable's
    /// whole lifetime.
    pub fn from_snapshot(initial: Snapshot<T>, notifier: Arc<Notifier>) -> Self {
        let id = VarId::next();
        Self {
            inner: Arc::new(VarInner {
                id,
                slot: ArcSwap::from_pointee(initial),
                registry: Arc::new(Registry::new(id)),
                write_lock: Mutex::new(()),
                notifier,
            }),
        }
    }

    /// Variable identifier
    pub fn id(&self) -> VarId {
        self.inner.id
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<Snapshot<T>> {
        self.inner.slot.load_full()
    }

    /// Current version; `None` for custom-equality variables
    pub fn version(&self) -> Option<u64> {
        self.inner.slot.load().version()
    }

    /// Replace the value and notify watchers if the write is observable.
    pub fn write(&self, value: T) {
        let old = self.inner.slot.load_full();
        let new = Arc::new(old.successor(value));
        self.inner.slot.store(Arc::clone(&new));

        if old.is_changed(&new) {
            trace!(var = %self.inner.id, version = ?new.version(), "observable write");
            self.schedule_wake(new);
        }
    }

    /// Apply `f` to the current value and write the result, holding the
    /// write-lock for the duration.
    pub fn modify<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let _guard = self.lock_writes();
        let next = f(self.inner.slot.load().value());
        self.write(next);
    }

    /// Acquire the variable's write-lock.
    ///
    /// `write` does not take it; the transaction engine holds it to serialize
    /// its own writers.
    pub fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.inner.write_lock.lock()
    }

    /// Register `tx` as a watcher of this variable.
    pub fn watch(&self, tx: &Arc<Transaction>) -> WatchToken {
        self.inner.registry.register(tx)
    }

    /// Remove a watcher by its token. Tokens of other variables are ignored.
    pub fn unwatch(&self, token: &WatchToken) -> bool {
        self.inner.registry.deregister(token)
    }

    /// Number of registry entries
    pub fn watcher_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Notifier this variable submits fan-outs to
    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.inner.notifier
    }

    pub(crate) fn read_record(&self, observed: Arc<Snapshot<T>>) -> Box<dyn ReadRecord> {
        Box::new(VarRead {
            var: self.clone(),
            observed,
        })
    }

    fn schedule_wake(&self, new: Arc<Snapshot<T>>) {
        if self.inner.registry.is_empty() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let snapshot = Arc::clone(&new);
        let Err(e) = self
            .inner
            .notifier
            .submit(move || inner.wake_watchers(&snapshot))
        else {
            return;
        };

        if e.is_transient() {
            warn!(var = %self.inner.id, error = %e, "notifier queue full, fan-out on overflow thread");
        } else {
            debug!(var = %self.inner.id, error = %e, "notifier unavailable, fan-out on overflow thread");
        }
        let inner = Arc::clone(&self.inner);
        if let Err(e) = self
            .inner
            .notifier
            .spawn_overflow(move || inner.wake_watchers(&new))
        {
            error!(var = %self.inner.id, error = %e, "fan-out dropped");
        }
    }
}

impl<T> Var<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Current value. Never blocks.
    pub fn read(&self) -> T {
        self.inner.slot.load().value().clone()
    }
}

impl<T> Var<T>
where
    T: PartialEq + Send + Sync + 'static,
{
    /// Create a variable where only writes of an unequal value are observable.
    pub fn new_eq(value: T) -> Self {
        Self::new_custom(value, |a: &T, b: &T| a != b)
    }
}

impl<T: Send + Sync + 'static> VarInner<T> {
    fn wake_watchers(&self, new: &Arc<Snapshot<T>>) {
        let mut signaled = 0usize;
        for (tx_id, weak) in self.registry.snapshot() {
            let Some(tx) = weak.upgrade() else {
                self.registry.prune_dead(tx_id);
                continue;
            };

            let woke = tx.signal_if_stale(self.id, |observed| {
                match observed.downcast_ref::<Snapshot<T>>() {
                    Some(read) => read.is_changed(new),
                    None => panic!(
                        "{} read record does not hold a Snapshot<{}>",
                        self.id,
                        std::any::type_name::<T>()
                    ),
                }
            });
            if woke {
                signaled += 1;
                trace!(var = %self.id, tx = %tx_id, "handshake complete");
            }

            let current = self.slot.load();
            if !Arc::ptr_eq(&*current, new) && current.is_changed(new) {
                debug!(var = %self.id, signaled, "slot moved on, newer fan-out takes over");
                return;
            }
        }
        trace!(var = %self.id, signaled, "fan-out finished");
    }
}

/// A transaction's record of reading one `Var<T>`
struct VarRead<T> {
    var: Var<T>,
    observed: Arc<Snapshot<T>>,
}

impl<T> ReadRecord for VarRead<T>
where
    T: Send + Sync + 'static,
{
    fn var_id(&self) -> VarId {
        self.var.id()
    }

    fn observed(&self) -> &(dyn Any + Send + Sync) {
        &*self.observed
    }

    fn is_stale(&self) -> bool {
        let current = self.var.inner.slot.load();
        !Arc::ptr_eq(&self.observed, &*current) && self.observed.is_changed(&current)
    }

    fn watch(&self, tx: &Arc<Transaction>) -> WatchToken {
        self.var.watch(tx)
    }
}

impl<T: fmt::Debug> fmt::Debug for Var<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Var")
            .field("id", &self.inner.id)
            .field("snapshot", &**self.inner.slot.load())
            .field("watchers", &self.inner.registry.len())
            .finish()
    }
}
