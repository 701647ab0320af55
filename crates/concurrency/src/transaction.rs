//! Transaction side of the wake handshake
//!
//! The full transaction engine (execution loop, validation, commit ordering)
//! lives above this crate. What the variables need from a transaction is
//! small, and this module provides exactly that:
//!
//! - a lock and a condition variable owned by the transaction;
//! - the snapshot observed for every variable the transaction read;
//! - an explicit [`TxState`] guarded by the lock.
//!
//! # Handshake
//!
//! A blocked transaction registers on the variables it read and calls
//! [`Transaction::park`]. Under its own lock it moves to `Parked`, wakes any
//! notifier already waiting for it, and sleeps until one of its reads is
//! stale. A notifier that finds the transaction's read stale broadcasts on
//! the condition variable and then waits, on the same condition variable,
//! until the transaction is `Parked` or `Completed`. Because both sides hold
//! the transaction lock while checking, a signal can never fall into the gap
//! between "decided to sleep" and "asleep".
//!
//! # State transitions
//!
//! - `Running` → `Parked` (park)
//! - `Parked` → `Running` (a read became stale)
//! - `Running` | `Parked` → `Completed` (complete)
//!
//! `Completed` is terminal. Completing also releases every watch token, so a
//! finished transaction does not linger in any registry.
//!
//! A notifier also stops waiting when the transaction drops the read it was
//! signaled about ([`Transaction::reset`]), or when every remaining handle to
//! the transaction belongs to a waiting notifier, meaning its owner dropped
//! it without completing.

use crate::registry::WatchToken;
use crate::snapshot::Snapshot;
use crate::var::Var;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};
use tvar_core::{TxId, VarId};

/// Lifecycle state of a transaction, guarded by its lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxState {
    /// Executing; a notifier must wait before it can rely on its signal
    Running,
    /// Asleep on the condition variable, ready to be signaled
    Parked,
    /// Finished; needs no further signals
    Completed,
}

/// Type-erased record of one variable read.
///
/// Implemented for each `Var<T>`; lets a transaction hold reads of variables
/// with different value types in one map.
pub trait ReadRecord: Send + Sync {
    /// Variable that was read
    fn var_id(&self) -> VarId;

    /// The observed `Snapshot<T>`, erased
    fn observed(&self) -> &(dyn Any + Send + Sync);

    /// Whether the variable's current snapshot is changed relative to the
    /// observed one
    fn is_stale(&self) -> bool;

    /// Register `tx` as a watcher of the variable
    fn watch(&self, tx: &Arc<Transaction>) -> WatchToken;
}

/// How often a waiting notifier checks whether the transaction was abandoned
const ABANDON_POLL: Duration = Duration::from_millis(50);

struct TxInner {
    state: TxState,
    /// Incremented every time the transaction enters `Parked`
    park_gen: u64,
    /// Notifiers currently inside the handshake wait
    waiting_notifiers: usize,
    reads: HashMap<VarId, Box<dyn ReadRecord>>,
    watches: Vec<WatchToken>,
}

/// A transaction as seen by the variables it reads.
pub struct Transaction {
    id: TxId,
    inner: Mutex<TxInner>,
    cond: Condvar,
}

impl Transaction {
    /// Start a new transaction in the `Running` state
    pub fn begin() -> Arc<Self> {
        Arc::new(Self {
            id: TxId::next(),
            inner: Mutex::new(TxInner {
                state: TxState::Running,
                park_gen: 0,
                waiting_notifiers: 0,
                reads: HashMap::new(),
                watches: Vec::new(),
            }),
            cond: Condvar::new(),
        })
    }

    /// Transaction identifier
    pub fn id(&self) -> TxId {
        self.id
    }

    /// Current state
    pub fn state(&self) -> TxState {
        self.inner.lock().state
    }

    /// Read `var`, recording the observed snapshot.
    ///
    /// The first read of a variable records its current snapshot; later reads
    /// within the same transaction return the recorded value.
    pub fn read<T>(&self, var: &Var<T>) -> T
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        if let Some(record) = inner.reads.get(&var.id()) {
            return downcast_snapshot::<T>(record.as_ref()).value().clone();
        }

        let snapshot = var.snapshot();
        let value = snapshot.value().clone();
        inner.reads.insert(var.id(), var.read_record(snapshot));
        value
    }

    /// Whether this transaction has read `var_id`
    pub fn has_read(&self, var_id: VarId) -> bool {
        self.inner.lock().reads.contains_key(&var_id)
    }

    /// Number of variables read
    pub fn read_count(&self) -> usize {
        self.inner.lock().reads.len()
    }

    /// Whether any recorded read is stale
    pub fn is_stale(&self) -> bool {
        any_stale(&self.inner.lock())
    }

    /// Register as a watcher of `var`. The token is kept by the transaction
    /// and released on [`complete`](Self::complete) or [`reset`](Self::reset).
    pub fn watch<T>(self: &Arc<Self>, var: &Var<T>)
    where
        T: Send + Sync + 'static,
    {
        let token = var.watch(self);
        self.inner.lock().watches.push(token);
    }

    /// Register as a watcher of every variable read so far
    pub fn watch_reads(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        let tokens: Vec<WatchToken> = inner.reads.values().map(|r| r.watch(self)).collect();
        inner.watches.extend(tokens);
    }

    /// Number of watch tokens currently held
    pub fn watch_count(&self) -> usize {
        self.inner.lock().watches.len()
    }

    /// Sleep until one of the recorded reads is stale.
    ///
    /// Returns immediately if the transaction has completed, or if it has no
    /// reads (nothing could ever wake it).
    pub fn park(&self) {
        let mut inner = self.inner.lock();
        if !self.enter_parked(&mut inner) {
            return;
        }
        while !any_stale(&inner) {
            self.cond.wait(&mut inner);
        }
        self.leave_parked(&mut inner);
    }

    /// Like [`park`](Self::park) but gives up after `timeout`.
    ///
    /// Returns `true` if a read became stale, `false` on timeout or when
    /// there was nothing to wait for.
    pub fn park_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        if !self.enter_parked(&mut inner) {
            return false;
        }
        let mut stale = any_stale(&inner);
        while !stale {
            if self.cond.wait_until(&mut inner, deadline).timed_out() {
                stale = any_stale(&inner);
                break;
            }
            stale = any_stale(&inner);
        }
        self.leave_parked(&mut inner);
        stale
    }

    /// Mark the transaction finished and drop all its watches.
    pub fn complete(&self) {
        let tokens = {
            let mut inner = self.inner.lock();
            inner.state = TxState::Completed;
            self.cond.notify_all();
            std::mem::take(&mut inner.watches)
        };
        trace!(tx = %self.id, "transaction completed");
        for token in tokens {
            token.release();
        }
    }

    /// Forget all reads and watches so the transaction can run again.
    ///
    /// A completed transaction stays completed. Notifiers waiting on one of
    /// the forgotten reads are released.
    pub fn reset(&self) {
        let tokens = {
            let mut inner = self.inner.lock();
            inner.reads.clear();
            self.cond.notify_all();
            std::mem::take(&mut inner.watches)
        };
        for token in tokens {
            token.release();
        }
    }

    /// Notifier half of the handshake.
    ///
    /// If this transaction's read of `var_id` is stale according to
    /// `is_stale`, broadcast and wait until the transaction is parked,
    /// completed, or has passed through `Parked` since we arrived. The wait
    /// also ends if the read is forgotten or the transaction is abandoned.
    /// Returns whether a signal was sent.
    pub(crate) fn signal_if_stale<F>(self: &Arc<Self>, var_id: VarId, is_stale: F) -> bool
    where
        F: FnOnce(&(dyn Any + Send + Sync)) -> bool,
    {
        let mut inner = self.inner.lock();
        let stale = match inner.reads.get(&var_id) {
            Some(record) => is_stale(record.observed()),
            None => false,
        };
        if !stale {
            return false;
        }

        self.cond.notify_all();
        let arrived_at = inner.park_gen;
        inner.waiting_notifiers += 1;
        while inner.state == TxState::Running
            && inner.park_gen == arrived_at
            && inner.reads.contains_key(&var_id)
        {
            if self.cond.wait_for(&mut inner, ABANDON_POLL).timed_out()
                && Arc::strong_count(self) <= inner.waiting_notifiers
            {
                debug!(tx = %self.id, var = %var_id, "transaction dropped while running, handshake abandoned");
                break;
            }
        }
        inner.waiting_notifiers -= 1;
        true
    }

    fn enter_parked(&self, inner: &mut MutexGuard<'_, TxInner>) -> bool {
        if inner.state == TxState::Completed {
            return false;
        }
        if inner.reads.is_empty() {
            warn!(tx = %self.id, "park called with an empty read set");
            return false;
        }
        inner.state = TxState::Parked;
        inner.park_gen += 1;
        // Release notifiers that arrived while we were still running.
        self.cond.notify_all();
        trace!(tx = %self.id, "parked");
        true
    }

    fn leave_parked(&self, inner: &mut MutexGuard<'_, TxInner>) {
        if inner.state == TxState::Parked {
            inner.state = TxState::Running;
        }
        trace!(tx = %self.id, "unparked");
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &inner.state)
            .field("reads", &inner.reads.len())
            .field("watches", &inner.watches.len())
            .finish()
    }
}

fn any_stale(inner: &TxInner) -> bool {
    inner.reads.values().any(|r| r.is_stale())
}

/// Recover the typed snapshot from an erased read record.
///
/// Records are keyed by `VarId` and every id belongs to exactly one `Var<T>`,
/// so a mismatch is a broken invariant, not a runtime condition.
pub(crate) fn downcast_snapshot<T: 'static>(record: &dyn ReadRecord) -> &Snapshot<T> {
    match record.observed().downcast_ref::<Snapshot<T>>() {
        Some(snapshot) => snapshot,
        None => panic!(
            "read record for {} does not hold a Snapshot<{}>",
            record.var_id(),
            std::any::type_name::<T>()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotifierConfig;
    use crate::notifier::Notifier;
    use std::thread;

    fn notifier() -> Arc<Notifier> {
        Arc::new(Notifier::new(NotifierConfig::default()).unwrap())
    }

    #[test]
    fn test_begin_is_running() {
        let tx = Transaction::begin();
        assert_eq!(tx.state(), TxState::Running);
        assert_eq!(tx.read_count(), 0);
        assert!(!tx.is_stale());
    }

    #[test]
    fn test_read_records_snapshot_once() {
        let n = notifier();
        let var = Var::with_notifier(1, Arc::clone(&n));
        let tx = Transaction::begin();

        assert_eq!(tx.read(&var), 1);
        var.write(2);
        // Repeatable read within the transaction
        assert_eq!(tx.read(&var), 1);
        assert!(tx.has_read(var.id()));
        assert!(tx.is_stale());
        n.shutdown();
    }

    #[test]
    fn test_reads_of_different_types() {
        let n = notifier();
        let a = Var::with_notifier(1u32, Arc::clone(&n));
        let b = Var::with_notifier(String::from("x"), Arc::clone(&n));
        let tx = Transaction::begin();

        assert_eq!(tx.read(&a), 1);
        assert_eq!(tx.read(&b), "x");
        assert_eq!(tx.read_count(), 2);
        n.shutdown();
    }

    #[test]
    fn test_park_without_reads_returns() {
        let tx = Transaction::begin();
        tx.park();
        assert_eq!(tx.state(), TxState::Running);
        assert!(!tx.park_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_park_returns_when_already_stale() {
        let n = notifier();
        let var = Var::with_notifier(0, Arc::clone(&n));
        let tx = Transaction::begin();
        tx.read(&var);
        var.write(1);

        tx.park();
        assert_eq!(tx.state(), TxState::Running);
        n.shutdown();
    }

    #[test]
    fn test_park_timeout_expires() {
        let n = notifier();
        let var = Var::with_notifier(0, Arc::clone(&n));
        let tx = Transaction::begin();
        tx.read(&var);

        assert!(!tx.park_timeout(Duration::from_millis(20)));
        assert_eq!(tx.state(), TxState::Running);
        n.shutdown();
    }

    #[test]
    fn test_parked_transaction_woken_by_write() {
        let n = notifier();
        let var = Var::with_notifier(0, Arc::clone(&n));
        let tx = Transaction::begin();
        tx.read(&var);
        tx.watch_reads();

        let parker = {
            let tx = Arc::clone(&tx);
            thread::spawn(move || tx.park_timeout(Duration::from_secs(10)))
        };

        // Wait for the parker to actually sleep
        while tx.state() != TxState::Parked {
            thread::yield_now();
        }
        var.write(1);

        assert!(parker.join().unwrap());
        n.shutdown();
    }

    #[test]
    fn test_complete_releases_watches() {
        let n = notifier();
        let var = Var::with_notifier(0, Arc::clone(&n));
        let tx = Transaction::begin();
        tx.read(&var);
        tx.watch_reads();
        assert_eq!(var.watcher_count(), 1);
        assert_eq!(tx.watch_count(), 1);

        tx.complete();
        assert_eq!(tx.state(), TxState::Completed);
        assert_eq!(var.watcher_count(), 0);
        assert_eq!(tx.watch_count(), 0);

        // Completed is terminal
        tx.park();
        assert_eq!(tx.state(), TxState::Completed);
        n.shutdown();
    }

    #[test]
    fn test_reset_clears_reads_and_watches() {
        let n = notifier();
        let var = Var::with_notifier(0, Arc::clone(&n));
        let tx = Transaction::begin();
        tx.read(&var);
        tx.watch(&var);

        tx.reset();
        assert_eq!(tx.read_count(), 0);
        assert_eq!(var.watcher_count(), 0);
        assert_eq!(tx.state(), TxState::Running);
        n.shutdown();
    }

    #[test]
    fn test_signal_skips_unread_variable() {
        let tx = Transaction::begin();
        let signaled = tx.signal_if_stale(VarId::next(), |_| true);
        assert!(!signaled);
    }

    #[test]
    fn test_signal_does_not_block_on_completed() {
        let n = notifier();
        let var = Var::with_notifier(0, Arc::clone(&n));
        let tx = Transaction::begin();
        tx.read(&var);
        tx.complete();

        // Would wait forever if Completed were not an exit condition
        assert!(tx.signal_if_stale(var.id(), |_| true));
        n.shutdown();
    }

    fn wait_for_notifier(tx: &Transaction) {
        while tx.inner.lock().waiting_notifiers == 0 {
            thread::yield_now();
        }
    }

    #[test]
    fn test_reset_releases_waiting_notifier() {
        let n = notifier();
        let var = Var::with_notifier(0, Arc::clone(&n));
        let tx = Transaction::begin();
        tx.read(&var);

        let signaler = {
            let tx = Arc::clone(&tx);
            let id = var.id();
            thread::spawn(move || tx.signal_if_stale(id, |_| true))
        };
        wait_for_notifier(&tx);

        tx.reset();
        assert!(signaler.join().unwrap());
        assert_eq!(tx.inner.lock().waiting_notifiers, 0);
        n.shutdown();
    }

    #[test]
    fn test_dropped_running_transaction_releases_notifier() {
        let n = notifier();
        let var = Var::with_notifier(0, Arc::clone(&n));
        let tx = Transaction::begin();
        tx.read(&var);
        assert!(!tx.park_timeout(Duration::from_millis(10)));

        let signaler = {
            let tx = Arc::clone(&tx);
            let id = var.id();
            thread::spawn(move || tx.signal_if_stale(id, |_| true))
        };
        wait_for_notifier(&tx);

        // Only the notifier's handle is left
        drop(tx);
        assert!(signaler.join().unwrap());
        n.shutdown();
    }

    #[test]
    fn test_live_running_transaction_keeps_notifier_waiting() {
        let n = notifier();
        let var = Var::with_notifier(0, Arc::clone(&n));
        let tx = Transaction::begin();
        tx.read(&var);

        let signaler = {
            let tx = Arc::clone(&tx);
            let id = var.id();
            thread::spawn(move || tx.signal_if_stale(id, |_| true))
        };
        wait_for_notifier(&tx);

        thread::sleep(ABANDON_POLL * 3);
        assert!(!signaler.is_finished());

        tx.complete();
        assert!(signaler.join().unwrap());
        n.shutdown();
    }

    #[test]
    #[should_panic(expected = "does not hold a Snapshot")]
    fn test_type_mismatch_is_fatal() {
        let n = notifier();
        let var = Var::with_notifier(0i32, Arc::clone(&n));
        let tx = Transaction::begin();
        tx.read(&var);

        let inner = tx.inner.lock();
        let record = inner.reads.get(&var.id()).unwrap();
        let _ = downcast_snapshot::<String>(record.as_ref());
    }
}
