//! Worker pool that runs wake-protocol fan-outs off the writer's call stack.
//!
//! Every observable write submits one fan-out task. Tasks are executed by a
//! fixed pool of worker threads in FIFO order; the queue is bounded so a
//! write storm cannot grow memory without limit. A rejected submission is
//! reported to the caller, which hands the fan-out to a detached overflow
//! thread via [`Notifier::spawn_overflow`].

use crate::config::NotifierConfig;
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error};
use tvar_core::{StmError, StmResult};

static GLOBAL: Lazy<Arc<Notifier>> = Lazy::new(|| {
    // The default config always validates; only the OS can refuse the threads.
    match Notifier::new(NotifierConfig::default()) {
        Ok(notifier) => Arc::new(notifier),
        Err(e) => panic!("failed to start the default notifier: {}", e),
    }
});

/// Notifier metrics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifierStats {
    /// Number of fan-outs waiting in the queue.
    pub queue_depth: usize,
    /// Number of fan-outs currently running.
    pub active_tasks: usize,
    /// Total number of fan-outs completed (including panicked ones).
    pub tasks_completed: u64,
    /// Total number of submissions rejected by backpressure or shutdown.
    pub tasks_rejected: u64,
    /// Total number of fan-outs started on overflow threads.
    pub overflow_spawned: u64,
    /// Number of worker threads.
    pub worker_count: usize,
}

type Task = Box<dyn FnOnce() + Send>;

struct NotifierInner {
    queue: Mutex<VecDeque<Task>>,
    work_ready: Condvar,
    drain_cond: Condvar,
    shutdown: AtomicBool,
    queue_depth: AtomicUsize,
    active_tasks: AtomicUsize,
    max_queue_depth: usize,
    tasks_completed: AtomicU64,
    tasks_rejected: AtomicU64,
    overflow_spawned: AtomicU64,
}

/// A bounded worker pool for wake-protocol fan-outs.
pub struct Notifier {
    inner: Arc<NotifierInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    num_threads: usize,
    thread_name_prefix: String,
}

impl Notifier {
    /// Create a notifier from a validated config and start its workers.
    pub fn new(config: NotifierConfig) -> StmResult<Self> {
        config.validate()?;

        let inner = Arc::new(NotifierInner {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            drain_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            queue_depth: AtomicUsize::new(0),
            active_tasks: AtomicUsize::new(0),
            max_queue_depth: config.max_queue_depth,
            tasks_completed: AtomicU64::new(0),
            tasks_rejected: AtomicU64::new(0),
            overflow_spawned: AtomicU64::new(0),
        });

        let mut workers = Vec::with_capacity(config.worker_threads);
        for i in 0..config.worker_threads {
            let name = format!("{}-{}", config.thread_name_prefix, i);
            let inner_clone = Arc::clone(&inner);
            match std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(&inner_clone))
            {
                Ok(handle) => workers.push(handle),
                Err(source) => {
                    // Stop the workers that did start before reporting.
                    stop_workers(&inner, &mut workers);
                    return Err(StmError::WorkerSpawn {
                        thread: name,
                        source,
                    });
                }
            }
        }

        Ok(Self {
            inner,
            workers: Mutex::new(workers),
            num_threads: config.worker_threads,
            thread_name_prefix: config.thread_name_prefix,
        })
    }

    /// The process-wide notifier used by variables created without one.
    pub fn global() -> Arc<Notifier> {
        Arc::clone(&GLOBAL)
    }

    /// Queue a fan-out.
    ///
    /// Returns `Err(NotifierShutdown)` after shutdown and `Err(Backpressure)`
    /// when the queue is at capacity. The task is dropped in both cases.
    pub fn submit(&self, work: impl FnOnce() + Send + 'static) -> StmResult<()> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            self.inner.tasks_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(StmError::NotifierShutdown);
        }

        {
            let mut queue = self.inner.queue.lock();
            if queue.len() >= self.inner.max_queue_depth {
                drop(queue);
                self.inner.tasks_rejected.fetch_add(1, Ordering::Relaxed);
                return Err(StmError::Backpressure {
                    capacity: self.inner.max_queue_depth,
                });
            }
            queue.push_back(Box::new(work));
            self.inner.queue_depth.fetch_add(1, Ordering::Release);
        }

        self.inner.work_ready.notify_one();
        Ok(())
    }

    /// Run `work` on a new detached thread, outside the pool.
    ///
    /// Used for fan-outs the pool rejected. Works after shutdown too, since
    /// a rejected fan-out must still reach its watchers. The thread is not
    /// tracked by [`drain`](Self::drain).
    pub fn spawn_overflow(&self, work: impl FnOnce() + Send + 'static) -> StmResult<()> {
        let seq = self.inner.overflow_spawned.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-overflow-{}", self.thread_name_prefix, seq);
        debug!(thread = %name, "starting overflow fan-out");

        std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(work)) {
                    error!(
                        "overflow task panicked: {:?}",
                        e.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
                    );
                }
            })
            .map(|_| ())
            .map_err(|source| StmError::WorkerSpawn {
                thread: name,
                source,
            })
    }

    /// Block until all queued and in-flight fan-outs have completed.
    ///
    /// Workers keep running afterwards.
    pub fn drain(&self) {
        let mut queue = self.inner.queue.lock();
        while self.inner.queue_depth.load(Ordering::Acquire) > 0
            || self.inner.active_tasks.load(Ordering::Acquire) > 0
        {
            self.inner.drain_cond.wait(&mut queue);
        }
    }

    /// Stop accepting work, let workers finish the queue, and join them.
    pub fn shutdown(&self) {
        stop_workers(&self.inner, &mut self.workers.lock());
    }

    /// Whether `shutdown` has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Return a snapshot of notifier metrics.
    pub fn stats(&self) -> NotifierStats {
        NotifierStats {
            queue_depth: self.inner.queue_depth.load(Ordering::Relaxed),
            active_tasks: self.inner.active_tasks.load(Ordering::Relaxed),
            tasks_completed: self.inner.tasks_completed.load(Ordering::Relaxed),
            tasks_rejected: self.inner.tasks_rejected.load(Ordering::Relaxed),
            overflow_spawned: self.inner.overflow_spawned.load(Ordering::Relaxed),
            worker_count: self.num_threads,
        }
    }
}

fn signal_shutdown(inner: &NotifierInner) {
    inner.shutdown.store(true, Ordering::Release);

    // A worker between its shutdown check and wait() holds the queue lock,
    // so taking it here means the worker either sees the flag or is
    // already parked and gets this notify.
    let _queue = inner.queue.lock();
    inner.work_ready.notify_all();
}

fn stop_workers(inner: &NotifierInner, workers: &mut Vec<JoinHandle<()>>) {
    signal_shutdown(inner);
    for handle in workers.drain(..) {
        let _ = handle.join();
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        // No join: the last handle may be dropped from inside a worker.
        signal_shutdown(&self.inner);
    }
}

/// Decrements `active_tasks` and wakes drain waiters, even if the task panics.
struct ActiveTaskGuard<'a> {
    inner: &'a NotifierInner,
}

impl<'a> Drop for ActiveTaskGuard<'a> {
    fn drop(&mut self) {
        let prev_active = self.inner.active_tasks.fetch_sub(1, Ordering::Release);
        self.inner.tasks_completed.fetch_add(1, Ordering::Relaxed);

        // drain() checks its condition under the queue lock.
        if prev_active == 1 && self.inner.queue_depth.load(Ordering::Acquire) == 0 {
            let _queue = self.inner.queue.lock();
            self.inner.drain_cond.notify_all();
        }
    }
}

fn worker_loop(inner: &NotifierInner) {
    loop {
        let task = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(task) = queue.pop_front() {
                    inner.queue_depth.fetch_sub(1, Ordering::Release);
                    inner.active_tasks.fetch_add(1, Ordering::Release);
                    break task;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        let _guard = ActiveTaskGuard { inner };

        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)) {
            error!(
                "notifier task panicked: {:?}",
                e.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
            );
        }
    }
}
