use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A bounded pool of blocking workers with a synchronous handoff queue.
///
/// `core` workers are started up front and live for the pool's lifetime;
/// up to `max - core` extra workers are spawned on demand and exit after
/// `keep_alive` idle time. The submission channel has no capacity, so a
/// submission either hands the job to a waiting worker, spawns one, or —
/// when the pool is saturated — runs the job on the calling thread. That
/// last case is the admission control: a busy pool slows its callers down
/// instead of queueing unboundedly.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    tx: Sender<Job>,
    rx: Receiver<Job>,
    core: usize,
    max: usize,
    keep_alive: Duration,
    live: AtomicUsize,
    next_id: AtomicUsize,
}

impl WorkerPool {
    pub fn new(core: usize, max: usize, keep_alive: Duration) -> Self {
        let core = core.max(1);
        let max = max.max(core);
        let (tx, rx) = bounded::<Job>(0);
        let inner = Arc::new(PoolInner {
            tx,
            rx,
            core,
            max,
            keep_alive,
            live: AtomicUsize::new(0),
            next_id: AtomicUsize::new(0),
        });
        let pool = Self { inner };
        for _ in 0..core {
            pool.spawn_worker(true);
        }
        pool
    }

    /// Number of live workers.
    pub fn workers(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Submit a job. Never queues: hands off, grows the pool, or runs the
    /// job on the calling thread.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        let job: Job = Box::new(job);
        match self.inner.tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                if self.try_grow() {
                    // A fresh worker is starting; block until it (or any
                    // other worker) takes the handoff.
                    if let Err(e) = self.inner.tx.send(job) {
                        run_job(e.into_inner());
                    }
                } else {
                    run_job(job);
                }
            }
            Err(TrySendError::Disconnected(job)) => run_job(job),
        }
    }

    /// Reserve a slot for an extra worker and spawn it. `false` when the
    /// pool is already at `max`.
    fn try_grow(&self) -> bool {
        let grew = self
            .inner
            .live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                (live < self.inner.max).then_some(live + 1)
            })
            .is_ok();
        if grew {
            self.spawn_worker_reserved(false);
        }
        grew
    }

    fn spawn_worker(&self, permanent: bool) {
        self.inner.live.fetch_add(1, Ordering::SeqCst);
        self.spawn_worker_reserved(permanent);
    }

    /// Spawn a worker whose slot in `live` is already counted.
    fn spawn_worker_reserved(&self, permanent: bool) {
        let rx = self.inner.rx.clone();
        let keep_alive = self.inner.keep_alive;
        let live = Arc::downgrade(&self.inner);
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let result = std::thread::Builder::new()
            .name(format!("quiver-worker-{id}"))
            .spawn(move || {
                scopeguard::defer! {
                    if let Some(inner) = live.upgrade() {
                        inner.live.fetch_sub(1, Ordering::SeqCst);
                    }
                }
                worker_loop(rx, permanent, keep_alive);
            });
        if let Err(e) = result {
            self.inner.live.fetch_sub(1, Ordering::SeqCst);
            log::warn!("could not spawn worker thread: {e}");
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("core", &self.inner.core)
            .field("max", &self.inner.max)
            .field("keep_alive", &self.inner.keep_alive)
            .field("live", &self.workers())
            .finish()
    }
}

fn worker_loop(rx: Receiver<Job>, permanent: bool, keep_alive: Duration) {
    loop {
        let job = if permanent {
            match rx.recv() {
                Ok(job) => job,
                Err(_) => break,
            }
        } else {
            match rx.recv_timeout(keep_alive) {
                Ok(job) => job,
                // Idle past the keep-alive: shrink back toward `core`.
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        };
        run_job(job);
    }
}

/// Run a job, containing panics so a bad task cannot take a worker down.
/// The scheduler observes the failure through the task's result channel.
fn run_job(job: Job) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        log::warn!("job panicked on the worker pool");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn runs_submitted_jobs() {
        let pool = WorkerPool::new(2, 4, Duration::from_millis(100));
        let counter = Arc::new(AtomicU32::new(0));
        let (tx, rx) = crossbeam_channel::unbounded();
        for _ in 0..16 {
            let counter = counter.clone();
            let tx = tx.clone();
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                tx.send(()).unwrap();
            });
        }
        for _ in 0..16 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn saturated_pool_runs_on_caller() {
        let pool = WorkerPool::new(1, 1, Duration::from_millis(100));
        let (block_tx, block_rx) = crossbeam_channel::bounded::<()>(0);

        // Let the core worker park in the handoff queue, then occupy it.
        std::thread::sleep(Duration::from_millis(50));
        pool.submit(move || {
            let _ = block_rx.recv();
        });
        std::thread::sleep(Duration::from_millis(50));

        // The pool is saturated, so this job must run right here on the
        // calling thread.
        let caller = std::thread::current().id();
        let (tx, rx) = crossbeam_channel::bounded(1);
        pool.submit(move || {
            tx.send(std::thread::current().id()).unwrap();
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), caller);

        block_tx.send(()).unwrap();
    }

    #[test]
    fn panicking_job_does_not_kill_the_pool() {
        let pool = WorkerPool::new(1, 1, Duration::from_millis(100));
        pool.submit(|| panic!("boom"));

        let (tx, rx) = crossbeam_channel::bounded(1);
        pool.submit(move || tx.send(42).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }

    #[test]
    fn extra_workers_expire_after_keep_alive() {
        let pool = WorkerPool::new(1, 4, Duration::from_millis(50));
        let (tx, rx) = crossbeam_channel::unbounded();
        for _ in 0..4 {
            let tx = tx.clone();
            pool.submit(move || {
                std::thread::sleep(Duration::from_millis(20));
                tx.send(()).unwrap();
            });
        }
        for _ in 0..4 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        // Give the extras time to idle out.
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(pool.workers(), 1);
    }
}
