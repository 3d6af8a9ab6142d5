//! Host thread pool abstraction
//!
//! The scheduler only needs three things from its host: how many workers the
//! hardware offers, which worker the current thread is, and a way to run one
//! function on N workers at once. [`ScopedThreadPool`] provides them with
//! scoped std threads; the calling thread always acts as worker 0.

use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// Parallel-region provider consumed by the scheduler
pub trait ThreadPool: Send + Sync {
    /// Workers available on this host
    fn num_workers(&self) -> usize;

    /// Index of the current thread inside a parallel region of this pool
    fn worker_id(&self) -> Option<usize>;

    /// Run `body(id)` concurrently for every id in `0..num_threads` and
    /// return once all of them have returned
    fn parallel(&self, num_threads: usize, body: &(dyn Fn(usize) + Sync));
}

static NEXT_POOL_TOKEN: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    /// (pool token, worker id) of the region this thread is running in
    static CURRENT_WORKER: Cell<Option<(usize, usize)>> = const { Cell::new(None) };
}

/// Thread pool that spawns scoped std threads for each parallel region
#[derive(Debug)]
pub struct ScopedThreadPool {
    /// Distinguishes this pool's workers from other pools' in the TLS slot
    token: usize,

    /// Worker count reported to the scheduler
    num_workers: usize,
}

impl ScopedThreadPool {
    /// Create a pool reporting `num_workers` workers (0 = number of CPUs)
    pub fn new(num_workers: usize) -> Self {
        let num_workers = if num_workers == 0 {
            num_cpus::get()
        } else {
            num_workers
        };

        Self {
            token: NEXT_POOL_TOKEN.fetch_add(1, Ordering::Relaxed),
            num_workers,
        }
    }
}

impl Default for ScopedThreadPool {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ThreadPool for ScopedThreadPool {
    fn num_workers(&self) -> usize {
        self.num_workers
    }

    fn worker_id(&self) -> Option<usize> {
        CURRENT_WORKER.with(|current| match current.get() {
            Some((token, id)) if token == self.token => Some(id),
            _ => None,
        })
    }

    fn parallel(&self, num_threads: usize, body: &(dyn Fn(usize) + Sync)) {
        let token = self.token;

        thread::scope(|scope| {
            for id in 1..num_threads {
                let spawned = thread::Builder::new()
                    .name(format!("stealfork-worker-{}", id))
                    .spawn_scoped(scope, move || {
                        let _identity = WorkerIdentity::enter(token, id);
                        body(id);
                    });

                // Missing workers only cost parallelism: their deques stay
                // empty and the remaining workers steal everything
                if let Err(error) = spawned {
                    tracing::warn!(worker = id, %error, "failed to spawn worker thread");
                }
            }

            let _identity = WorkerIdentity::enter(token, 0);
            body(0);
        });
    }
}

/// Sets the thread's worker identity and restores the previous one on drop
struct WorkerIdentity {
    previous: Option<(usize, usize)>,
}

impl WorkerIdentity {
    fn enter(token: usize, id: usize) -> Self {
        let previous = CURRENT_WORKER.with(|current| current.replace(Some((token, id))));
        Self { previous }
    }
}

impl Drop for WorkerIdentity {
    fn drop(&mut self) {
        CURRENT_WORKER.with(|current| current.set(self.previous));
    }
}
