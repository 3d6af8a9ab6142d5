//! Main scheduler coordinating worker deques

use super::deque::WorkStealingDeque;
use super::job::JobRef;
use super::pool::{ScopedThreadPool, ThreadPool};
use super::stats::{Counter, SchedulerStats, WorkerCounters};
use crate::config::{SchedulerConfig, WaitPolicy};
use crate::{fatal, SchedulerError, SchedulerResult};
use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Work-stealing scheduler
///
/// Owns one deque per potential worker (times `deques_per_worker`), the
/// per-deque steal attempt counters and the completion flag of the current
/// run. Jobs are borrowed, never owned: see [`JobRef`].
pub struct Scheduler {
    /// Host parallel-region provider
    pool: Box<dyn ThreadPool>,

    /// Worker deques; worker `i` owns `deques[i]`
    pub(super) deques: Box<[WorkStealingDeque]>,

    /// Steal attempt counters used to derandomize victim choice
    pub(super) attempts: Box<[CachePadded<AtomicUsize>]>,

    /// Per-worker statistics
    pub(super) counters: Box<[WorkerCounters]>,

    /// Set by `finish`, polled by every worker loop of the current run
    finished: CachePadded<AtomicBool>,

    /// Guards against nested or concurrent runs on one instance
    running: AtomicBool,

    /// Workers participating in the current (or last) run
    active_workers: AtomicUsize,

    /// Resolved worker count; the default for `run(_, 0)`
    max_workers: usize,

    /// Steal attempts per round
    pub(super) steal_trials: usize,

    /// Sleep after a failed round
    pub(super) idle_sleep: Duration,

    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a scheduler backed by scoped std threads
    pub fn new(config: SchedulerConfig) -> SchedulerResult<Self> {
        let pool = ScopedThreadPool::new(config.max_workers.unwrap_or(0));
        Self::with_pool(config, Box::new(pool))
    }

    /// Create a scheduler on a custom host thread pool
    pub fn with_pool(config: SchedulerConfig, pool: Box<dyn ThreadPool>) -> SchedulerResult<Self> {
        config.validate()?;

        let max_workers = config.max_workers.unwrap_or_else(|| pool.num_workers()).max(1);
        let num_deques = max_workers * config.deques_per_worker;

        let deques = (0..num_deques)
            .map(|_| WorkStealingDeque::new(config.deque_capacity))
            .collect::<SchedulerResult<Vec<_>>>()?
            .into_boxed_slice();
        let attempts = (0..num_deques)
            .map(|_| CachePadded::new(AtomicUsize::new(0)))
            .collect();
        let counters = (0..num_deques).map(|_| WorkerCounters::default()).collect();

        let steal_trials = config.steal_rounds_per_deque * num_deques;
        let idle_sleep = config.idle_sleep_per_deque * num_deques as u32;

        Ok(Self {
            pool,
            deques,
            attempts,
            counters,
            finished: CachePadded::new(AtomicBool::new(false)),
            running: AtomicBool::new(false),
            active_workers: AtomicUsize::new(0),
            max_workers,
            steal_trials,
            idle_sleep,
            config,
        })
    }

    /// Execute `job` on up to `num_threads` workers (0 = all) and block until
    /// some job calls [`Scheduler::finish`].
    ///
    /// The job must stay alive until this returns.
    pub fn run(&self, job: JobRef, num_threads: usize) -> SchedulerResult<()> {
        let num_threads = if num_threads == 0 {
            self.max_workers
        } else {
            num_threads
        };

        if num_threads > self.deques.len() {
            return Err(SchedulerError::TooManyThreads {
                requested: num_threads,
                available: self.deques.len(),
            });
        }

        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SchedulerError::AlreadyRunning);
        }

        if let Err(error) = self.deques[0].push_bottom(job) {
            fatal(error);
        }
        self.active_workers.store(num_threads, Ordering::Relaxed);

        tracing::debug!(
            num_threads,
            num_deques = self.deques.len(),
            "starting fork-join run"
        );
        let started = Instant::now();

        self.pool.parallel(num_threads, &|id| {
            self.worker_loop(id, || self.finished.load(Ordering::Acquire));
            tracing::trace!(worker = id, "worker leaving run");
        });

        // Every worker has returned, so the deques are quiescent
        self.finished.store(false, Ordering::Release);
        for deque in self.deques.iter() {
            deque.reset();
        }
        self.running.store(false, Ordering::Release);

        tracing::debug!(elapsed = ?started.elapsed(), "fork-join run complete");
        tracing::trace!(stats = ?self.stats(), "scheduler statistics");
        Ok(())
    }

    /// Push a job onto the calling worker's deque, visible to thieves at once.
    ///
    /// Fails outside of a run. Overflowing the deque aborts the process.
    pub fn spawn(&self, job: JobRef) -> SchedulerResult<()> {
        let id = self.worker_id().ok_or(SchedulerError::NotInWorker)?;
        self.spawn_on(id, job);
        Ok(())
    }

    /// Pop the newest job from the calling worker's deque
    pub fn try_pop(&self) -> Option<JobRef> {
        self.worker_id().and_then(|id| self.try_pop_on(id))
    }

    /// Signal the current run to end; workers exit at their next check
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }

    /// Block the calling worker until `done()` holds, per the configured
    /// [`WaitPolicy`]
    pub fn wait<F>(&self, done: F)
    where
        F: Fn() -> bool,
    {
        match (self.config.wait_policy, self.worker_id()) {
            (WaitPolicy::Cooperative, Some(id)) => self.worker_loop(id, done),
            _ => {
                while !done() {
                    thread::yield_now();
                }
            }
        }
    }

    /// Index of the calling worker, if it belongs to a run of this scheduler
    pub fn worker_id(&self) -> Option<usize> {
        self.pool.worker_id().filter(|&id| id < self.deques.len())
    }

    /// Number of provisioned deques
    pub fn num_deques(&self) -> usize {
        self.deques.len()
    }

    /// Resolved maximum worker count
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Workers in the current or most recent run
    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::Relaxed)
    }

    /// Check if a run is in progress
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Configuration the scheduler was built with
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Get scheduler statistics, summed over all workers
    pub fn stats(&self) -> SchedulerStats {
        let mut total = SchedulerStats::default();
        for counters in self.counters.iter() {
            total += &counters.snapshot();
        }
        total
    }

    /// Zero all statistics counters
    pub fn reset_stats(&self) {
        for counters in self.counters.iter() {
            counters.reset();
        }
    }

    /// Deque owned by worker `id`
    pub fn deque(&self, id: usize) -> Option<&WorkStealingDeque> {
        self.deques.get(id)
    }

    pub(crate) fn spawn_on(&self, id: usize, job: JobRef) {
        if let Err(error) = self.deques[id].push_bottom(job) {
            fatal(error);
        }
        self.counters[id].bump(Counter::JobsSpawned);
    }

    pub(crate) fn try_pop_on(&self, id: usize) -> Option<JobRef> {
        let job = self.deques[id].pop_bottom();
        if job.is_some() {
            self.counters[id].bump(Counter::LocalPops);
        }
        job
    }

    pub(crate) fn record(&self, id: usize, counter: Counter) {
        self.counters[id].bump(counter);
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("max_workers", &self.max_workers)
            .field("num_deques", &self.deques.len())
            .field("running", &self.is_running())
            .field("config", &self.config)
            .finish()
    }
}
