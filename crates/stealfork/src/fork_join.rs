//! Fork-join API on top of the work-stealing scheduler
//!
//! `pardo(left, right)` pushes `right` where thieves can see it, runs `left`
//! inline, then tries to take `right` back. If nobody stole it, `right` also
//! runs inline and the call never synchronized with another worker. Only a
//! stolen `right` costs a wait.

use crate::config::SchedulerConfig;
use crate::scheduler::{AbortOnUnwind, Counter, Scheduler, SchedulerStats, StackJob};
use crate::SchedulerResult;
use std::sync::atomic::{AtomicBool, Ordering};

/// Fork-join scheduler
#[derive(Debug)]
pub struct ForkJoinScheduler {
    scheduler: Scheduler,
}

impl ForkJoinScheduler {
    /// Create a fork-join scheduler with the default configuration
    pub fn new() -> SchedulerResult<Self> {
        Self::with_config(SchedulerConfig::default())
    }

    /// Create a fork-join scheduler with a custom configuration
    pub fn with_config(config: SchedulerConfig) -> SchedulerResult<Self> {
        Ok(Self {
            scheduler: Scheduler::new(config)?,
        })
    }

    /// Wrap an existing scheduler, e.g. one built on a custom thread pool
    pub fn from_scheduler(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    /// Run `thunk` to completion on up to `num_threads` workers (0 = all).
    ///
    /// `thunk` runs on one worker; every `pardo` it makes may spread work to
    /// the others. Returns once `thunk` and everything it forked are done.
    pub fn run<F>(&self, thunk: F, num_threads: usize) -> SchedulerResult<()>
    where
        F: FnOnce() + Send,
    {
        let root = StackJob::new(|| {
            thunk();
            self.scheduler.finish();
        });

        // SAFETY: `root` outlives the run, which only returns once the job
        // has called finish
        self.scheduler.run(unsafe { root.as_job_ref() }, num_threads)
    }

    /// Run `left` and `right`, potentially in parallel, and return when both
    /// have finished.
    ///
    /// Outside of [`ForkJoinScheduler::run`] the two run one after the other
    /// on the calling thread.
    pub fn pardo<L, R>(&self, left: L, right: R)
    where
        L: FnOnce(),
        R: FnOnce() + Send,
    {
        let sched = &self.scheduler;
        let id = match sched.worker_id() {
            Some(id) => id,
            None => {
                left();
                right();
                return;
            }
        };

        let stolen = AtomicBool::new(false);
        let right_done = AtomicBool::new(false);
        let right_job = StackJob::new(|| {
            stolen.store(true, Ordering::Relaxed);
            right();
            right_done.store(true, Ordering::Release);
        });

        // `right_job` lives in this frame; nothing may unwind out of it
        // while a thief could still hold the reference
        let guard = AbortOnUnwind;

        // SAFETY: this frame returns only after `right_job` was reclaimed
        // locally or `right_done` was observed
        let right_ref = unsafe { right_job.as_job_ref() };
        sched.spawn_on(id, right_ref);

        left();

        if !stolen.load(Ordering::Relaxed) {
            match sched.try_pop_on(id) {
                Some(job) if job == right_ref => {
                    sched.record(id, Counter::InlineJoins);
                    // SAFETY: popping it back proves no thief has it
                    unsafe { right_job.run_inline() };
                    std::mem::forget(guard);
                    return;
                }
                // Belongs to an enclosing pardo; put it back untouched
                Some(job) => sched.spawn_on(id, job),
                None => {}
            }
        }

        sched.record(id, Counter::StolenJoins);
        sched.wait(|| right_done.load(Ordering::Acquire));
        std::mem::forget(guard);
    }

    /// Underlying scheduler
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Get scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }
}
