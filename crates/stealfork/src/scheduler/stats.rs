//! Scheduler statistics

use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};

/// Scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Jobs dispatched by a worker loop
    pub jobs_executed: u64,

    /// Jobs pushed onto a worker's own deque
    pub jobs_spawned: u64,

    /// Successful pops from a worker's own deque
    pub local_pops: u64,

    /// Steal attempts against any deque
    pub steal_attempts: u64,

    /// Steal attempts that returned a job
    pub steals: u64,

    /// Backoff sleeps after a failed steal round
    pub idle_sleeps: u64,

    /// `pardo` calls that reclaimed their right branch and ran it inline
    pub inline_joins: u64,

    /// `pardo` calls that had to wait for a stolen right branch
    pub stolen_joins: u64,
}

impl std::ops::AddAssign<&SchedulerStats> for SchedulerStats {
    fn add_assign(&mut self, other: &SchedulerStats) {
        self.jobs_executed += other.jobs_executed;
        self.jobs_spawned += other.jobs_spawned;
        self.local_pops += other.local_pops;
        self.steal_attempts += other.steal_attempts;
        self.steals += other.steals;
        self.idle_sleeps += other.idle_sleeps;
        self.inline_joins += other.inline_joins;
        self.stolen_joins += other.stolen_joins;
    }
}

/// A counter slot in [`WorkerCounters`]
#[derive(Debug, Copy, Clone)]
pub(crate) enum Counter {
    JobsExecuted,
    JobsSpawned,
    LocalPops,
    StealAttempts,
    Steals,
    IdleSleeps,
    InlineJoins,
    StolenJoins,
}

const COUNTERS: usize = 8;

/// Counters written only by their own worker, on their own cache line
#[derive(Debug, Default)]
pub(crate) struct WorkerCounters {
    values: CachePadded<[AtomicU64; COUNTERS]>,
}

impl WorkerCounters {
    #[inline]
    pub(crate) fn bump(&self, counter: Counter) {
        self.values[counter as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> SchedulerStats {
        let get = |counter: Counter| self.values[counter as usize].load(Ordering::Relaxed);
        SchedulerStats {
            jobs_executed: get(Counter::JobsExecuted),
            jobs_spawned: get(Counter::JobsSpawned),
            local_pops: get(Counter::LocalPops),
            steal_attempts: get(Counter::StealAttempts),
            steals: get(Counter::Steals),
            idle_sleeps: get(Counter::IdleSleeps),
            inline_joins: get(Counter::InlineJoins),
            stolen_joins: get(Counter::StolenJoins),
        }
    }

    pub(crate) fn reset(&self) {
        for value in self.values.iter() {
            value.store(0, Ordering::Relaxed);
        }
    }
}
