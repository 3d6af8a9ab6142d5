//! Scheduler configuration

use crate::scheduler::DEFAULT_DEQUE_CAPACITY;
use crate::{SchedulerError, SchedulerResult};
use std::time::Duration;

/// Environment variable overriding the default worker count
pub const ENV_NUM_THREADS: &str = "STEALFORK_NUM_THREADS";

/// Environment variable overriding the per-deque capacity
pub const ENV_DEQUE_CAPACITY: &str = "STEALFORK_DEQUE_CAPACITY";

/// Environment variable selecting the wait policy (`cooperative` | `conservative`)
pub const ENV_WAIT_POLICY: &str = "STEALFORK_WAIT";

/// How a worker waits for a stolen job to finish
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum WaitPolicy {
    /// Re-enter the worker loop and run other jobs while waiting
    #[default]
    Cooperative,

    /// Yield-poll without running other jobs.
    ///
    /// Needed when a fork happens while holding a lock that a stolen job might
    /// also take.
    Conservative,
}

impl std::str::FromStr for WaitPolicy {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cooperative" => Ok(WaitPolicy::Cooperative),
            "conservative" => Ok(WaitPolicy::Conservative),
            other => Err(SchedulerError::InvalidConfig(format!(
                "unknown wait policy '{}'",
                other
            ))),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum worker threads (None = number of CPUs)
    pub max_workers: Option<usize>,

    /// Deques provisioned per worker
    pub deques_per_worker: usize,

    /// Slots in each deque; bounds fork nesting depth per worker
    pub deque_capacity: usize,

    /// Policy for `pardo` joins on stolen work
    pub wait_policy: WaitPolicy,

    /// Steal attempts per round, as a multiple of the deque count
    pub steal_rounds_per_deque: usize,

    /// Sleep between failed steal rounds, per deque
    pub idle_sleep_per_deque: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: None,
            deques_per_worker: 2,
            deque_capacity: DEFAULT_DEQUE_CAPACITY,
            wait_policy: WaitPolicy::Cooperative,
            steal_rounds_per_deque: 4,
            idle_sleep_per_deque: Duration::from_nanos(500),
        }
    }
}

impl SchedulerConfig {
    /// Single worker, single deque: every `pardo` takes the inline path
    pub fn sequential() -> Self {
        Self {
            max_workers: Some(1),
            deques_per_worker: 1,
            ..Self::default()
        }
    }

    /// Defaults with overrides from `STEALFORK_*` environment variables
    pub fn from_env() -> SchedulerResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults with overrides from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> SchedulerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_NUM_THREADS) {
            let workers = parse_count(ENV_NUM_THREADS, &value)?;
            config.max_workers = (workers > 0).then_some(workers);
        }

        if let Some(value) = lookup(ENV_DEQUE_CAPACITY) {
            config.deque_capacity = parse_count(ENV_DEQUE_CAPACITY, &value)?;
        }

        if let Some(value) = lookup(ENV_WAIT_POLICY) {
            config.wait_policy = value.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Worker count with `None` resolved against the hardware
    pub fn resolved_workers(&self) -> usize {
        self.max_workers.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Check the configuration for values the scheduler cannot run with
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.max_workers == Some(0) {
            return Err(invalid("max_workers must be at least 1"));
        }
        if self.deques_per_worker == 0 {
            return Err(invalid("deques_per_worker must be at least 1"));
        }
        if self.deque_capacity == 0 || self.deque_capacity > u32::MAX as usize {
            return Err(SchedulerError::InvalidConfig(format!(
                "deque_capacity must be in 1..={}, got {}",
                u32::MAX,
                self.deque_capacity
            )));
        }
        if self.steal_rounds_per_deque == 0 {
            return Err(invalid("steal_rounds_per_deque must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> SchedulerError {
    SchedulerError::InvalidConfig(message.to_string())
}

fn parse_count(key: &str, value: &str) -> SchedulerResult<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| SchedulerError::InvalidConfig(format!("{}: expected a count, got '{}'", key, value)))
}
