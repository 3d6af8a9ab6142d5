//! Stealfork Fork-Join Runtime
//!
//! This crate provides a user-space fork-join scheduler including:
//! - Arora-Blumofe-Plaxton lock-free work-stealing deques
//! - Randomized victim selection with bounded steal rounds and backoff
//! - The `run` / `pardo` fork-join protocol with a synchronization-free fast path
//! - A minimal host thread-pool abstraction

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod fork_join;
pub mod scheduler;

pub use config::{SchedulerConfig, WaitPolicy};
pub use fork_join::ForkJoinScheduler;
pub use scheduler::{JobRef, Scheduler, SchedulerStats, StackJob, WorkStealingDeque};

/// Scheduler errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// A push found the deque at its fixed capacity
    #[error("Work-stealing deque overflow (capacity {capacity})")]
    DequeOverflow {
        /// Slots in the deque
        capacity: usize,
    },

    /// The age tag would wrap, reopening the ABA window
    #[error("Work-stealing deque age tag exhausted")]
    TagExhausted,

    /// A run asked for more workers than there are deques
    #[error("Requested {requested} worker threads but only {available} deques are provisioned")]
    TooManyThreads {
        /// Requested worker count
        requested: usize,
        /// Deques provisioned by the scheduler
        available: usize,
    },

    /// A job unwound while queued jobs still referenced its frame
    #[error("Job panicked inside a fork-join region")]
    JobPanicked,

    /// `run` was entered while another run was active on the same scheduler
    #[error("Scheduler is already running")]
    AlreadyRunning,

    /// A worker-only operation was called from outside a run
    #[error("Not running on a scheduler worker thread")]
    NotInWorker,

    /// Configuration rejected by validation
    #[error("Invalid scheduler configuration: {0}")]
    InvalidConfig(String),
}

/// Scheduler result
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Terminate the process on an unrecoverable scheduler condition.
///
/// Deque overflow and tag exhaustion leave no consistent state to unwind to:
/// queued jobs point into stack frames that unwinding would free.
#[cold]
pub(crate) fn fatal(error: SchedulerError) -> ! {
    tracing::error!(%error, "fatal scheduler error, aborting");
    eprintln!("stealfork: {}", error);
    std::process::abort()
}
