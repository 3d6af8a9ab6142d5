//! Work-Stealing Scheduler
//!
//! This module implements the job scheduler underneath the fork-join API:
//! per-worker Arora-Blumofe-Plaxton deques, randomized victim selection with
//! backoff, and the host thread-pool seam.

mod deque;
mod job;
mod pool;
#[allow(clippy::module_inception)]
mod scheduler;
mod stats;
mod worker;

pub use deque::{Age, WorkStealingDeque, DEFAULT_DEQUE_CAPACITY};
pub use job::{JobRef, StackJob};
pub(crate) use job::AbortOnUnwind;
pub use pool::{ScopedThreadPool, ThreadPool};
pub use scheduler::Scheduler;
pub(crate) use stats::Counter;
pub use stats::SchedulerStats;
pub use worker::{hash32, victim};
