//! Job references and stack-allocated jobs
//!
//! A job is a zero-argument closure executed exactly once. Queues never own
//! jobs: they hold a [`JobRef`], a single pointer to the `JobHeader` at the
//! start of a [`StackJob`] that lives in the frame which forked it. That frame
//! must not return until every path that could execute the job has finished.

use crate::{fatal, SchedulerError};
use std::cell::UnsafeCell;
use std::ptr::NonNull;

/// Type-erased entry point shared by every job.
///
/// Always the first field of a `#[repr(C)]` job so that a pointer to the job
/// and a pointer to its header are interchangeable.
#[repr(C)]
pub struct JobHeader {
    execute: unsafe fn(*const JobHeader),
}

/// Non-owning reference to a job
///
/// One machine word, so a deque slot can hold it in an `AtomicPtr`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct JobRef {
    header: NonNull<JobHeader>,
}

// SAFETY: a JobRef is only created from a StackJob whose closure is Send, and
// the creator keeps the job alive until it has been executed.
unsafe impl Send for JobRef {}
unsafe impl Sync for JobRef {}

impl JobRef {
    /// Raw header pointer, for storage in a deque slot
    pub(crate) fn as_ptr(self) -> *mut JobHeader {
        self.header.as_ptr()
    }

    /// Rebuild a reference from a slot value; `None` for a null slot
    ///
    /// # Safety
    /// `ptr` must have been produced by [`JobRef::as_ptr`].
    pub(crate) unsafe fn from_ptr(ptr: *mut JobHeader) -> Option<Self> {
        NonNull::new(ptr).map(|header| JobRef { header })
    }

    /// Run the referenced job.
    ///
    /// # Safety
    /// The job must still be alive and must not have been executed before.
    pub unsafe fn execute(self) {
        let header = self.header.as_ptr();
        ((*header).execute)(header)
    }
}

/// A job whose closure lives on the stack of the frame that forked it
#[repr(C)]
pub struct StackJob<F> {
    header: JobHeader,
    func: UnsafeCell<Option<F>>,
}

// SAFETY: the closure is taken out by exactly one executor; Send on F is what
// lets that executor be another worker.
unsafe impl<F: Send> Sync for StackJob<F> {}

impl<F> StackJob<F>
where
    F: FnOnce() + Send,
{
    /// Wrap a closure as a job
    pub fn new(func: F) -> Self {
        Self {
            header: JobHeader {
                execute: Self::execute,
            },
            func: UnsafeCell::new(Some(func)),
        }
    }

    /// Create a reference that a deque can hold.
    ///
    /// # Safety
    /// `self` must not move or drop until the job has been executed, or the
    /// reference has been reclaimed from the deque without executing it.
    pub unsafe fn as_job_ref(&self) -> JobRef {
        JobRef {
            header: NonNull::from(&self.header),
        }
    }

    /// Execute the job on the current thread, bypassing the deque.
    ///
    /// # Safety
    /// No other thread may be executing this job, which holds when its
    /// `JobRef` was just reclaimed with a local pop.
    pub unsafe fn run_inline(&self) {
        Self::execute(&self.header)
    }

    unsafe fn execute(this: *const JobHeader) {
        let this = &*(this as *const Self);
        let func = (*this.func.get()).take();
        debug_assert!(func.is_some(), "job executed twice");
        if let Some(func) = func {
            let guard = AbortOnUnwind;
            func();
            std::mem::forget(guard);
        }
    }
}

/// Aborts the process if dropped during unwinding.
///
/// Jobs and forking frames refer to each other through raw pointers, so a
/// panic cannot be allowed to unwind through either.
pub(crate) struct AbortOnUnwind;

impl Drop for AbortOnUnwind {
    fn drop(&mut self) {
        fatal(SchedulerError::JobPanicked);
    }
}
