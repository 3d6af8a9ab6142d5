//! Arora-Blumofe-Plaxton work-stealing deque
//!
//! A fixed-capacity array of job references with two ends:
//! - the owner pushes and pops at `bottom` (LIFO, cache-warm work)
//! - any thread steals at `top` (oldest work first)
//!
//! `top` shares one 64-bit word with a `tag`, so a single compare-and-swap
//! validates both. The owner bumps the tag every time it resets an emptied
//! deque back to index 0; without that, a thief holding a stale `(tag, top)`
//! snapshot could succeed against a refilled deque (ABA).
//!
//! Every index access and CAS is sequentially consistent. `pop_bottom` stores
//! `bottom` and then loads `age`, and that store-load pair needs a full fence
//! on every architecture.

use super::job::{JobHeader, JobRef};
use crate::{fatal, SchedulerError, SchedulerResult};
use crossbeam::utils::CachePadded;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, Ordering};

/// Default number of slots per deque
///
/// Every slot is usable, so a default deque holds 200 jobs, one more than a
/// queue that overflows as soon as `bottom` reaches its size.
pub const DEFAULT_DEQUE_CAPACITY: usize = 200;

/// The `(tag, top)` pair packed into one CAS-able word
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Age {
    /// Bumped on every owner-side empty transition
    pub tag: u32,
    /// Index of the oldest unstolen job
    pub top: u32,
}

impl Age {
    /// Tag in the high half, top in the low half
    #[inline]
    pub fn pack(self) -> u64 {
        ((self.tag as u64) << 32) | self.top as u64
    }

    /// Inverse of [`Age::pack`]
    #[inline]
    pub fn unpack(word: u64) -> Self {
        Self {
            tag: (word >> 32) as u32,
            top: word as u32,
        }
    }

    /// The age an emptied deque is reset to, or `None` if the tag would wrap
    #[inline]
    fn reset(self) -> Option<Self> {
        self.tag.checked_add(1).map(|tag| Age { tag, top: 0 })
    }
}

/// Work-stealing deque owned by a single worker
pub struct WorkStealingDeque {
    /// Packed `(tag, top)`
    age: CachePadded<AtomicU64>,

    /// One past the newest job; written only by the owner
    bottom: CachePadded<AtomicU32>,

    /// Job slots, padded so pushes and steals on neighbours don't share lines
    slots: Box<[CachePadded<AtomicPtr<JobHeader>>]>,
}

impl WorkStealingDeque {
    /// Create a deque with `capacity` slots.
    ///
    /// Capacity is bounded by the 32-bit index width of the age word.
    pub fn new(capacity: usize) -> SchedulerResult<Self> {
        if capacity == 0 || capacity > u32::MAX as usize {
            return Err(SchedulerError::InvalidConfig(format!(
                "deque capacity must be in 1..={}, got {}",
                u32::MAX,
                capacity
            )));
        }

        let slots = (0..capacity)
            .map(|_| CachePadded::new(AtomicPtr::new(ptr::null_mut())))
            .collect();

        Ok(Self {
            age: CachePadded::new(AtomicU64::new(Age { tag: 0, top: 0 }.pack())),
            bottom: CachePadded::new(AtomicU32::new(0)),
            slots,
        })
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Current `(tag, top)` snapshot
    pub fn age(&self) -> Age {
        Age::unpack(self.age.load(Ordering::SeqCst))
    }

    /// Current bottom index
    pub fn bottom(&self) -> usize {
        self.bottom.load(Ordering::SeqCst) as usize
    }

    /// Number of unstolen jobs (approximate under concurrency)
    pub fn len(&self) -> usize {
        let top = self.age().top as usize;
        self.bottom().saturating_sub(top)
    }

    /// Check if there is nothing left to pop or steal (approximate)
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push a job at the bottom. Owner only.
    ///
    /// Fails when `bottom` has reached capacity; the deque never grows.
    pub fn push_bottom(&self, job: JobRef) -> SchedulerResult<()> {
        let bottom = self.bottom.load(Ordering::SeqCst);
        let slot = self
            .slots
            .get(bottom as usize)
            .ok_or(SchedulerError::DequeOverflow {
                capacity: self.capacity(),
            })?;

        slot.store(job.as_ptr(), Ordering::Relaxed);
        // Publishing bottom releases the slot write to any thief that sees it
        self.bottom.store(bottom + 1, Ordering::SeqCst);
        Ok(())
    }

    /// Steal the oldest job. Any thread.
    ///
    /// `None` means empty or a lost race; callers move on to another victim
    /// rather than spinning on this one.
    pub fn pop_top(&self) -> Option<JobRef> {
        let old_word = self.age.load(Ordering::SeqCst);
        let old_age = Age::unpack(old_word);
        let bottom = self.bottom.load(Ordering::SeqCst);

        if bottom <= old_age.top {
            return None;
        }

        let job = self.slots[old_age.top as usize].load(Ordering::Relaxed);
        let new_age = Age {
            tag: old_age.tag,
            top: old_age.top + 1,
        };

        match self.age.compare_exchange(
            old_word,
            new_age.pack(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            // SAFETY: slots only ever hold pointers written by push_bottom
            Ok(_) => unsafe { JobRef::from_ptr(job) },
            Err(_) => None,
        }
    }

    /// Pop the newest job. Owner only.
    ///
    /// When one job is left this races with `pop_top`; exactly one side wins,
    /// and either way the deque is reset to index 0 with a fresh tag.
    pub fn pop_bottom(&self) -> Option<JobRef> {
        let bottom = self.bottom.load(Ordering::SeqCst);
        if bottom == 0 {
            return None;
        }

        let bottom = bottom - 1;
        self.bottom.store(bottom, Ordering::SeqCst);

        let job = self.slots[bottom as usize].load(Ordering::Relaxed);
        let old_word = self.age.load(Ordering::SeqCst);
        let old_age = Age::unpack(old_word);

        if bottom > old_age.top {
            // SAFETY: slots only ever hold pointers written by push_bottom
            return unsafe { JobRef::from_ptr(job) };
        }

        self.bottom.store(0, Ordering::SeqCst);
        let new_age = match old_age.reset() {
            Some(age) => age,
            None => fatal(SchedulerError::TagExhausted),
        };

        if bottom == old_age.top
            && self
                .age
                .compare_exchange(
                    old_word,
                    new_age.pack(),
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
        {
            // SAFETY: slots only ever hold pointers written by push_bottom
            return unsafe { JobRef::from_ptr(job) };
        }

        // A thief took the last job; resynchronize with the bumped tag
        self.age.store(new_age.pack(), Ordering::SeqCst);
        None
    }

    /// Reset an empty deque to index 0 between runs.
    ///
    /// Only valid while no other thread is using the deque, i.e. after every
    /// worker of a run has returned. The tag still advances so a previously
    /// published age is never repeated.
    pub fn reset(&self) {
        debug_assert!(self.is_empty(), "reset of a non-empty deque");

        let age = self.age();
        if age.top == 0 && self.bottom() == 0 {
            return;
        }

        let new_age = match age.reset() {
            Some(age) => age,
            None => fatal(SchedulerError::TagExhausted),
        };
        self.bottom.store(0, Ordering::SeqCst);
        self.age.store(new_age.pack(), Ordering::SeqCst);
    }
}

impl std::fmt::Debug for WorkStealingDeque {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkStealingDeque")
            .field("capacity", &self.capacity())
            .field("age", &self.age())
            .field("bottom", &self.bottom())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::StackJob;

    fn noop_jobs(count: usize) -> Vec<StackJob<fn()>> {
        (0..count).map(|_| StackJob::new((|| {}) as fn())).collect()
    }

    #[test]
    fn test_age_pack_unpack() {
        let age = Age {
            tag: 0xDEAD_BEEF,
            top: 17,
        };
        assert_eq!(Age::unpack(age.pack()), age);
        assert_eq!(age.pack() >> 32, 0xDEAD_BEEF);
    }

    #[test]
    fn test_age_reset_bumps_tag() {
        let age = Age { tag: 3, top: 9 };
        assert_eq!(age.reset(), Some(Age { tag: 4, top: 0 }));
        assert_eq!(
            Age {
                tag: u32::MAX,
                top: 0
            }
            .reset(),
            None
        );
    }

    #[test]
    fn test_deque_rejects_bad_capacity() {
        assert!(matches!(
            WorkStealingDeque::new(0),
            Err(SchedulerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_push_pop_bottom_lifo() {
        let deque = WorkStealingDeque::new(8).unwrap();
        let jobs = noop_jobs(3);
        let refs: Vec<_> = jobs.iter().map(|j| unsafe { j.as_job_ref() }).collect();

        for job in &refs {
            deque.push_bottom(*job).unwrap();
        }
        assert_eq!(deque.len(), 3);

        assert_eq!(deque.pop_bottom(), Some(refs[2]));
        assert_eq!(deque.pop_bottom(), Some(refs[1]));
        assert_eq!(deque.pop_bottom(), Some(refs[0]));
        assert_eq!(deque.pop_bottom(), None);
        assert!(deque.is_empty());
    }

    #[test]
    fn test_pop_top_fifo() {
        let deque = WorkStealingDeque::new(8).unwrap();
        let jobs = noop_jobs(3);
        let refs: Vec<_> = jobs.iter().map(|j| unsafe { j.as_job_ref() }).collect();

        for job in &refs {
            deque.push_bottom(*job).unwrap();
        }

        assert_eq!(deque.pop_top(), Some(refs[0]));
        assert_eq!(deque.pop_top(), Some(refs[1]));
        assert_eq!(deque.age().top, 2);
        assert_eq!(deque.pop_top(), Some(refs[2]));
        assert_eq!(deque.pop_top(), None);
    }

    #[test]
    fn test_last_item_pop_bottom_resets_and_bumps_tag() {
        let deque = WorkStealingDeque::new(8).unwrap();
        let jobs = noop_jobs(2);
        let refs: Vec<_> = jobs.iter().map(|j| unsafe { j.as_job_ref() }).collect();

        deque.push_bottom(refs[0]).unwrap();
        deque.push_bottom(refs[1]).unwrap();
        assert_eq!(deque.pop_top(), Some(refs[0]));

        // One job left at index 1 == top: goes through the CAS path
        assert_eq!(deque.pop_bottom(), Some(refs[1]));
        assert_eq!(deque.age(), Age { tag: 1, top: 0 });
        assert_eq!(deque.bottom(), 0);
    }

    #[test]
    fn test_pop_bottom_after_everything_stolen() {
        let deque = WorkStealingDeque::new(8).unwrap();
        let jobs = noop_jobs(1);
        let job = unsafe { jobs[0].as_job_ref() };

        deque.push_bottom(job).unwrap();
        assert_eq!(deque.pop_top(), Some(job));

        // bottom (1) > 0 but top has caught up: resynchronize, report empty
        assert_eq!(deque.pop_bottom(), None);
        assert_eq!(deque.age(), Age { tag: 1, top: 0 });
        assert_eq!(deque.bottom(), 0);
    }

    #[test]
    fn test_stale_steal_snapshot_fails_after_reset() {
        let deque = WorkStealingDeque::new(8).unwrap();
        let jobs = noop_jobs(2);
        let refs: Vec<_> = jobs.iter().map(|j| unsafe { j.as_job_ref() }).collect();

        deque.push_bottom(refs[0]).unwrap();
        let stale = deque.age.load(Ordering::SeqCst);

        // Owner drains and refills; top returns to 0 but the tag moved on
        assert_eq!(deque.pop_bottom(), Some(refs[0]));
        deque.push_bottom(refs[1]).unwrap();
        assert_eq!(Age::unpack(stale).top, deque.age().top);

        let stale_cas = deque.age.compare_exchange(
            stale,
            Age { tag: 0, top: 1 }.pack(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        assert!(stale_cas.is_err());
        assert_eq!(deque.pop_top(), Some(refs[1]));
    }

    #[test]
    fn test_empty_deque_stays_empty() {
        let deque = WorkStealingDeque::new(4).unwrap();
        for _ in 0..100 {
            assert_eq!(deque.pop_top(), None);
            assert_eq!(deque.pop_bottom(), None);
        }
        assert_eq!(deque.age(), Age { tag: 0, top: 0 });
    }

    #[test]
    fn test_overflow_at_capacity() {
        let deque = WorkStealingDeque::new(4).unwrap();
        let jobs = noop_jobs(5);

        for job in &jobs[..4] {
            deque.push_bottom(unsafe { job.as_job_ref() }).unwrap();
        }
        assert_eq!(
            deque.push_bottom(unsafe { jobs[4].as_job_ref() }),
            Err(SchedulerError::DequeOverflow { capacity: 4 })
        );
        assert_eq!(deque.len(), 4);
    }

    #[test]
    fn test_default_capacity_holds_every_slot() {
        let deque = WorkStealingDeque::new(DEFAULT_DEQUE_CAPACITY).unwrap();
        let jobs = noop_jobs(DEFAULT_DEQUE_CAPACITY + 1);

        for job in &jobs[..DEFAULT_DEQUE_CAPACITY] {
            deque.push_bottom(unsafe { job.as_job_ref() }).unwrap();
        }
        assert_eq!(deque.bottom(), 200);
        assert!(deque
            .push_bottom(unsafe { jobs[DEFAULT_DEQUE_CAPACITY].as_job_ref() })
            .is_err());
    }

    #[test]
    fn test_stolen_slots_are_not_reused_until_reset() {
        let deque = WorkStealingDeque::new(2).unwrap();
        let jobs = noop_jobs(3);

        deque.push_bottom(unsafe { jobs[0].as_job_ref() }).unwrap();
        deque.push_bottom(unsafe { jobs[1].as_job_ref() }).unwrap();
        assert!(deque.pop_top().is_some());

        // Top advanced, but bottom is still at capacity
        assert!(deque.push_bottom(unsafe { jobs[2].as_job_ref() }).is_err());

        assert!(deque.pop_bottom().is_some());
        deque.push_bottom(unsafe { jobs[2].as_job_ref() }).unwrap();
    }

    #[test]
    fn test_reset_after_steals() {
        let deque = WorkStealingDeque::new(4).unwrap();
        let jobs = noop_jobs(2);

        deque.push_bottom(unsafe { jobs[0].as_job_ref() }).unwrap();
        deque.push_bottom(unsafe { jobs[1].as_job_ref() }).unwrap();
        assert!(deque.pop_top().is_some());
        assert!(deque.pop_top().is_some());
        assert_eq!(deque.bottom(), 2);

        deque.reset();
        assert_eq!(deque.bottom(), 0);
        assert_eq!(deque.age(), Age { tag: 1, top: 0 });

        // Already clean: no tag bump
        deque.reset();
        assert_eq!(deque.age(), Age { tag: 1, top: 0 });
    }
}
