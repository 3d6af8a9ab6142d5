//! Worker loop: local pops, randomized steals, backoff
//!
//! A worker keeps taking jobs until its stop condition holds. It always tries
//! its own deque first. After that it probes victims chosen by hashing its id
//! and a per-worker attempt counter. A round is `steal_rounds_per_deque`
//! times the deque count; by the coupon-collector bound that is enough
//! random probes to visit every deque with high probability. After a failed
//! round the worker sleeps for a time proportional to the deque count.

use super::job::JobRef;
use super::scheduler::Scheduler;
use super::stats::Counter;
use std::sync::atomic::Ordering;
use std::thread;

/// Jenkins' 32-bit integer avalanche mix
#[inline]
pub fn hash32(a: u32) -> u32 {
    let a = a.wrapping_add(0x7ed5_5d16).wrapping_add(a << 12);
    let a = (a ^ 0xc761_c23c) ^ (a >> 19);
    let a = a.wrapping_add(0x1656_67b1).wrapping_add(a << 5);
    let a = a.wrapping_add(0xd3a2_646c) ^ (a << 9);
    let a = a.wrapping_add(0xfd70_46c5).wrapping_add(a << 3);
    (a ^ 0xb55a_4f09) ^ (a >> 16)
}

/// Deque probed by `worker` on its `attempt`-th steal
///
/// The two hashes are summed in 32 bits, so the probe sequence does not
/// depend on the width of `usize`.
#[inline]
pub fn victim(worker: usize, attempt: usize, num_deques: usize) -> usize {
    let mix = hash32(worker as u32).wrapping_add(hash32(attempt as u32));
    mix as usize % num_deques
}

impl Scheduler {
    /// Run jobs on worker `id` until `done()` holds
    pub(crate) fn worker_loop<F>(&self, id: usize, done: F)
    where
        F: Fn() -> bool,
    {
        while let Some(job) = self.get_job(id, &done) {
            self.record(id, Counter::JobsExecuted);
            // SAFETY: a job reaches a worker through exactly one successful
            // pop, and its forking frame waits for it before returning
            unsafe { job.execute() };
        }
    }

    /// Next job for worker `id`, or `None` once `done()` holds
    fn get_job<F>(&self, id: usize, done: &F) -> Option<JobRef>
    where
        F: Fn() -> bool,
    {
        if done() {
            return None;
        }

        if let Some(job) = self.try_pop_on(id) {
            return Some(job);
        }

        loop {
            for _ in 0..self.steal_trials {
                if done() {
                    return None;
                }
                if let Some(job) = self.try_steal(id) {
                    return Some(job);
                }
            }

            self.record(id, Counter::IdleSleeps);
            thread::sleep(self.idle_sleep);
        }
    }

    /// One steal attempt against a hashed victim
    fn try_steal(&self, id: usize) -> Option<JobRef> {
        // Only worker `id` touches its own attempt counter
        let attempt = self.attempts[id].load(Ordering::Relaxed);
        self.attempts[id].store(attempt.wrapping_add(1), Ordering::Relaxed);

        let target = victim(id, attempt, self.deques.len());
        self.record(id, Counter::StealAttempts);

        let job = self.deques[target].pop_top();
        if job.is_some() {
            self.record(id, Counter::Steals);
        }
        job
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::scheduler::StackJob;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_hash32_known_values() {
        assert_eq!(hash32(0), 0x6b4e_d927);
        assert_eq!(hash32(1), 0xb486_81b6);
        assert_eq!(hash32(2), 0xe267_b84c);
    }

    #[test]
    fn test_hash32_avalanche() {
        // Neighbouring inputs should differ in roughly half of their bits
        let total: u32 = (0..1024u32)
            .map(|i| (hash32(i) ^ hash32(i + 1)).count_ones())
            .sum();
        let average = total as f64 / 1024.0;
        assert!(average > 10.0 && average < 22.0, "average flipped bits {}", average);
    }

    #[test]
    fn test_victim_in_range() {
        for worker in 0..8 {
            for attempt in 0..1000 {
                assert!(victim(worker, attempt, 16) < 16);
            }
        }
        assert_eq!(victim(3, 7, 1), 0);
    }

    #[test]
    fn test_victim_sum_wraps_at_32_bits() {
        // hash32(0) + hash32(1) overflows u32
        assert_eq!(victim(0, 1, 6), 3);
        assert_eq!(victim(1, 1, 6), 4);
        assert_eq!(victim(3, 7, 6), 2);
        for attempt in 0..1000 {
            let expected = hash32(2).wrapping_add(hash32(attempt as u32)) as usize % 6;
            assert_eq!(victim(2, attempt, 6), expected);
        }
    }

    #[test]
    fn test_victims_cover_all_deques_within_a_round() {
        let num_deques = 16;
        for worker in 0..8 {
            let probed: HashSet<_> = (0..4 * num_deques)
                .map(|attempt| victim(worker, attempt, num_deques))
                .collect();
            assert!(probed.len() >= num_deques * 3 / 4, "worker {} probed {:?}", worker, probed);
        }
    }

    #[test]
    fn test_worker_steals_from_other_deque() {
        let scheduler = Scheduler::new(SchedulerConfig {
            max_workers: Some(2),
            ..Default::default()
        })
        .unwrap();
        let ran = AtomicBool::new(false);
        let job = StackJob::new(|| {
            ran.store(true, Ordering::Release);
            scheduler.finish();
        });

        // Park the job on a deque no worker owns in a 1-thread run
        scheduler
            .deque(3)
            .unwrap()
            .push_bottom(unsafe { job.as_job_ref() })
            .unwrap();
        let idle = StackJob::new(|| {});
        scheduler.run(unsafe { idle.as_job_ref() }, 1).unwrap();

        assert!(ran.load(Ordering::Acquire));
        let stats = scheduler.stats();
        assert_eq!(stats.steals, 1);
        assert!(stats.steal_attempts >= 1);
        assert_eq!(stats.jobs_executed, 2);
    }
}
