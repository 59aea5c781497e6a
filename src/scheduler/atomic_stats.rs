/*!
 * Lock-Free Scheduler Statistics
 * Atomic counters updated from worker hot paths, snapshotted on demand
 */

use super::types::SchedulerStats;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic scheduler statistics
///
/// # Performance
/// - Cache-line aligned to prevent false sharing with queue state
/// - All updates use relaxed ordering
#[repr(C, align(64))]
pub(crate) struct AtomicSchedulerStats {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    steals: AtomicU64,
    steal_retries: AtomicU64,
    local_spawns: AtomicU64,
    per_worker: Box<[AtomicU64]>,
}

impl AtomicSchedulerStats {
    pub fn new(workers: usize) -> Self {
        Self {
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            steals: AtomicU64::new(0),
            steal_retries: AtomicU64::new(0),
            local_spawns: AtomicU64::new(0),
            per_worker: (0..workers).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    #[inline(always)]
    pub fn inc_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_steals(&self) {
        self.steals.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_steal_retries(&self) {
        self.steal_retries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_local_spawns(&self) {
        self.local_spawns.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished task on `worker`
    #[inline]
    pub fn record_finished(&self, worker: usize, success: bool) {
        if success {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(counter) = self.per_worker.get(worker) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self, outstanding: usize) -> SchedulerStats {
        SchedulerStats {
            workers: self.per_worker.len(),
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            steals: self.steals.load(Ordering::Relaxed),
            steal_retries: self.steal_retries.load(Ordering::Relaxed),
            local_spawns: self.local_spawns.load(Ordering::Relaxed),
            outstanding,
            per_worker: self
                .per_worker
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect(),
        }
    }
}
