/*!
 * Spinlock
 *
 * Mutual exclusion by busy-polling compare-and-swap on one region slot.
 * No fairness: a waiter can starve under heavy contention. Use `WaitLock`
 * when waits are not expected to be sub-microsecond.
 */

use crate::core::errors::SyncError;
use crate::core::limits::SPINLOCK_YIELD_INTERVAL;
use crate::core::sync::holder_token;
use crate::core::types::SlotIndex;
use crate::memory::SharedRegion;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::warn;

const FREE: i32 = 0;

/// Spin diagnostics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpinStats {
    pub acquisitions: u64,
    pub total_spins: u64,
    pub max_spins: u64,
}

#[derive(Default)]
struct SpinCounters {
    acquisitions: AtomicU64,
    total_spins: AtomicU64,
    max_spins: AtomicU64,
}

/// Spinlock over a single slot (0 = free, nonzero = holder token)
///
/// Not reentrant: acquiring again from the holding thread is
/// `SyncError::Reentrant` rather than a self-deadlock.
#[derive(Clone)]
pub struct Spinlock {
    region: SharedRegion,
    index: SlotIndex,
    counters: Arc<SpinCounters>,
}

impl Spinlock {
    /// Reserve one slot of `region` for a new, unlocked spinlock
    pub fn new(region: &SharedRegion) -> Result<Self, SyncError> {
        let index = region.reserve(1)?;
        region.store(index, FREE)?;
        Ok(Self {
            region: region.clone(),
            index,
            counters: Arc::new(SpinCounters::default()),
        })
    }

    /// Spin until the lock is taken, returning the number of failed attempts
    pub fn acquire(&self) -> Result<u64, SyncError> {
        let token = holder_token();
        let mut spins = 0u64;

        loop {
            let previous = self.region.compare_and_swap(self.index, FREE, token)?;
            if previous == FREE {
                break;
            }
            if previous == token {
                warn!(slot = self.index, "Reentrant spinlock acquire rejected");
                return Err(SyncError::Reentrant);
            }

            spins += 1;
            if spins % SPINLOCK_YIELD_INTERVAL == 0 {
                thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }

        self.counters.acquisitions.fetch_add(1, Ordering::Relaxed);
        self.counters.total_spins.fetch_add(spins, Ordering::Relaxed);
        self.counters.max_spins.fetch_max(spins, Ordering::Relaxed);
        Ok(spins)
    }

    /// Single attempt; `Ok(false)` if another worker holds the lock
    pub fn try_acquire(&self) -> Result<bool, SyncError> {
        let token = holder_token();
        match self.region.compare_and_swap(self.index, FREE, token)? {
            FREE => {
                self.counters.acquisitions.fetch_add(1, Ordering::Relaxed);
                Ok(true)
            }
            holder if holder == token => Err(SyncError::Reentrant),
            _ => Ok(false),
        }
    }

    /// Release the lock held by the calling thread
    pub fn release(&self) -> Result<(), SyncError> {
        let token = holder_token();
        let previous = self.region.compare_and_swap(self.index, token, FREE)?;
        if previous != token {
            return Err(SyncError::NotHeld);
        }
        Ok(())
    }

    /// Acquire and return a guard that releases on drop
    pub fn lock(&self) -> Result<SpinlockGuard<'_>, SyncError> {
        self.acquire()?;
        Ok(SpinlockGuard { lock: self })
    }

    pub fn is_locked(&self) -> bool {
        self.region.load(self.index).map_or(false, |v| v != FREE)
    }

    pub fn slot(&self) -> SlotIndex {
        self.index
    }

    pub fn stats(&self) -> SpinStats {
        SpinStats {
            acquisitions: self.counters.acquisitions.load(Ordering::Relaxed),
            total_spins: self.counters.total_spins.load(Ordering::Relaxed),
            max_spins: self.counters.max_spins.load(Ordering::Relaxed),
        }
    }
}

/// RAII guard for `Spinlock`
pub struct SpinlockGuard<'a> {
    lock: &'a Spinlock,
}

impl Drop for SpinlockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release() {
            warn!(error = %e, slot = self.lock.index, "Spinlock guard release failed");
        }
    }
}
