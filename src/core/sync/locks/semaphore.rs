/*!
 * Counting Semaphore
 *
 * Bounded permit gate over region slots. Acquire is a compare-and-swap
 * retry loop; the blocking variant parks on the permit slot while it reads
 * zero. Release refuses to grow permits beyond capacity.
 */

use crate::core::errors::SyncError;
use crate::core::types::SlotIndex;
use crate::memory::SharedRegion;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

// Slot layout relative to the reserved base
const PERMITS: usize = 0;
const WAITING: usize = 1;
const MAX_IN_USE: usize = 2;

/// Counting semaphore with a fixed capacity
///
/// Invariant: `0 <= available() <= capacity()` at all times.
#[derive(Clone)]
pub struct Semaphore {
    region: SharedRegion,
    base: SlotIndex,
    capacity: i32,
}

impl Semaphore {
    /// Reserve slots for a semaphore with `capacity` permits, all available
    pub fn new(region: &SharedRegion, capacity: i32) -> Result<Self, SyncError> {
        if capacity < 1 {
            return Err(SyncError::InvalidArgument(format!(
                "semaphore capacity must be positive, got {}",
                capacity
            )));
        }

        let base = region.reserve(3)?;
        region.store(base + PERMITS, capacity)?;
        region.store(base + WAITING, 0)?;
        region.store(base + MAX_IN_USE, 0)?;

        debug!(region = %region.id(), base, capacity, "Semaphore created");

        Ok(Self {
            region: region.clone(),
            base,
            capacity,
        })
    }

    /// Take a permit if one is available, without blocking
    pub fn try_acquire(&self) -> Result<bool, SyncError> {
        let permits = self.base + PERMITS;
        loop {
            let current = self.region.load(permits)?;
            if current <= 0 {
                return Ok(false);
            }
            if self.region.compare_and_swap(permits, current, current - 1)? == current {
                self.track_in_use(self.capacity - (current - 1))?;
                return Ok(true);
            }
            // Lost the race to another acquirer, retry
        }
    }

    /// Take a permit, blocking up to `timeout` (forever if `None`)
    pub fn acquire(&self, timeout: Option<Duration>) -> Result<(), SyncError> {
        if self.try_acquire()? {
            return Ok(());
        }

        let start = Instant::now();
        self.region.add(self.base + WAITING, 1)?;
        let result = self.acquire_slow(start, timeout);
        self.region.sub(self.base + WAITING, 1)?;
        result
    }

    fn acquire_slow(&self, start: Instant, timeout: Option<Duration>) -> Result<(), SyncError> {
        loop {
            if self.try_acquire()? {
                return Ok(());
            }

            let remaining = match timeout {
                Some(t) => {
                    let elapsed = start.elapsed();
                    if elapsed >= t {
                        return Err(SyncError::timeout(elapsed, t));
                    }
                    Some(t - elapsed)
                }
                None => None,
            };

            self.region.wait(self.base + PERMITS, 0, remaining)?;
        }
    }

    /// Acquire and return a permit that releases on drop
    pub fn acquire_permit(&self, timeout: Option<Duration>) -> Result<SemaphorePermit<'_>, SyncError> {
        self.acquire(timeout)?;
        Ok(SemaphorePermit { semaphore: self })
    }

    /// Return a permit and wake one waiter
    pub fn release(&self) -> Result<(), SyncError> {
        let permits = self.base + PERMITS;
        loop {
            let current = self.region.load(permits)?;
            if current >= self.capacity {
                warn!(base = self.base, capacity = self.capacity, "Semaphore over-release rejected");
                return Err(SyncError::OverRelease {
                    capacity: self.capacity,
                });
            }
            if self.region.compare_and_swap(permits, current, current + 1)? == current {
                break;
            }
        }

        self.region.notify(permits, 1)?;
        Ok(())
    }

    fn track_in_use(&self, in_use: i32) -> Result<(), SyncError> {
        let slot = self.base + MAX_IN_USE;
        loop {
            let seen = self.region.load(slot)?;
            if in_use <= seen || self.region.compare_and_swap(slot, seen, in_use)? == seen {
                return Ok(());
            }
        }
    }

    pub fn available(&self) -> i32 {
        self.region.load(self.base + PERMITS).unwrap_or(0)
    }

    pub fn capacity(&self) -> i32 {
        self.capacity
    }

    /// Number of acquirers currently blocked
    pub fn waiting(&self) -> i32 {
        self.region.load(self.base + WAITING).unwrap_or(0)
    }

    /// Highest number of permits observed in use at once
    pub fn max_in_use(&self) -> i32 {
        self.region.load(self.base + MAX_IN_USE).unwrap_or(0)
    }
}

/// RAII permit for `Semaphore`
pub struct SemaphorePermit<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.semaphore.release() {
            warn!(error = %e, "Semaphore permit release failed");
        }
    }
}
