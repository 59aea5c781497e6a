/*!
 * Wait Lock
 *
 * Blocking mutex over region slots: the wait/notify counterpart of the
 * spinlock. Lock word states are 0 (free), 1 (locked) and 2 (locked with
 * possible waiters), so an uncontended release never calls `notify`.
 */

use crate::core::errors::SyncError;
use crate::core::sync::holder_token;
use crate::core::types::SlotIndex;
use crate::memory::SharedRegion;
use std::time::{Duration, Instant};
use tracing::warn;

const FREE: i32 = 0;
const LOCKED: i32 = 1;
const CONTENDED: i32 = 2;

// Slot layout relative to the reserved base
const STATE: usize = 0;
const OWNER: usize = 1;

/// Blocking, non-reentrant mutex built on `wait`/`notify`
#[derive(Clone)]
pub struct WaitLock {
    region: SharedRegion,
    base: SlotIndex,
}

impl WaitLock {
    pub fn new(region: &SharedRegion) -> Result<Self, SyncError> {
        let base = region.reserve(2)?;
        region.store(base + STATE, FREE)?;
        region.store(base + OWNER, 0)?;
        Ok(Self {
            region: region.clone(),
            base,
        })
    }

    /// Block until the lock is held
    pub fn acquire(&self) -> Result<(), SyncError> {
        self.acquire_inner(None)
    }

    /// Block up to `timeout`
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<(), SyncError> {
        self.acquire_inner(Some(timeout))
    }

    pub fn try_acquire(&self) -> Result<bool, SyncError> {
        let token = self.check_not_holder()?;
        if self.region.compare_and_swap(self.base + STATE, FREE, LOCKED)? == FREE {
            self.region.store(self.base + OWNER, token)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn check_not_holder(&self) -> Result<i32, SyncError> {
        let token = holder_token();
        if self.region.load(self.base + OWNER)? == token {
            warn!(slot = self.base, "Reentrant wait-lock acquire rejected");
            return Err(SyncError::Reentrant);
        }
        Ok(token)
    }

    fn acquire_inner(&self, timeout: Option<Duration>) -> Result<(), SyncError> {
        let token = self.check_not_holder()?;
        let state = self.base + STATE;
        let start = Instant::now();

        let mut current = self.region.compare_and_swap(state, FREE, LOCKED)?;
        if current != FREE {
            if current != CONTENDED {
                current = self.region.exchange(state, CONTENDED)?;
            }
            while current != FREE {
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
                self.region.wait(state, CONTENDED, remaining)?;
                current = self.region.exchange(state, CONTENDED)?;
            }
        }

        self.region.store(self.base + OWNER, token)?;
        Ok(())
    }

    pub fn release(&self) -> Result<(), SyncError> {
        let token = holder_token();
        if self.region.load(self.base + OWNER)? != token {
            return Err(SyncError::NotHeld);
        }
        self.region.store(self.base + OWNER, 0)?;

        let state = self.base + STATE;
        if self.region.sub(state, 1)? != LOCKED {
            self.region.store(state, FREE)?;
            self.region.notify(state, 1)?;
        }
        Ok(())
    }

    pub fn lock(&self) -> Result<WaitLockGuard<'_>, SyncError> {
        self.acquire()?;
        Ok(WaitLockGuard { lock: self })
    }

    pub fn is_locked(&self) -> bool {
        self.region
            .load(self.base + STATE)
            .map_or(false, |v| v != FREE)
    }
}

/// RAII guard for `WaitLock`
pub struct WaitLockGuard<'a> {
    lock: &'a WaitLock,
}

impl Drop for WaitLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release() {
            warn!(error = %e, "Wait-lock guard release failed");
        }
    }
}
