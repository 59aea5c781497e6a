/*!
 * Bounded Resource Pool
 *
 * A fixed set of resources handed out one at a time. A semaphore over a
 * shared region gates checkouts; the resources themselves sit in a
 * lock-free `ArrayQueue`. A held permit guarantees a queued resource.
 */

use crate::core::errors::{PoolError, SyncError};
use crate::core::sync::Semaphore;
use crate::memory::SharedRegion;
use crossbeam_queue::ArrayQueue;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::ops::{Deref, DerefMut};
use std::time::Duration;
use tracing::{debug, warn};

/// What `acquire` does when every resource is checked out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustedPolicy {
    /// Wait for a release (bounded by `acquire_timeout` if set)
    #[default]
    Block,
    /// Fail immediately with `PoolError::Exhausted`
    Error,
}

#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub policy: ExhaustedPolicy,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub acquire_timeout: Option<Duration>,
}

/// Fixed-capacity pool of reusable resources
pub struct BoundedPool<R> {
    resources: ArrayQueue<R>,
    permits: Semaphore,
    capacity: usize,
    config: PoolConfig,
}

impl<R> BoundedPool<R> {
    /// Build a pool over `resources`, gated by a private region
    pub fn new(resources: Vec<R>, config: PoolConfig) -> Result<Self, PoolError> {
        let region = SharedRegion::new(3).map_err(SyncError::from)?;
        Self::with_region(&region, resources, config)
    }

    /// Build a pool whose semaphore lives in `region`
    pub fn with_region(
        region: &SharedRegion,
        resources: Vec<R>,
        config: PoolConfig,
    ) -> Result<Self, PoolError> {
        let capacity = resources.len();
        if capacity == 0 {
            return Err(PoolError::Empty);
        }
        let permits = i32::try_from(capacity).map_err(|_| {
            SyncError::InvalidArgument(format!("pool capacity {} too large", capacity))
        })?;

        let queue = ArrayQueue::new(capacity);
        for resource in resources {
            if queue.push(resource).is_err() {
                return Err(PoolError::OverRelease { capacity });
            }
        }

        debug!(capacity, policy = ?config.policy, "Bounded pool created");

        Ok(Self {
            resources: queue,
            permits: Semaphore::new(region, permits)?,
            capacity,
            config,
        })
    }

    /// Check out a resource per the configured exhaustion policy
    pub fn acquire(&self) -> Result<PooledResource<'_, R>, PoolError> {
        match self.config.policy {
            ExhaustedPolicy::Block => self.acquire_timeout(self.config.acquire_timeout),
            ExhaustedPolicy::Error => self.try_acquire()?.ok_or(PoolError::Exhausted {
                capacity: self.capacity,
            }),
        }
    }

    /// Check out a resource, waiting up to `timeout` (forever if `None`)
    pub fn acquire_timeout(
        &self,
        timeout: Option<Duration>,
    ) -> Result<PooledResource<'_, R>, PoolError> {
        self.permits.acquire(timeout).map_err(|e| match e {
            SyncError::Timeout { elapsed_ms, .. } => PoolError::Timeout { elapsed_ms },
            other => PoolError::Sync(other),
        })?;
        self.checkout()
    }

    /// Check out a resource if one is free, without waiting
    pub fn try_acquire(&self) -> Result<Option<PooledResource<'_, R>>, PoolError> {
        if !self.permits.try_acquire()? {
            return Ok(None);
        }
        self.checkout().map(Some)
    }

    fn checkout(&self) -> Result<PooledResource<'_, R>, PoolError> {
        match self.resources.pop() {
            Some(resource) => Ok(PooledResource {
                pool: self,
                resource: Some(resource),
            }),
            None => {
                // Permit without a resource means a detached resource was never returned
                self.permits.release()?;
                Err(PoolError::Exhausted {
                    capacity: self.capacity,
                })
            }
        }
    }

    /// Return a resource taken out with `PooledResource::detach`
    ///
    /// Returning more resources than the pool was built with is refused.
    pub fn release(&self, resource: R) -> Result<(), PoolError> {
        if self.resources.push(resource).is_err() {
            warn!(capacity = self.capacity, "Pool over-release rejected");
            return Err(PoolError::OverRelease {
                capacity: self.capacity,
            });
        }
        self.permits.release().map_err(|e| match e {
            SyncError::OverRelease { .. } => PoolError::OverRelease {
                capacity: self.capacity,
            },
            other => PoolError::Sync(other),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Resources currently free
    pub fn available(&self) -> usize {
        self.permits.available().max(0) as usize
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }

    /// Callers blocked in `acquire`
    pub fn waiting(&self) -> usize {
        self.permits.waiting().max(0) as usize
    }
}

// Only `detach` and `drop` empty the guard, and both consume it
const PRESENT: &str = "pooled resource present until detached";

/// Checked-out resource, returned to its pool on drop
pub struct PooledResource<'a, R> {
    pool: &'a BoundedPool<R>,
    resource: Option<R>,
}

impl<R> PooledResource<'_, R> {
    /// Take the resource out of the guard; it must be handed back with
    /// `BoundedPool::release`
    pub fn detach(mut self) -> R {
        self.resource.take().expect(PRESENT)
    }
}

impl<R> Deref for PooledResource<'_, R> {
    type Target = R;

    fn deref(&self) -> &R {
        self.resource.as_ref().expect(PRESENT)
    }
}

impl<R> DerefMut for PooledResource<'_, R> {
    fn deref_mut(&mut self) -> &mut R {
        self.resource.as_mut().expect(PRESENT)
    }
}

impl<R> Drop for PooledResource<'_, R> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            if let Err(e) = self.pool.release(resource) {
                warn!(error = %e, "Failed to return pooled resource");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn pool(n: usize, config: PoolConfig) -> BoundedPool<String> {
        BoundedPool::new((0..n).map(|i| format!("conn-{}", i)).collect(), config).unwrap()
    }

    #[test]
    fn test_guard_returns_on_drop() {
        let pool = pool(2, PoolConfig::default());
        {
            let a = pool.acquire().unwrap();
            let _b = pool.acquire().unwrap();
            assert!(a.starts_with("conn-"));
            assert_eq!(pool.available(), 0);
            assert_eq!(pool.in_use(), 2);
        }
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_error_policy_fails_fast() {
        let pool = pool(
            1,
            PoolConfig {
                policy: ExhaustedPolicy::Error,
                acquire_timeout: None,
            },
        );
        let _held = pool.acquire().unwrap();
        assert!(matches!(
            pool.acquire(),
            Err(PoolError::Exhausted { capacity: 1 })
        ));
    }

    #[test]
    fn test_block_policy_times_out() {
        let pool = pool(
            1,
            PoolConfig {
                policy: ExhaustedPolicy::Block,
                acquire_timeout: Some(Duration::from_millis(20)),
            },
        );
        let _held = pool.acquire().unwrap();
        assert!(matches!(pool.acquire(), Err(PoolError::Timeout { .. })));
    }

    #[test]
    fn test_release_wakes_waiter() {
        let pool = Arc::new(pool(1, PoolConfig::default()));
        let held = pool.acquire().unwrap().detach();

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.acquire().map(|r| r.clone()))
        };
        thread::sleep(Duration::from_millis(30));
        assert_eq!(pool.waiting(), 1);

        pool.release(held).unwrap();
        assert_eq!(waiter.join().unwrap().unwrap(), "conn-0");
    }

    #[test]
    fn test_over_release_rejected() {
        let pool = pool(1, PoolConfig::default());
        assert_eq!(
            pool.release("stranger".to_string()).unwrap_err(),
            PoolError::OverRelease { capacity: 1 }
        );
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_empty_pool_rejected() {
        assert_eq!(
            BoundedPool::<u8>::new(Vec::new(), PoolConfig::default()).err(),
            Some(PoolError::Empty)
        );
    }
}
