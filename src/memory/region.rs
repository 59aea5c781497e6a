/*!
 * Shared Region
 *
 * A fixed-length array of `i32` slots shared (never copied) by every worker
 * holding a handle. All coordination goes through the atomic operations
 * here; `wait` is the only one that can suspend the caller.
 */

use crate::core::errors::RegionError;
use crate::core::limits::MAX_REGION_SLOTS;
use crate::core::sync::wait::{SyncConfig, WaitOutcome, WaitStrategy};
use crate::core::types::SlotIndex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};
use uuid::Uuid;

/// Stable identifier of a region, used to correlate log lines across workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionId(Uuid);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct RegionInner {
    id: RegionId,
    slots: Box<[AtomicI32]>,
    strategy: Arc<dyn WaitStrategy>,
    /// Bump pointer for `reserve`
    next_free: AtomicUsize,
}

/// Handle to a shared block of atomic integer slots
///
/// Cloning yields another handle to the same slots.
///
/// # Examples
///
/// ```
/// use coord_kernel::memory::{SharedRegion, WaitOutcome};
/// use std::time::Duration;
///
/// let region = SharedRegion::new(4).unwrap();
/// region.store(0, 5).unwrap();
/// assert_eq!(region.add(0, 2).unwrap(), 5);
/// assert_eq!(region.compare_and_swap(0, 7, 9).unwrap(), 7);
///
/// // Slot no longer holds 0, so the wait returns immediately
/// let outcome = region.wait(0, 0, Some(Duration::from_millis(10))).unwrap();
/// assert_eq!(outcome, WaitOutcome::NotEqual);
/// ```
#[derive(Clone)]
pub struct SharedRegion {
    inner: Arc<RegionInner>,
}

impl fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedRegion")
            .field("id", &self.inner.id)
            .field("slots", &self.inner.slots.len())
            .field("reserved", &self.inner.next_free.load(Ordering::Relaxed))
            .field("strategy", &self.inner.strategy.name())
            .finish()
    }
}

impl SharedRegion {
    /// Allocate a region of `slots` zeroed slots with the default wait strategy
    pub fn new(slots: usize) -> Result<Self, RegionError> {
        Self::with_config(slots, SyncConfig::default())
    }

    /// Allocate a region with an explicit wait strategy configuration
    pub fn with_config(slots: usize, config: SyncConfig) -> Result<Self, RegionError> {
        if slots == 0 || slots > MAX_REGION_SLOTS {
            return Err(RegionError::InvalidLength(slots));
        }

        let slots: Box<[AtomicI32]> = (0..slots).map(|_| AtomicI32::new(0)).collect();
        let strategy = config.build();
        let id = RegionId(Uuid::new_v4());

        debug!(region = %id, slots = slots.len(), strategy = strategy.name(), "Shared region allocated");

        Ok(Self {
            inner: Arc::new(RegionInner {
                id,
                slots,
                strategy,
                next_free: AtomicUsize::new(0),
            }),
        })
    }

    #[inline(always)]
    fn slot(&self, index: SlotIndex) -> Result<&AtomicI32, RegionError> {
        self.inner
            .slots
            .get(index)
            .ok_or(RegionError::IndexOutOfBounds {
                index,
                len: self.inner.slots.len(),
            })
    }

    pub fn id(&self) -> RegionId {
        self.inner.id
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty()
    }

    /// Name of the wait strategy backing `wait`/`notify`
    pub fn strategy_name(&self) -> &'static str {
        self.inner.strategy.name()
    }

    /// Slots not yet handed out by `reserve`
    pub fn unreserved(&self) -> usize {
        self.len()
            .saturating_sub(self.inner.next_free.load(Ordering::Acquire))
    }

    /// Reserve `count` consecutive slots, returning the first index
    pub fn reserve(&self, count: usize) -> Result<SlotIndex, RegionError> {
        let len = self.len();
        let mut current = self.inner.next_free.load(Ordering::Acquire);
        loop {
            let end = current.saturating_add(count);
            if end > len {
                return Err(RegionError::Exhausted {
                    requested: count,
                    available: len.saturating_sub(current),
                });
            }
            match self.inner.next_free.compare_exchange_weak(
                current,
                end,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    trace!(region = %self.inner.id, base = current, count, "Slots reserved");
                    return Ok(current);
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Atomic load
    #[inline]
    pub fn load(&self, index: SlotIndex) -> Result<i32, RegionError> {
        Ok(self.slot(index)?.load(Ordering::SeqCst))
    }

    /// Atomic store
    #[inline]
    pub fn store(&self, index: SlotIndex, value: i32) -> Result<(), RegionError> {
        self.slot(index)?.store(value, Ordering::SeqCst);
        Ok(())
    }

    /// Atomic wrapping add, returns the previous value
    #[inline]
    pub fn add(&self, index: SlotIndex, delta: i32) -> Result<i32, RegionError> {
        Ok(self.slot(index)?.fetch_add(delta, Ordering::SeqCst))
    }

    /// Atomic wrapping subtract, returns the previous value
    #[inline]
    pub fn sub(&self, index: SlotIndex, delta: i32) -> Result<i32, RegionError> {
        Ok(self.slot(index)?.fetch_sub(delta, Ordering::SeqCst))
    }

    /// Atomic swap, returns the previous value
    #[inline]
    pub fn exchange(&self, index: SlotIndex, value: i32) -> Result<i32, RegionError> {
        Ok(self.slot(index)?.swap(value, Ordering::SeqCst))
    }

    /// Atomic compare-and-swap
    ///
    /// Returns the value the slot held before the operation; the swap
    /// happened iff that value equals `expected`.
    #[inline]
    pub fn compare_and_swap(
        &self,
        index: SlotIndex,
        expected: i32,
        new: i32,
    ) -> Result<i32, RegionError> {
        let previous = match self.slot(index)?.compare_exchange(
            expected,
            new,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(previous) | Err(previous) => previous,
        };
        Ok(previous)
    }

    /// Block while the slot holds `expected`, up to `timeout`
    ///
    /// Returns `NotEqual` without blocking if the slot already differs.
    pub fn wait(
        &self,
        index: SlotIndex,
        expected: i32,
        timeout: Option<Duration>,
    ) -> Result<WaitOutcome, RegionError> {
        let slot = self.slot(index)?;
        let outcome = self.inner.strategy.wait(slot, expected, timeout);
        trace!(region = %self.inner.id, index, expected, ?outcome, "Slot wait returned");
        Ok(outcome)
    }

    /// Wake up to `count` waiters on the slot (`usize::MAX` wakes all)
    ///
    /// Returns the number of waiters actually woken.
    pub fn notify(&self, index: SlotIndex, count: usize) -> Result<usize, RegionError> {
        let slot = self.slot(index)?;
        Ok(self.inner.strategy.wake(slot, count).count())
    }

    /// Wake every waiter on the slot
    #[inline]
    pub fn notify_all(&self, index: SlotIndex) -> Result<usize, RegionError> {
        self.notify(index, usize::MAX)
    }

    /// Copy of all slot values, for reporting only
    ///
    /// Each slot is read atomically; the snapshot as a whole is not.
    pub fn snapshot(&self) -> Vec<i32> {
        self.inner
            .slots
            .iter()
            .map(|slot| slot.load(Ordering::SeqCst))
            .collect()
    }
}
