/*!
 * Synchronization Traits
 *
 * Core abstractions for wait/notify on a single atomic slot.
 *
 * # Design: Trait-Based Abstraction for Implementations
 *
 * A `SharedRegion` selects its strategy once at creation time and calls
 * through this trait for every `wait`/`notify`. Strategies key their parking
 * queues by the slot address, so every slot is an independent wait queue.
 */

use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicI32;
use std::time::Duration;

/// Outcome of a wait on a slot
///
/// Three distinct results so callers never confuse a timeout with a wake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitOutcome {
    /// Slot held the expected value and the caller was woken by a notify
    Ok,
    /// Slot held the expected value and the timeout elapsed first
    TimedOut,
    /// Slot did not hold the expected value; the caller never blocked
    NotEqual,
}

impl WaitOutcome {
    #[inline(always)]
    pub fn is_timed_out(&self) -> bool {
        matches!(self, WaitOutcome::TimedOut)
    }
}

/// Result of a wake operation
///
/// Compact representation (single usize) for efficient returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeResult {
    /// Successfully woke N waiters (N >= 1)
    Woken(usize),
    /// No waiters were waiting
    NoWaiters,
}

impl WakeResult {
    /// Check if any waiters were woken
    #[inline(always)]
    pub fn is_woken(&self) -> bool {
        matches!(self, WakeResult::Woken(_))
    }

    /// Get number of woken waiters (0 if none)
    #[inline(always)]
    pub fn count(&self) -> usize {
        match self {
            WakeResult::Woken(n) => *n,
            WakeResult::NoWaiters => 0,
        }
    }

    pub(crate) fn from_count(n: usize) -> Self {
        if n == 0 {
            WakeResult::NoWaiters
        } else {
            WakeResult::Woken(n)
        }
    }
}

/// Strategy for waiting on a slot value
///
/// Implementations must be:
/// - **Thread-safe**: Safe to call from multiple threads
/// - **Value-checked**: Only block while the slot still holds `expected`,
///   with the check ordered against concurrent wakes (no lost wakeups)
pub trait WaitStrategy: Send + Sync {
    /// Block while `cell` holds `expected`, up to `timeout`
    fn wait(&self, cell: &AtomicI32, expected: i32, timeout: Option<Duration>) -> WaitOutcome;

    /// Wake up to `count` waiters parked on `cell`
    fn wake(&self, cell: &AtomicI32, count: usize) -> WakeResult;

    /// Get strategy name for debugging
    fn name(&self) -> &'static str;
}
