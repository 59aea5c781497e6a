/*!
 * Futex-Based Wait Strategy
 *
 * Uses parking_lot_core for futex-like operations on all platforms.
 * The parking key is the slot address, and the validate callback re-reads
 * the slot under the parking-lot bucket lock, which is exactly the
 * "block only if the value is still `expected`" contract.
 */

use super::traits::{WaitOutcome, WaitStrategy, WakeResult};
use parking_lot_core::{
    park, unpark_all, unpark_filter, FilterOp, ParkResult, DEFAULT_PARK_TOKEN,
    DEFAULT_UNPARK_TOKEN,
};
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::{Duration, Instant};

/// Futex-based wait strategy
///
/// # Performance
///
/// - Zero allocations
/// - Direct futex syscalls on Linux
/// - One parking queue per slot address
#[derive(Debug, Default, Clone, Copy)]
pub struct FutexWait;

impl FutexWait {
    /// Create a new futex-based wait strategy
    pub const fn new() -> Self {
        Self
    }

    #[inline(always)]
    fn key(cell: &AtomicI32) -> usize {
        cell as *const AtomicI32 as usize
    }
}

impl WaitStrategy for FutexWait {
    fn wait(&self, cell: &AtomicI32, expected: i32, timeout: Option<Duration>) -> WaitOutcome {
        if cell.load(Ordering::SeqCst) != expected {
            return WaitOutcome::NotEqual;
        }

        let deadline = timeout.map(|d| Instant::now() + d);

        // SAFETY: the key is the address of a live AtomicI32 owned by the region,
        // which outlives this call. The callbacks do not call into parking_lot.
        let result = unsafe {
            park(
                Self::key(cell),
                || cell.load(Ordering::SeqCst) == expected,
                || {},
                |_key, _was_last| {},
                DEFAULT_PARK_TOKEN,
                deadline,
            )
        };

        match result {
            ParkResult::Unparked(_) => WaitOutcome::Ok,
            ParkResult::TimedOut => WaitOutcome::TimedOut,
            ParkResult::Invalid => WaitOutcome::NotEqual,
        }
    }

    fn wake(&self, cell: &AtomicI32, count: usize) -> WakeResult {
        if count == 0 {
            return WakeResult::NoWaiters;
        }

        let key = Self::key(cell);
        if count == usize::MAX {
            // SAFETY: see `wait`
            let unparked = unsafe { unpark_all(key, DEFAULT_UNPARK_TOKEN) };
            return WakeResult::from_count(unparked);
        }

        let mut remaining = count;
        // SAFETY: see `wait`
        let result = unsafe {
            unpark_filter(
                key,
                |_token| {
                    if remaining == 0 {
                        FilterOp::Stop
                    } else {
                        remaining -= 1;
                        FilterOp::Unpark
                    }
                },
                |_result| DEFAULT_UNPARK_TOKEN,
            )
        };

        WakeResult::from_count(result.unparked_threads)
    }

    fn name(&self) -> &'static str {
        "futex"
    }
}
