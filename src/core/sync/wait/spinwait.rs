/*!
 * Adaptive Spin-Wait Strategy
 *
 * Optimized for low-latency scenarios where waits are typically very short.
 * Spins on the slot value for a while before falling back to parking.
 */

use super::futex::FutexWait;
use super::traits::{WaitOutcome, WaitStrategy, WakeResult};
use std::sync::atomic::{AtomicI32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Adaptive backoff for spin loops: spin hints, then yields
#[inline(always)]
pub(crate) fn adaptive_backoff(spin_count: u32) {
    if spin_count < 16 {
        std::hint::spin_loop();
    } else {
        thread::yield_now();
    }
}

/// Adaptive spin-wait strategy
///
/// # Performance
///
/// - Ultra-low latency for short waits (< 10µs)
/// - Higher CPU usage during wait
/// - Falls back to futex parking for long waits
pub struct SpinWait {
    /// Fallback for long waits
    fallback: FutexWait,
    /// Spin duration before falling back
    spin_duration: Duration,
    /// Maximum spin iterations
    max_spins: u32,
}

impl SpinWait {
    /// Create a new adaptive spin-wait strategy
    pub fn new(spin_duration: Duration, max_spins: u32) -> Self {
        Self {
            fallback: FutexWait::new(),
            spin_duration,
            max_spins,
        }
    }

    /// Create with default parameters
    pub fn with_defaults() -> Self {
        Self::new(Duration::from_micros(50), 500)
    }
}

impl Default for SpinWait {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl WaitStrategy for SpinWait {
    fn wait(&self, cell: &AtomicI32, expected: i32, timeout: Option<Duration>) -> WaitOutcome {
        if cell.load(Ordering::SeqCst) != expected {
            return WaitOutcome::NotEqual;
        }

        let start = Instant::now();
        let spin_limit = timeout.map_or(self.spin_duration, |t| t.min(self.spin_duration));
        let mut spin_count = 0u32;

        while start.elapsed() < spin_limit && spin_count < self.max_spins {
            if cell.load(Ordering::SeqCst) != expected {
                // Value moved while we spun: same as being woken
                return WaitOutcome::Ok;
            }
            adaptive_backoff(spin_count);
            spin_count += 1;
        }

        if let Some(timeout) = timeout {
            if start.elapsed() >= timeout {
                return WaitOutcome::TimedOut;
            }
        }

        let remaining = timeout.map(|t| t.saturating_sub(start.elapsed()));
        match self.fallback.wait(cell, expected, remaining) {
            // The value changed between spinning and parking
            WaitOutcome::NotEqual => WaitOutcome::Ok,
            other => other,
        }
    }

    fn wake(&self, cell: &AtomicI32, count: usize) -> WakeResult {
        self.fallback.wake(cell, count)
    }

    fn name(&self) -> &'static str {
        "spinwait"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_spinwait_timeout() {
        let sw = SpinWait::with_defaults();
        let cell = AtomicI32::new(0);
        let start = Instant::now();
        let result = sw.wait(&cell, 0, Some(Duration::from_millis(50)));

        assert_eq!(result, WaitOutcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_spinwait_observes_store_while_spinning() {
        let sw = Arc::new(SpinWait::new(Duration::from_millis(500), u32::MAX));
        let cell = Arc::new(AtomicI32::new(0));

        let (sw2, cell2) = (sw.clone(), cell.clone());
        let handle = thread::spawn(move || sw2.wait(&cell2, 0, Some(Duration::from_secs(2))));

        thread::sleep(Duration::from_millis(10));
        cell.store(1, Ordering::SeqCst);
        sw.wake(&cell, usize::MAX);

        assert_eq!(handle.join().unwrap(), WaitOutcome::Ok);
    }
}
