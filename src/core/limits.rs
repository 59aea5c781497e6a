/*!
 * System Limits and Constants
 *
 * Centralized location for coordination-wide limits, thresholds, and defaults.
 * Organized by domain for maintainability and discoverability.
 *
 * - Performance-critical constants are marked with [PERF]
 */

use std::time::Duration;

// =============================================================================
// SHARED REGION LIMITS
// =============================================================================

/// Maximum slots in a single shared region (1M slots = 4MB)
pub const MAX_REGION_SLOTS: usize = 1024 * 1024;

/// Default region size used by the demo binary and convenience constructors
pub const DEFAULT_REGION_SLOTS: usize = 64;

// =============================================================================
// WAIT / SPIN TUNING
// =============================================================================

/// Spin duration before parking in the adaptive strategy
/// [PERF] Covers the typical uncontended handoff latency
pub const DEFAULT_SPIN_DURATION: Duration = Duration::from_micros(10);

/// Maximum spin iterations before parking
pub const DEFAULT_MAX_SPINS: u32 = 100;

/// Spinlock yields to the OS scheduler every N failed attempts
/// [PERF] Keeps oversubscribed test machines from burning whole quanta
pub const SPINLOCK_YIELD_INTERVAL: u64 = 64;

// =============================================================================
// CHANNEL LIMITS
// =============================================================================

/// Default buffered channel capacity
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Maximum channel capacity; channels are always bounded
pub const MAX_CHANNEL_CAPACITY: usize = 1_000_000;

// =============================================================================
// SCHEDULER LIMITS
// =============================================================================

/// Default worker count for schedulers and worker groups
pub const DEFAULT_WORKERS: usize = 4;

/// Maximum workers per scheduler
pub const MAX_WORKERS: usize = 256;

/// Default priority queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Idle worker park timeout; bounds the latency of missed wakeups
pub const IDLE_PARK_TIMEOUT: Duration = Duration::from_millis(10);

// =============================================================================
// FLOW CONTROL DEFAULTS
// =============================================================================

/// Circuit breaker: consecutive failures before opening
pub const DEFAULT_BREAKER_THRESHOLD: u32 = 5;

/// Circuit breaker: cool-down before half-open trial
pub const DEFAULT_BREAKER_COOLDOWN: Duration = Duration::from_secs(5);

/// Retry handler: retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Retry handler: base delay between attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Retry handler: upper bound on any single delay
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Rate limiter defaults
pub const DEFAULT_RATE_LIMIT: usize = 100;
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_millis(1000);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_are_consistent() {
        assert!(DEFAULT_REGION_SLOTS <= MAX_REGION_SLOTS);
        assert!(DEFAULT_CHANNEL_CAPACITY <= MAX_CHANNEL_CAPACITY);
        assert!(DEFAULT_WORKERS <= MAX_WORKERS);
        assert!(DEFAULT_RETRY_DELAY <= MAX_RETRY_DELAY);
    }
}
