/*!
 * Flow Control
 * Admission, failure isolation, retry and resource bounding for worker calls
 */

mod circuit_breaker;
mod pool;
mod rate_limiter;
mod retry;

pub use circuit_breaker::{BreakerConfig, BreakerError, BreakerState, CircuitBreaker};
pub use pool::{BoundedPool, ExhaustedPolicy, PoolConfig, PooledResource};
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use retry::{Backoff, RetryError, RetryPolicy};
