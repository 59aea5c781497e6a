/*!
 * Wait/Notify Primitives
 *
 * Wait/notify on a single atomic slot with two strategies:
 * - Futex-based parking (blocking, default)
 * - Spinwait-based (low-latency, high-CPU), parking after a spin budget
 */

mod config;
mod futex;
mod spinwait;
mod traits;

// Re-export public API
pub use config::{StrategyType, SyncConfig};
pub use traits::{WaitOutcome, WaitStrategy, WakeResult};

// Re-export specific strategies for advanced users
pub use futex::FutexWait;
pub use spinwait::SpinWait;
