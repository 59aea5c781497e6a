/*!
 * Lock Primitives
 * Spinning and blocking mutual exclusion, shared reads and counting permits
 */

mod rw_lock;
mod semaphore;
mod spinlock;
mod wait_lock;

pub use rw_lock::{RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use semaphore::{Semaphore, SemaphorePermit};
pub use spinlock::{SpinStats, Spinlock, SpinlockGuard};
pub use wait_lock::{WaitLock, WaitLockGuard};
