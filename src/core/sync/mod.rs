/*!
 * Synchronization Primitives
 *
 * Constructs built over slots of a `SharedRegion`:
 * - Wait strategies (futex parking, adaptive spinwait)
 * - Locks: spinlock, blocking wait-lock, reader/writer lock, counting semaphore
 * - Rendezvous: barrier/phaser, exchanger
 *
 * # Architecture
 *
 * Every primitive reserves its slots from a region handed to it at
 * construction time and touches them only through the region's atomic
 * operations. Handles are cheap clones, so each worker gets its own copy
 * of the primitive pointing at the same slots.
 */

pub mod locks;
pub mod rendezvous;
pub mod wait;

pub use locks::{
    RwLock, RwLockReadGuard, RwLockWriteGuard, Semaphore, SemaphorePermit, SpinStats, Spinlock,
    SpinlockGuard, WaitLock, WaitLockGuard,
};
pub use rendezvous::{Barrier, Exchanger};
pub use wait::{StrategyType, SyncConfig, WaitOutcome, WaitStrategy, WakeResult};

use std::cell::Cell;
use std::sync::atomic::{AtomicI32, Ordering};

/// Nonzero per-thread token stored in lock words to identify the holder
pub(crate) fn holder_token() -> i32 {
    static NEXT: AtomicI32 = AtomicI32::new(1);
    thread_local! {
        static TOKEN: Cell<i32> = const { Cell::new(0) };
    }

    TOKEN.with(|token| {
        if token.get() == 0 {
            let mut next = NEXT.fetch_add(1, Ordering::Relaxed);
            if next <= 0 {
                // Wrapped after 2^31 threads; reserve 0 for "free"
                next = (next & i32::MAX).max(1);
            }
            token.set(next);
        }
        token.get()
    })
}
