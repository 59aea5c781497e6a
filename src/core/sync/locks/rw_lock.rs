/*!
 * Reader/Writer Lock
 *
 * Lock word: 0 free, N > 0 held by N readers, -1 held by one writer.
 * A separate slot counts waiting writers; readers do not enter while it is
 * nonzero, so a steady stream of readers cannot starve a writer.
 *
 * Readers blocked behind waiting writers park on the waiting-writers slot,
 * readers blocked behind an active writer park on the lock word. Every
 * change to either slot that could admit a reader is followed by a
 * `notify_all` on that slot.
 */

use crate::core::errors::SyncError;
use crate::core::sync::holder_token;
use crate::core::types::SlotIndex;
use crate::memory::SharedRegion;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const FREE: i32 = 0;
const WRITER: i32 = -1;

// Slot layout relative to the reserved base
const STATE: usize = 0;
const WAITING_WRITERS: usize = 1;
const OWNER: usize = 2;
const PEAK_READERS: usize = 3;

fn remaining(start: Instant, timeout: Option<Duration>) -> Result<Option<Duration>, SyncError> {
    match timeout {
        Some(t) => {
            let elapsed = start.elapsed();
            if elapsed >= t {
                return Err(SyncError::timeout(elapsed, t));
            }
            Ok(Some(t - elapsed))
        }
        None => Ok(None),
    }
}

/// Writer-preferring reader/writer lock over region slots
#[derive(Clone)]
pub struct RwLock {
    region: SharedRegion,
    base: SlotIndex,
}

impl RwLock {
    pub fn new(region: &SharedRegion) -> Result<Self, SyncError> {
        let base = region.reserve(4)?;
        for offset in [STATE, WAITING_WRITERS, OWNER, PEAK_READERS] {
            region.store(base + offset, 0)?;
        }
        debug!(region = %region.id(), base, "Reader/writer lock created");
        Ok(Self {
            region: region.clone(),
            base,
        })
    }

    /// Enter as a reader if no writer holds or waits for the lock
    pub fn try_read(&self) -> Result<bool, SyncError> {
        let state = self.base + STATE;
        loop {
            let current = self.region.load(state)?;
            if current < FREE || self.region.load(self.base + WAITING_WRITERS)? > 0 {
                return Ok(false);
            }
            if self.region.compare_and_swap(state, current, current + 1)? == current {
                self.track_readers(current + 1)?;
                return Ok(true);
            }
        }
    }

    /// Enter as a reader, blocking up to `timeout` (forever if `None`)
    pub fn read(&self, timeout: Option<Duration>) -> Result<(), SyncError> {
        let state = self.base + STATE;
        let waiting = self.base + WAITING_WRITERS;
        let start = Instant::now();
        loop {
            let current = self.region.load(state)?;
            let writers = self.region.load(waiting)?;

            if current >= FREE && writers == 0 {
                if self.region.compare_and_swap(state, current, current + 1)? == current {
                    self.track_readers(current + 1)?;
                    return Ok(());
                }
                continue;
            }

            let remaining = remaining(start, timeout)?;
            if writers > 0 {
                self.region.wait(waiting, writers, remaining)?;
            } else {
                self.region.wait(state, current, remaining)?;
            }
        }
    }

    /// Leave as a reader; the last reader out wakes waiting writers
    pub fn read_release(&self) -> Result<(), SyncError> {
        let state = self.base + STATE;
        loop {
            let current = self.region.load(state)?;
            if current <= FREE {
                return Err(SyncError::NotHeld);
            }
            if self.region.compare_and_swap(state, current, current - 1)? == current {
                if current == 1 {
                    self.region.notify_all(state)?;
                }
                return Ok(());
            }
        }
    }

    pub fn try_write(&self) -> Result<bool, SyncError> {
        let token = self.check_not_writer()?;
        if self.region.compare_and_swap(self.base + STATE, FREE, WRITER)? == FREE {
            self.region.store(self.base + OWNER, token)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Enter as the writer, blocking up to `timeout` (forever if `None`)
    ///
    /// While blocked the caller counts as a waiting writer, which holds off
    /// new readers.
    pub fn write(&self, timeout: Option<Duration>) -> Result<(), SyncError> {
        let token = self.check_not_writer()?;
        let state = self.base + STATE;
        let start = Instant::now();

        self.region.add(self.base + WAITING_WRITERS, 1)?;
        let result = loop {
            let current = self.region.compare_and_swap(state, FREE, WRITER)?;
            if current == FREE {
                break Ok(());
            }
            match remaining(start, timeout) {
                Ok(remaining) => {
                    if let Err(e) = self.region.wait(state, current, remaining) {
                        break Err(e.into());
                    }
                }
                Err(e) => break Err(e),
            }
        };
        self.leave_waiting_writers()?;

        result?;
        self.region.store(self.base + OWNER, token)?;
        Ok(())
    }

    fn leave_waiting_writers(&self) -> Result<(), SyncError> {
        let waiting = self.base + WAITING_WRITERS;
        if self.region.sub(waiting, 1)? == 1 {
            self.region.notify_all(waiting)?;
        }
        Ok(())
    }

    fn check_not_writer(&self) -> Result<i32, SyncError> {
        let token = holder_token();
        if self.region.load(self.base + OWNER)? == token {
            warn!(slot = self.base, "Reentrant write acquire rejected");
            return Err(SyncError::Reentrant);
        }
        Ok(token)
    }

    /// Leave as the writer and wake everyone parked on the lock word
    pub fn write_release(&self) -> Result<(), SyncError> {
        if self.region.load(self.base + OWNER)? != holder_token() {
            return Err(SyncError::NotHeld);
        }
        self.region.store(self.base + OWNER, 0)?;
        self.region.store(self.base + STATE, FREE)?;
        self.region.notify_all(self.base + STATE)?;
        Ok(())
    }

    pub fn read_guard(&self, timeout: Option<Duration>) -> Result<RwLockReadGuard<'_>, SyncError> {
        self.read(timeout)?;
        Ok(RwLockReadGuard { lock: self })
    }

    pub fn write_guard(&self, timeout: Option<Duration>) -> Result<RwLockWriteGuard<'_>, SyncError> {
        self.write(timeout)?;
        Ok(RwLockWriteGuard { lock: self })
    }

    fn track_readers(&self, readers: i32) -> Result<(), SyncError> {
        let peak = self.base + PEAK_READERS;
        loop {
            let current = self.region.load(peak)?;
            if readers <= current || self.region.compare_and_swap(peak, current, readers)? == current {
                return Ok(());
            }
        }
    }

    /// Readers currently inside
    pub fn readers(&self) -> usize {
        self.region
            .load(self.base + STATE)
            .map_or(0, |v| v.max(0) as usize)
    }

    pub fn is_write_locked(&self) -> bool {
        self.region
            .load(self.base + STATE)
            .map_or(false, |v| v == WRITER)
    }

    pub fn waiting_writers(&self) -> usize {
        self.region
            .load(self.base + WAITING_WRITERS)
            .map_or(0, |v| v.max(0) as usize)
    }

    /// Most readers ever inside at once
    pub fn peak_readers(&self) -> usize {
        self.region
            .load(self.base + PEAK_READERS)
            .map_or(0, |v| v.max(0) as usize)
    }
}

pub struct RwLockReadGuard<'a> {
    lock: &'a RwLock,
}

impl Drop for RwLockReadGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.read_release() {
            warn!(error = %e, "Read guard release failed");
        }
    }
}

pub struct RwLockWriteGuard<'a> {
    lock: &'a RwLock,
}

impl Drop for RwLockWriteGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.write_release() {
            warn!(error = %e, "Write guard release failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::thread;

    fn lock() -> RwLock {
        RwLock::new(&SharedRegion::new(4).unwrap()).unwrap()
    }

    #[test]
    fn test_readers_share() {
        let lock = lock();
        let a = lock.read_guard(None).unwrap();
        let b = lock.read_guard(None).unwrap();
        assert_eq!(lock.readers(), 2);
        assert!(!lock.try_write().unwrap());
        drop((a, b));
        assert_eq!(lock.peak_readers(), 2);
        assert!(lock.try_write().unwrap());
        assert!(lock.is_write_locked());
    }

    #[test]
    fn test_writer_excludes_readers() {
        let lock = lock();
        lock.write(None).unwrap();
        assert!(!lock.try_read().unwrap());
        assert_eq!(lock.write(None).unwrap_err(), SyncError::Reentrant);

        let other = lock.clone();
        let err = thread::spawn(move || other.read(Some(Duration::from_millis(20))))
            .join()
            .unwrap()
            .unwrap_err();
        assert!(err.is_timeout());

        lock.write_release().unwrap();
        assert!(lock.try_read().unwrap());
    }

    #[test]
    fn test_waiting_writer_holds_off_new_readers() {
        let lock = lock();
        lock.read(None).unwrap();

        let writer = {
            let lock = lock.clone();
            thread::spawn(move || {
                lock.write(None).unwrap();
                lock.write_release().unwrap();
            })
        };
        while lock.waiting_writers() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!lock.try_read().unwrap());

        lock.read_release().unwrap();
        writer.join().unwrap();
        assert_eq!(lock.waiting_writers(), 0);
        assert!(lock.try_read().unwrap());
    }

    #[test]
    fn test_timed_out_writer_releases_blocked_readers() {
        let lock = lock();
        lock.read(None).unwrap();

        let writer = {
            let lock = lock.clone();
            thread::spawn(move || lock.write(Some(Duration::from_millis(40))))
        };
        while lock.waiting_writers() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        let reader = {
            let lock = lock.clone();
            thread::spawn(move || lock.read(Some(Duration::from_secs(5))))
        };

        assert!(writer.join().unwrap().unwrap_err().is_timeout());
        reader.join().unwrap().unwrap();
        assert_eq!(lock.readers(), 2);
    }

    #[test]
    fn test_release_without_hold() {
        let lock = lock();
        assert_eq!(lock.read_release().unwrap_err(), SyncError::NotHeld);
        assert_eq!(lock.write_release().unwrap_err(), SyncError::NotHeld);
    }
}
