/*!
 * Exchanger
 *
 * Two-party rendezvous swapping one value each way. A single state slot
 * serializes the pairing; payloads travel through their own locked cells
 * since region slots only carry integers.
 *
 * State machine:
 * EMPTY -> BUSY (first party publishing) -> WAITING
 * WAITING -> BUSY (second party claiming) -> CLAIMED -> EMPTY (first party collects)
 * WAITING -> BUSY (first party withdrawing on timeout) -> EMPTY
 *
 * Any party observing BUSY or CLAIMED is a third party and waits for EMPTY.
 */

use crate::core::errors::SyncError;
use crate::core::types::SlotIndex;
use crate::memory::SharedRegion;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

const EMPTY: i32 = 0;
const WAITING: i32 = 1;
const CLAIMED: i32 = 2;
const BUSY: i32 = 3;

struct Cells<T> {
    offer: Mutex<Option<T>>,
    reply: Mutex<Option<T>>,
}

/// Pairwise value exchange point
pub struct Exchanger<T> {
    region: SharedRegion,
    state: SlotIndex,
    cells: Arc<Cells<T>>,
}

impl<T> Clone for Exchanger<T> {
    fn clone(&self) -> Self {
        Self {
            region: self.region.clone(),
            state: self.state,
            cells: Arc::clone(&self.cells),
        }
    }
}

impl<T: Send> Exchanger<T> {
    pub fn new(region: &SharedRegion) -> Result<Self, SyncError> {
        let state = region.reserve(1)?;
        region.store(state, EMPTY)?;
        debug!(region = %region.id(), slot = state, "Exchanger created");

        Ok(Self {
            region: region.clone(),
            state,
            cells: Arc::new(Cells {
                offer: Mutex::new(None),
                reply: Mutex::new(None),
            }),
        })
    }

    /// Swap `value` with a counterpart, waiting up to `timeout`
    ///
    /// On timeout the offer is withdrawn and `value` is dropped; the caller
    /// never receives a stale value.
    pub fn exchange(&self, value: T, timeout: Option<Duration>) -> Result<T, SyncError> {
        let start = Instant::now();
        let mut value = Some(value);

        loop {
            match self.region.load(self.state)? {
                EMPTY => {
                    if self.region.compare_and_swap(self.state, EMPTY, BUSY)? != EMPTY {
                        continue;
                    }
                    *self.cells.offer.lock() = value.take();
                    self.region.store(self.state, WAITING)?;
                    self.region.notify_all(self.state)?;
                    trace!(slot = self.state, "Exchange offer published");
                    return self.await_reply(start, timeout);
                }
                WAITING => {
                    if self.region.compare_and_swap(self.state, WAITING, BUSY)? != WAITING {
                        continue;
                    }
                    let theirs = self.cells.offer.lock().take();
                    *self.cells.reply.lock() = value.take();
                    self.region.store(self.state, CLAIMED)?;
                    self.region.notify_all(self.state)?;
                    trace!(slot = self.state, "Exchange offer claimed");
                    return theirs.ok_or_else(missing_payload);
                }
                busy => {
                    let remaining = remaining(start, timeout)?;
                    self.region.wait(self.state, busy, remaining)?;
                }
            }
        }
    }

    fn await_reply(&self, start: Instant, timeout: Option<Duration>) -> Result<T, SyncError> {
        loop {
            match self.region.load(self.state)? {
                CLAIMED => {
                    let theirs = self.cells.reply.lock().take();
                    self.region.store(self.state, EMPTY)?;
                    self.region.notify_all(self.state)?;
                    return theirs.ok_or_else(missing_payload);
                }
                WAITING => match remaining(start, timeout) {
                    Ok(remaining) => {
                        self.region.wait(self.state, WAITING, remaining)?;
                    }
                    Err(err) => {
                        // A counterpart may claim concurrently; only withdraw if we win
                        if self.region.compare_and_swap(self.state, WAITING, BUSY)? == WAITING {
                            self.cells.offer.lock().take();
                            self.region.store(self.state, EMPTY)?;
                            self.region.notify_all(self.state)?;
                            debug!(slot = self.state, "Exchange offer withdrawn on timeout");
                            return Err(err);
                        }
                    }
                },
                // Counterpart is mid-claim, the reply is imminent
                other => {
                    self.region.wait(self.state, other, None)?;
                }
            }
        }
    }

    /// Whether a party is currently waiting for a counterpart
    pub fn has_waiter(&self) -> bool {
        self.region.load(self.state).map_or(false, |s| s == WAITING)
    }
}

fn remaining(start: Instant, timeout: Option<Duration>) -> Result<Option<Duration>, SyncError> {
    match timeout {
        Some(t) => {
            let elapsed = start.elapsed();
            if elapsed >= t {
                Err(SyncError::timeout(elapsed, t))
            } else {
                Ok(Some(t - elapsed))
            }
        }
        None => Ok(None),
    }
}

fn missing_payload() -> SyncError {
    SyncError::InvalidArgument("exchange payload missing".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_two_parties_swap() {
        let region = SharedRegion::new(1).unwrap();
        let exchanger = Exchanger::new(&region).unwrap();

        let other = exchanger.clone();
        let handle = thread::spawn(move || other.exchange("b", Some(Duration::from_secs(5))));

        let got = exchanger.exchange("a", Some(Duration::from_secs(5))).unwrap();
        assert_eq!(got, "b");
        assert_eq!(handle.join().unwrap().unwrap(), "a");
        assert!(!exchanger.has_waiter());
    }

    #[test]
    fn test_lonely_exchange_times_out() {
        let region = SharedRegion::new(1).unwrap();
        let exchanger = Exchanger::new(&region).unwrap();

        let err = exchanger
            .exchange(7u32, Some(Duration::from_millis(30)))
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(!exchanger.has_waiter());

        // Slot is reusable after a withdrawal
        let other = exchanger.clone();
        let handle = thread::spawn(move || other.exchange(2u32, Some(Duration::from_secs(5))));
        assert_eq!(exchanger.exchange(1, Some(Duration::from_secs(5))).unwrap(), 2);
        assert_eq!(handle.join().unwrap().unwrap(), 1);
    }

    #[test]
    fn test_many_parties_pair_off() {
        let region = SharedRegion::new(1).unwrap();
        let exchanger = Exchanger::new(&region).unwrap();

        let handles: Vec<_> = (0..8u32)
            .map(|i| {
                let ex = exchanger.clone();
                thread::spawn(move || (i, ex.exchange(i, Some(Duration::from_secs(10))).unwrap()))
            })
            .collect();

        let mut pairs: Vec<(u32, u32)> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        pairs.sort();

        for &(mine, theirs) in &pairs {
            assert_ne!(mine, theirs);
            // The counterpart must have received exactly our value
            let back = pairs.iter().find(|(m, _)| *m == theirs).unwrap().1;
            assert_eq!(back, mine);
        }
    }
}
