/*!
 * Barrier (Phaser)
 *
 * N-party rendezvous that advances a phase counter once every registered
 * party has arrived. Registration changes go to a next-phase party count
 * that the last arriver copies over at turnover, so they only ever affect
 * the next phase. That count is a single slot changed by compare-and-swap
 * and never drops below one.
 *
 * Arrivals are counted in a word that also carries a generation tag, so an
 * arrival prepared in one phase can never be counted into a later one.
 * Turnover order is fixed: copy the party count, publish the new phase,
 * then open the next generation with a zero count. An arrival that observes
 * a full count is racing the turnover and waits for the next generation.
 */

use crate::core::errors::SyncError;
use crate::core::types::{Phase, SlotIndex};
use crate::memory::SharedRegion;
use tracing::{debug, trace, warn};

// Slot layout relative to the reserved base
const STATE: usize = 0;
const PARTIES: usize = 1;
const PHASE: usize = 2;
const NEXT_PARTIES: usize = 3;

// Arrival word: generation in the high bits, arrived count in the low 16
const COUNT_BITS: u32 = 16;
const COUNT_MASK: i32 = (1 << COUNT_BITS) - 1;
const GENERATION_MASK: i32 = 0x7FFF;

/// Most parties a barrier can hold
pub const MAX_PARTIES: i32 = COUNT_MASK;

fn pack(generation: i32, count: i32) -> i32 {
    ((generation & GENERATION_MASK) << COUNT_BITS) | (count & COUNT_MASK)
}

fn generation(state: i32) -> i32 {
    (state >> COUNT_BITS) & GENERATION_MASK
}

fn count(state: i32) -> i32 {
    state & COUNT_MASK
}

/// Reusable phase barrier over four region slots
#[derive(Clone, Debug)]
pub struct Barrier {
    region: SharedRegion,
    base: SlotIndex,
}

impl Barrier {
    pub fn new(region: &SharedRegion, parties: i32) -> Result<Self, SyncError> {
        if parties < 1 {
            return Err(SyncError::NoParties);
        }
        if parties > MAX_PARTIES {
            return Err(SyncError::InvalidArgument(format!(
                "barrier holds at most {} parties, got {}",
                MAX_PARTIES, parties
            )));
        }

        let base = region.reserve(4)?;
        region.store(base + STATE, pack(0, 0))?;
        region.store(base + PARTIES, parties)?;
        region.store(base + PHASE, 0)?;
        region.store(base + NEXT_PARTIES, parties)?;

        debug!(region = %region.id(), base, parties, "Barrier created");

        Ok(Self {
            region: region.clone(),
            base,
        })
    }

    /// Arrive and block until every party of this phase has arrived
    ///
    /// Returns the phase number that starts once this phase completes; all
    /// parties of the phase observe the same value.
    pub fn arrive(&self) -> Result<Phase, SyncError> {
        let state_slot = self.base + STATE;

        loop {
            let state = self.region.load(state_slot)?;
            let parties = self.region.load(self.base + PARTIES)?;
            let phase = self.region.load(self.base + PHASE)?;

            // Turnover happened between the reads, start over
            if self.region.load(state_slot)? != state {
                continue;
            }

            let arrived = count(state);
            if arrived >= parties {
                trace!(base = self.base, phase, "Arrival raced turnover, waiting for next generation");
                self.region.wait(state_slot, state, None)?;
                continue;
            }

            let current = generation(state);
            if self.region.compare_and_swap(state_slot, state, pack(current, arrived + 1))? != state {
                continue;
            }

            if arrived + 1 == parties {
                return self.advance(current, phase);
            }

            loop {
                let now = self.region.load(state_slot)?;
                if generation(now) != current {
                    break;
                }
                self.region.wait(state_slot, now, None)?;
            }
            return Ok(phase.wrapping_add(1));
        }
    }

    /// Last-arriver turnover
    fn advance(&self, current: i32, phase: Phase) -> Result<Phase, SyncError> {
        let next_parties = self.region.load(self.base + NEXT_PARTIES)?;
        let parties = self.region.exchange(self.base + PARTIES, next_parties)?;
        if parties != next_parties {
            debug!(base = self.base, from = parties, to = next_parties, "Barrier party count changed");
        }

        let next = phase.wrapping_add(1);
        self.region.store(self.base + PHASE, next)?;
        self.region.store(self.base + STATE, pack(current.wrapping_add(1), 0))?;

        let woken = self.region.notify_all(self.base + STATE)?;
        trace!(base = self.base, phase = next, woken, "Barrier phase advanced");
        Ok(next)
    }

    /// Add one party starting with the next phase
    pub fn register(&self) -> Result<(), SyncError> {
        let slot = self.base + NEXT_PARTIES;
        loop {
            let next = self.region.load(slot)?;
            if next >= MAX_PARTIES {
                return Err(SyncError::InvalidArgument(format!(
                    "barrier holds at most {} parties",
                    MAX_PARTIES
                )));
            }
            if self.region.compare_and_swap(slot, next, next + 1)? == next {
                return Ok(());
            }
        }
    }

    /// Remove one party starting with the next phase
    pub fn deregister(&self) -> Result<(), SyncError> {
        let slot = self.base + NEXT_PARTIES;
        loop {
            let next = self.region.load(slot)?;
            if next <= 1 {
                warn!(base = self.base, next, "Deregister would leave no parties");
                return Err(SyncError::NoParties);
            }
            if self.region.compare_and_swap(slot, next, next - 1)? == next {
                return Ok(());
            }
        }
    }

    pub fn phase(&self) -> Phase {
        self.region.load(self.base + PHASE).unwrap_or(0)
    }

    /// Parties expected in the current phase
    pub fn parties(&self) -> i32 {
        self.region.load(self.base + PARTIES).unwrap_or(0)
    }

    /// Parties the next phase will expect, given registrations so far
    pub fn next_parties(&self) -> i32 {
        self.region.load(self.base + NEXT_PARTIES).unwrap_or(0)
    }

    pub fn arrived(&self) -> i32 {
        self.region.load(self.base + STATE).map_or(0, count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_single_party_advances_immediately() {
        let region = SharedRegion::new(4).unwrap();
        let barrier = Barrier::new(&region, 1).unwrap();
        assert_eq!(barrier.arrive().unwrap(), 1);
        assert_eq!(barrier.arrive().unwrap(), 2);
        assert_eq!(barrier.arrived(), 0);
    }

    #[test]
    fn test_zero_parties_rejected() {
        let region = SharedRegion::new(4).unwrap();
        assert_eq!(Barrier::new(&region, 0).unwrap_err(), SyncError::NoParties);
    }

    #[test]
    fn test_parties_block_until_last_arrives() {
        let region = SharedRegion::new(4).unwrap();
        let barrier = Barrier::new(&region, 2).unwrap();

        let other = barrier.clone();
        let handle = thread::spawn(move || other.arrive().unwrap());

        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());
        assert_eq!(barrier.arrived(), 1);

        assert_eq!(barrier.arrive().unwrap(), 1);
        assert_eq!(handle.join().unwrap(), 1);
    }

    #[test]
    fn test_rounds_advance_phase_exactly() {
        const PARTIES: i32 = 4;
        const ROUNDS: i32 = 25;

        let region = SharedRegion::new(4).unwrap();
        let barrier = Barrier::new(&region, PARTIES).unwrap();
        let in_round = Arc::new(AtomicI32::new(0));

        let handles: Vec<_> = (0..PARTIES)
            .map(|_| {
                let barrier = barrier.clone();
                let in_round = in_round.clone();
                thread::spawn(move || {
                    for round in 0..ROUNDS {
                        in_round.fetch_add(1, Ordering::SeqCst);
                        let phase = barrier.arrive().unwrap();
                        assert_eq!(phase, round + 1);
                        // Nobody can be more than one round ahead
                        let seen = in_round.load(Ordering::SeqCst);
                        assert!(seen >= (round + 1) * PARTIES);
                        assert!(seen <= (round + 2) * PARTIES);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(barrier.phase(), ROUNDS);
    }

    #[test]
    fn test_registration_applies_next_phase() {
        let region = SharedRegion::new(4).unwrap();
        let barrier = Barrier::new(&region, 1).unwrap();

        barrier.register().unwrap();
        assert_eq!(barrier.parties(), 1);
        assert_eq!(barrier.next_parties(), 2);

        // Still a single-party phase
        assert_eq!(barrier.arrive().unwrap(), 1);
        assert_eq!(barrier.parties(), 2);

        barrier.deregister().unwrap();
        assert_eq!(barrier.deregister().unwrap_err(), SyncError::NoParties);

        let other = barrier.clone();
        let handle = thread::spawn(move || other.arrive().unwrap());
        assert_eq!(barrier.arrive().unwrap(), 2);
        assert_eq!(handle.join().unwrap(), 2);
        assert_eq!(barrier.parties(), 1);
    }

    #[test]
    fn test_party_limit() {
        let region = SharedRegion::new(4).unwrap();
        assert!(Barrier::new(&region, MAX_PARTIES + 1).is_err());
    }

    #[test]
    fn test_party_churn_racing_turnover() {
        const PUMPS: usize = 4;
        const CHURNERS: usize = 3;

        let region = SharedRegion::new(4).unwrap();
        let barrier = Barrier::new(&region, 1).unwrap();
        let done = Arc::new(AtomicBool::new(false));

        // More arrivers than any phase the churn can produce, so phases keep turning
        let pumps: Vec<_> = (0..PUMPS)
            .map(|_| {
                let (barrier, done) = (barrier.clone(), done.clone());
                thread::spawn(move || {
                    while !done.load(Ordering::SeqCst) {
                        barrier.arrive().unwrap();
                        assert!(barrier.parties() >= 1);
                    }
                })
            })
            .collect();

        // Each churner holds at most one extra registration at a time
        let churners: Vec<_> = (0..CHURNERS)
            .map(|_| {
                let barrier = barrier.clone();
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        barrier.register().unwrap();
                        barrier.deregister().unwrap();
                        assert!(barrier.next_parties() >= 1);
                    }
                })
            })
            .collect();
        for churner in churners {
            churner.join().unwrap();
        }
        done.store(true, Ordering::SeqCst);
        assert_eq!(barrier.next_parties(), 1);
        assert_eq!(barrier.deregister(), Err(SyncError::NoParties));

        // Pumps may be parked in a multi-party phase; add arrivals until
        // single-party phases resume and everyone has left
        let mut helpers = Vec::new();
        while pumps.iter().any(|p| !p.is_finished()) || barrier.arrived() != 0 || barrier.parties() != 1 {
            let barrier = barrier.clone();
            helpers.push(thread::spawn(move || {
                barrier.arrive().unwrap();
            }));
            thread::sleep(Duration::from_millis(1));
        }
        for handle in pumps.into_iter().chain(helpers) {
            handle.join().unwrap();
        }
        assert_eq!(barrier.parties(), 1);
    }
}
