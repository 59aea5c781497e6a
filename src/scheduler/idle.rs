/*!
 * Outstanding Work Tracking
 *
 * Counts tasks submitted but not yet finished in a region slot so that
 * `wait_idle` is a plain `wait` on that slot. Finishing the last task
 * notifies every idle waiter.
 */

use crate::core::errors::SchedulerError;
use crate::core::types::SlotIndex;
use crate::memory::SharedRegion;
use std::time::{Duration, Instant};

pub(crate) struct IdleTracker {
    region: SharedRegion,
    slot: SlotIndex,
    limit: i32,
}

impl IdleTracker {
    pub fn new(region: &SharedRegion, limit: usize) -> Result<Self, SchedulerError> {
        let slot = region.reserve(1)?;
        region.store(slot, 0)?;
        Ok(Self {
            region: region.clone(),
            slot,
            limit: i32::try_from(limit).unwrap_or(i32::MAX),
        })
    }

    /// Count one more task, failing with `QueueFull` at the limit
    pub fn begin(&self) -> Result<(), SchedulerError> {
        loop {
            let current = self.region.load(self.slot)?;
            if current >= self.limit {
                return Err(SchedulerError::QueueFull(self.limit as usize));
            }
            if self.region.compare_and_swap(self.slot, current, current + 1)? == current {
                return Ok(());
            }
        }
    }

    /// Count one more task, parking while at the limit
    pub fn begin_blocking(&self) -> Result<(), SchedulerError> {
        loop {
            match self.begin() {
                Err(SchedulerError::QueueFull(_)) => {
                    self.region.wait(self.slot, self.limit, None)?;
                }
                other => return other,
            }
        }
    }

    pub fn finish(&self) -> Result<(), SchedulerError> {
        let previous = self.region.sub(self.slot, 1)?;
        // Wake idle waiters on reaching zero, blocked submitters on leaving the limit
        if previous == 1 || previous == self.limit {
            self.region.notify_all(self.slot)?;
        }
        Ok(())
    }

    pub fn outstanding(&self) -> usize {
        self.region.load(self.slot).map_or(0, |n| n.max(0) as usize)
    }

    /// Block until no task is outstanding
    pub fn wait_idle(&self, timeout: Option<Duration>) -> Result<(), SchedulerError> {
        let start = Instant::now();
        loop {
            let current = self.region.load(self.slot)?;
            if current <= 0 {
                return Ok(());
            }

            let remaining = match timeout {
                Some(t) => {
                    let elapsed = start.elapsed();
                    if elapsed >= t {
                        return Err(SchedulerError::Timeout {
                            elapsed_ms: elapsed.as_millis() as u64,
                        });
                    }
                    Some(t - elapsed)
                }
                None => None,
            };

            self.region.wait(self.slot, current, remaining)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_limit_and_idle() {
        let region = SharedRegion::new(1).unwrap();
        let tracker = IdleTracker::new(&region, 2).unwrap();

        tracker.begin().unwrap();
        tracker.begin().unwrap();
        assert_eq!(tracker.begin().unwrap_err(), SchedulerError::QueueFull(2));
        assert_eq!(tracker.outstanding(), 2);

        assert!(matches!(
            tracker.wait_idle(Some(Duration::from_millis(10))),
            Err(SchedulerError::Timeout { .. })
        ));

        let finisher = {
            let region = region.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                region.sub(0, 1).unwrap();
                region.sub(0, 1).unwrap();
                region.notify_all(0).unwrap();
            })
        };
        tracker.wait_idle(Some(Duration::from_secs(5))).unwrap();
        finisher.join().unwrap();
        assert_eq!(tracker.outstanding(), 0);
    }
}
