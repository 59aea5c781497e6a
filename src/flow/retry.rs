/*!
 * Retry Handler
 * Re-runs a fallible operation with fixed, linear or exponential backoff
 */

use crate::core::limits::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY, MAX_RETRY_DELAY};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Growth of the delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// `base` every time
    Fixed,
    /// `base * k`
    Linear,
    /// `base * 2^(k-1)`
    #[default]
    Exponential,
}

/// Operation failed on every allowed attempt
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Gave up after {attempts} attempts: {last}")]
pub struct RetryError<E> {
    pub attempts: u32,
    pub last: E,
}

#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub base_delay: Duration,
    pub backoff: Backoff,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_RETRY_DELAY,
            backoff: Backoff::Exponential,
            max_delay: MAX_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, backoff: Backoff) -> Self {
        Self {
            max_retries,
            base_delay,
            backoff,
            ..Default::default()
        }
    }

    /// Delay before retry `k` (1-based), capped at `max_delay`
    pub fn delay_for(&self, k: u32) -> Duration {
        let k = k.max(1);
        let delay = match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Linear => self.base_delay.saturating_mul(k),
            Backoff::Exponential => {
                let factor = 1u32.checked_shl(k - 1).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
        };
        delay.min(self.max_delay)
    }

    /// Run `op` until it succeeds or retries run out
    ///
    /// `op` receives the 1-based attempt number.
    pub fn retry<T, E, F>(&self, op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Result<T, E>,
    {
        self.retry_if(op, |_| true)
    }

    /// Like `retry`, but stops early on errors `is_retryable` rejects
    pub fn retry_if<T, E, F, P>(&self, mut op: F, is_retryable: P) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Result<T, E>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt > self.max_retries || !is_retryable(&err) {
                        return Err(RetryError {
                            attempts: attempt,
                            last: err,
                        });
                    }
                    let delay = self.delay_for(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying after failure");
                    thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_delay_schedules() {
        let base = Duration::from_millis(100);
        let fixed = RetryPolicy::new(3, base, Backoff::Fixed);
        let linear = RetryPolicy::new(3, base, Backoff::Linear);
        let expo = RetryPolicy::new(3, base, Backoff::Exponential);

        let ms = |p: &RetryPolicy| (1..=4).map(|k| p.delay_for(k).as_millis()).collect::<Vec<_>>();
        assert_eq!(ms(&fixed), vec![100, 100, 100, 100]);
        assert_eq!(ms(&linear), vec![100, 200, 300, 400]);
        assert_eq!(ms(&expo), vec![100, 200, 400, 800]);
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(1),
            ..RetryPolicy::new(100, Duration::from_millis(100), Backoff::Exponential)
        };
        assert_eq!(policy.delay_for(64), Duration::from_secs(1));
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Backoff::Fixed);
        let result = policy.retry(|attempt| if attempt < 3 { Err("flaky") } else { Ok(attempt) });
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn test_gives_up_after_max_retries() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1), Backoff::Linear);
        let mut calls = 0;
        let result: Result<(), _> = policy.retry(|_| {
            calls += 1;
            Err("down")
        });
        assert_eq!(result, Err(RetryError { attempts: 3, last: "down" }));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_non_retryable_stops_immediately() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1), Backoff::Fixed);
        let result: Result<(), _> = policy.retry_if(|_| Err(404), |code| *code >= 500);
        assert_eq!(result.unwrap_err().attempts, 1);
    }
}
