/*!
 * Circuit Breaker
 *
 * Closed: calls pass, consecutive failures are counted.
 * Open: calls are rejected without running until the cooldown elapses.
 * HalfOpen: exactly one trial call runs; success closes, failure reopens.
 */

use crate::core::limits::{DEFAULT_BREAKER_COOLDOWN, DEFAULT_BREAKER_THRESHOLD};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    pub threshold: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_BREAKER_THRESHOLD,
            cooldown: DEFAULT_BREAKER_COOLDOWN,
        }
    }
}

/// Error from a call guarded by the breaker
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BreakerError<E> {
    #[error("Circuit open, call rejected")]
    Open,

    #[error("Call failed: {0}")]
    Inner(E),
}

struct BreakerInner {
    state: BreakerState,
    failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    rejected: u64,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failures: 0,
                opened_at: None,
                trial_in_flight: false,
                rejected: 0,
            }),
        }
    }

    /// Decide whether a call may run now
    ///
    /// In the half-open state only the first caller gets through; it must
    /// report its outcome with `record_success` or `record_failure`.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock();
        let admitted = match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let cooled = inner
                    .opened_at
                    .map_or(true, |at| at.elapsed() >= self.config.cooldown);
                if cooled {
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = true;
                    info!("Circuit half-open, admitting trial call");
                }
                cooled
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    false
                } else {
                    inner.trial_in_flight = true;
                    true
                }
            }
        };
        if !admitted {
            inner.rejected += 1;
        }
        admitted
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => inner.failures = 0,
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Closed;
                inner.failures = 0;
                inner.opened_at = None;
                inner.trial_in_flight = false;
                info!("Circuit closed after successful trial");
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    warn!(failures = inner.failures, "Circuit opened");
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.trial_in_flight = false;
                warn!("Trial call failed, circuit reopened");
            }
            BreakerState::Open => {}
        }
    }

    /// Run `f` through the breaker
    ///
    /// A rejected call never invokes `f`. A panic in `f` counts as a failure
    /// and is then resumed in the caller.
    pub fn call<T, E, F>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if !self.allow() {
            return Err(BreakerError::Open);
        }
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(err)) => {
                self.record_failure();
                Err(BreakerError::Inner(err))
            }
            Err(payload) => {
                self.record_failure();
                panic::resume_unwind(payload)
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Consecutive failures counted while closed
    pub fn failures(&self) -> u32 {
        self.inner.lock().failures
    }

    /// Calls turned away since creation
    pub fn rejected(&self) -> u64 {
        self.inner.lock().rejected
    }

    /// Force the breaker closed
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }
}
