/*!
 * Rate Limiter
 * Sliding-window admission: at most `limit` admissions in any `window`
 */

use crate::core::limits::{DEFAULT_RATE_LIMIT, DEFAULT_RATE_WINDOW};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::trace;

#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub limit: usize,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_RATE_LIMIT,
            window: DEFAULT_RATE_WINDOW,
        }
    }
}

/// Sliding-window rate limiter
///
/// Keeps the timestamp of every admission inside the current window, so
/// memory is bounded by `limit`.
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            admitted: Mutex::new(VecDeque::with_capacity(limit)),
        }
    }

    pub fn from_config(config: RateLimitConfig) -> Self {
        Self::new(config.limit, config.window)
    }

    fn evict(&self, admitted: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = admitted.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                admitted.pop_front();
            } else {
                break;
            }
        }
    }

    /// Admit one request now if the window has room
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    /// Admit one request at `now`; time is assumed not to go backwards
    pub fn allow_at(&self, now: Instant) -> bool {
        let mut admitted = self.admitted.lock();
        self.evict(&mut admitted, now);
        if admitted.len() < self.limit {
            admitted.push_back(now);
            true
        } else {
            trace!(limit = self.limit, "Rate limit reached");
            false
        }
    }

    /// Admissions still available in the current window
    pub fn remaining(&self) -> usize {
        let mut admitted = self.admitted.lock();
        self.evict(&mut admitted, Instant::now());
        self.limit.saturating_sub(admitted.len())
    }

    /// Time until the next admission slot frees up, `None` if one is free now
    pub fn retry_after(&self) -> Option<Duration> {
        let now = Instant::now();
        let mut admitted = self.admitted.lock();
        self.evict(&mut admitted, now);
        if admitted.len() < self.limit {
            return None;
        }
        admitted
            .front()
            .map(|&oldest| self.window.saturating_sub(now.saturating_duration_since(oldest)))
    }

    pub fn reset(&self) {
        self.admitted.lock().clear();
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}
