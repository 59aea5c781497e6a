/*!
 * Kernel Configuration
 *
 * One serde document holding the settings of every component. Missing
 * sections and fields fall back to the defaults in `core::limits`;
 * durations are written in milliseconds (microseconds for spin tuning).
 */

use crate::core::errors::CoordError;
use crate::core::limits::{DEFAULT_REGION_SLOTS, MAX_REGION_SLOTS};
use crate::core::sync::SyncConfig;
use crate::flow::{BreakerConfig, PoolConfig, RateLimitConfig, RetryPolicy};
use crate::ipc::ChannelConfig;
use crate::scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Environment variable naming a JSON config file
pub const CONFIG_PATH_ENV: &str = "COORD_CONFIG";

/// Environment variable overriding `scheduler.workers`
pub const WORKERS_ENV: &str = "COORD_WORKERS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Slots in the region the binary shares between its primitives
    pub region_slots: usize,
    pub sync: SyncConfig,
    pub scheduler: SchedulerConfig,
    pub channel: ChannelConfig,
    pub breaker: BreakerConfig,
    pub retry: RetryPolicy,
    pub pool: PoolConfig,
    pub rate_limit: RateLimitConfig,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            region_slots: DEFAULT_REGION_SLOTS,
            sync: SyncConfig::default(),
            scheduler: SchedulerConfig::default(),
            channel: ChannelConfig::default(),
            breaker: BreakerConfig::default(),
            retry: RetryPolicy::default(),
            pool: PoolConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl KernelConfig {
    pub fn from_json(raw: &str) -> Result<Self, CoordError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CoordError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_json(&raw)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Defaults, or the file named by `COORD_CONFIG`, with the
    /// `COORD_WORKERS` override applied
    pub fn from_env() -> Result<Self, CoordError> {
        let mut config = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Ok(workers) = std::env::var(WORKERS_ENV) {
            config.override_workers(&workers)?;
        }
        Ok(config)
    }

    /// Apply a textual worker count such as an environment value
    pub fn override_workers(&mut self, raw: &str) -> Result<(), CoordError> {
        let workers: usize = raw.trim().parse().map_err(|_| {
            CoordError::Configuration(format!(
                "{} must be a positive integer, got {:?}",
                WORKERS_ENV, raw
            ))
        })?;
        self.scheduler.workers = workers;
        self.validate()
    }

    pub fn to_json(&self) -> Result<String, CoordError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), CoordError> {
        if self.region_slots == 0 || self.region_slots > MAX_REGION_SLOTS {
            return Err(CoordError::Configuration(format!(
                "region_slots must be in 1..={}, got {}",
                MAX_REGION_SLOTS, self.region_slots
            )));
        }
        self.scheduler.validate()?;
        self.channel.validate()?;
        if self.breaker.threshold == 0 {
            return Err(CoordError::Configuration(
                "breaker threshold must be at least 1".into(),
            ));
        }
        if self.rate_limit.limit == 0 || self.rate_limit.window.is_zero() {
            return Err(CoordError::Configuration(
                "rate limit and window must be nonzero".into(),
            ));
        }
        Ok(())
    }
}
