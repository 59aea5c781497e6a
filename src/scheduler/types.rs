/*!
 * Scheduler Types
 * Configuration, overflow and aging policies, statistics snapshots
 */

use crate::core::errors::SchedulerError;
use crate::core::limits::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS, IDLE_PARK_TIMEOUT, MAX_WORKERS};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::time::Duration;

/// What a full queue does with a new submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Block the submitter until space frees up
    #[default]
    Block,
    /// Fail the submission with `QueueFull`
    Reject,
}

/// Opt-in starvation guard for priority queues
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgingPolicy {
    /// Wait after which an entry jumps to the top priority
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_age: Duration,
}

/// Scheduler configuration
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub workers: usize,
    /// Maximum tasks queued or running at once
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    /// Upper bound on how long an idle worker parks before rechecking
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub idle_timeout: Duration,
    /// Priority scheduler only; the work-stealing scheduler has no priorities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aging: Option<AgingPolicy>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow: OverflowPolicy::Block,
            idle_timeout: IDLE_PARK_TIMEOUT,
            aging: None,
        }
    }
}

impl SchedulerConfig {
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(SchedulerError::InvalidConfig(format!(
                "workers must be in 1..={}, got {}",
                MAX_WORKERS, self.workers
            )));
        }
        if self.queue_capacity == 0 || self.queue_capacity > i32::MAX as usize {
            return Err(SchedulerError::InvalidConfig(format!(
                "queue capacity out of range: {}",
                self.queue_capacity
            )));
        }
        if self.aging.map_or(false, |aging| aging.max_age.is_zero()) {
            return Err(SchedulerError::InvalidConfig(
                "aging max_age must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Scheduler statistics snapshot
///
/// Counters are read individually and may be mutually inconsistent by a
/// few in-flight tasks; fine for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub workers: usize,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub steals: u64,
    pub steal_retries: u64,
    pub local_spawns: u64,
    pub outstanding: usize,
    /// Tasks executed by each worker, indexed by worker id
    pub per_worker: Vec<u64>,
}

impl SchedulerStats {
    /// Tasks that ran to an outcome
    pub fn finished(&self) -> u64 {
        self.completed + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(SchedulerConfig::default().validate().is_ok());
        assert!(SchedulerConfig::with_workers(0).validate().is_err());
        assert!(SchedulerConfig::with_workers(MAX_WORKERS + 1).validate().is_err());
    }

    #[test]
    fn test_config_json_uses_millis() {
        let config: SchedulerConfig =
            serde_json::from_str(r#"{"workers": 2, "idle_timeout": 25, "overflow": "reject"}"#).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.idle_timeout, Duration::from_millis(25));
        assert_eq!(config.overflow, OverflowPolicy::Reject);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_aging_is_opt_in() {
        assert_eq!(SchedulerConfig::default().aging, None);
        let config: SchedulerConfig =
            serde_json::from_str(r#"{"aging": {"max_age": 5000}}"#).unwrap();
        assert_eq!(
            config.aging,
            Some(AgingPolicy {
                max_age: Duration::from_secs(5)
            })
        );

        let zero = SchedulerConfig {
            aging: Some(AgingPolicy {
                max_age: Duration::ZERO,
            }),
            ..Default::default()
        };
        assert!(zero.validate().is_err());
    }
}
