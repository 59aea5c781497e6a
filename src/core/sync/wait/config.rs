/*!
 * Synchronization Configuration
 *
 * Runtime configuration for wait strategy selection
 */

use super::futex::FutexWait;
use super::spinwait::SpinWait;
use super::traits::WaitStrategy;
use crate::core::limits::{DEFAULT_MAX_SPINS, DEFAULT_SPIN_DURATION};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMicroSeconds};
use std::sync::Arc;
use std::time::Duration;

/// Strategy type selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    /// Park on the slot address (blocking, production default)
    Futex,
    /// Adaptive spinwait (low-latency, high-CPU for short waits)
    SpinWait,
    /// Auto-select based on platform and use case
    Auto,
}

/// Synchronization configuration
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Preferred strategy
    pub strategy: StrategyType,
    /// Spin duration before parking (for SpinWait)
    #[serde_as(as = "DurationMicroSeconds<u64>")]
    pub spin_duration: Duration,
    /// Maximum spin iterations before parking
    pub max_spins: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyType::Auto,
            spin_duration: DEFAULT_SPIN_DURATION,
            max_spins: DEFAULT_MAX_SPINS,
        }
    }
}

impl SyncConfig {
    /// Configuration optimized for low-latency (< 1ms wait expected)
    pub const fn low_latency() -> Self {
        Self {
            strategy: StrategyType::SpinWait,
            spin_duration: Duration::from_micros(50),
            max_spins: 500,
        }
    }

    /// Configuration optimized for long waits (> 1ms expected)
    pub const fn long_wait() -> Self {
        Self {
            strategy: StrategyType::Futex,
            spin_duration: Duration::from_micros(1),
            max_spins: 10,
        }
    }

    /// Resolve `Auto` to a concrete strategy
    pub fn select_strategy(&self) -> StrategyType {
        match self.strategy {
            // Blocking waits are the default everywhere; parking_lot_core maps
            // to futex on Linux and to the native parker elsewhere
            StrategyType::Auto => StrategyType::Futex,
            other => other,
        }
    }

    /// Build the selected strategy
    pub(crate) fn build(&self) -> Arc<dyn WaitStrategy> {
        match self.select_strategy() {
            StrategyType::SpinWait => Arc::new(SpinWait::new(self.spin_duration, self.max_spins)),
            StrategyType::Futex | StrategyType::Auto => Arc::new(FutexWait::new()),
        }
    }
}
