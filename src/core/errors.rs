/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use crate::ipc::ChannelError;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shared region errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum RegionError {
    #[error("Slot index {index} out of bounds (region has {len} slots)")]
    #[diagnostic(
        code(region::index_out_of_bounds),
        help("Slots must be reserved from the region before use.")
    )]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Invalid region length: {0}")]
    #[diagnostic(
        code(region::invalid_length),
        help("Regions hold between 1 and MAX_REGION_SLOTS slots.")
    )]
    InvalidLength(usize),

    #[error("Region exhausted: requested {requested} slots, {available} available")]
    #[diagnostic(
        code(region::exhausted),
        help("Allocate a larger region for the primitives built over it.")
    )]
    Exhausted { requested: usize, available: usize },
}

/// Synchronization primitive errors
///
/// Usage errors fail fast instead of corrupting shared state.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum SyncError {
    #[error("Lock already held by the calling worker")]
    #[diagnostic(
        code(sync::reentrant),
        help("Locks are not reentrant. Release before acquiring again.")
    )]
    Reentrant,

    #[error("Lock is not held by the calling worker")]
    #[diagnostic(code(sync::not_held))]
    NotHeld,

    #[error("Release would exceed capacity {capacity}")]
    #[diagnostic(
        code(sync::over_release),
        help("Every release must pair with a prior successful acquire.")
    )]
    OverRelease { capacity: i32 },

    #[error("Operation timed out after {elapsed_ms}ms (timeout: {timeout_ms}ms)")]
    #[diagnostic(code(sync::timeout))]
    Timeout { elapsed_ms: u64, timeout_ms: u64 },

    #[error("Barrier must keep at least one registered party")]
    #[diagnostic(code(sync::no_parties))]
    NoParties,

    #[error("Invalid argument: {0}")]
    #[diagnostic(code(sync::invalid_argument))]
    InvalidArgument(String),

    #[error("Region error: {0}")]
    #[diagnostic(transparent)]
    Region(#[from] RegionError),
}

impl SyncError {
    pub(crate) fn timeout(elapsed: std::time::Duration, timeout: std::time::Duration) -> Self {
        SyncError::Timeout {
            elapsed_ms: elapsed.as_millis() as u64,
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Whether this error is a timeout rather than a usage error
    pub fn is_timeout(&self) -> bool {
        matches!(self, SyncError::Timeout { .. })
    }
}

/// Scheduler-related errors with serialization support
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum SchedulerError {
    #[error("Scheduler queue full: capacity {0}")]
    #[diagnostic(
        code(scheduler::queue_full),
        help("Too many queued tasks. Wait for tasks to complete or use OverflowPolicy::Block.")
    )]
    QueueFull(usize),

    #[error("Queue closed")]
    #[diagnostic(code(scheduler::closed))]
    Closed,

    #[error("Scheduler is shut down")]
    #[diagnostic(code(scheduler::shut_down))]
    ShutDown,

    #[error("Worker {0} panicked")]
    #[diagnostic(code(scheduler::worker_panicked))]
    WorkerPanicked(String),

    #[error("Invalid scheduler configuration: {0}")]
    #[diagnostic(
        code(scheduler::invalid_config),
        help("Worker count must be between 1 and MAX_WORKERS.")
    )]
    InvalidConfig(String),

    #[error("Timed out after {elapsed_ms}ms")]
    #[diagnostic(code(scheduler::timeout))]
    Timeout { elapsed_ms: u64 },

    #[error("Region error: {0}")]
    #[diagnostic(transparent)]
    Region(#[from] RegionError),
}

/// Bounded resource pool errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum PoolError {
    #[error("Pool exhausted: all {capacity} resources in use")]
    #[diagnostic(
        code(pool::exhausted),
        help("Configure ExhaustedPolicy::Block to wait for a free resource.")
    )]
    Exhausted { capacity: usize },

    #[error("Pool acquire timed out after {elapsed_ms}ms")]
    #[diagnostic(code(pool::timeout))]
    Timeout { elapsed_ms: u64 },

    #[error("Release would exceed pool capacity {capacity}")]
    #[diagnostic(code(pool::over_release))]
    OverRelease { capacity: usize },

    #[error("Pool needs at least one resource")]
    #[diagnostic(code(pool::empty))]
    Empty,

    #[error("Synchronization error: {0}")]
    #[diagnostic(transparent)]
    Sync(#[from] SyncError),
}

/// Unified coordination error type with miette diagnostics
#[derive(Error, Debug, Diagnostic)]
pub enum CoordError {
    #[error("Region error: {0}")]
    #[diagnostic(transparent)]
    Region(#[from] RegionError),

    #[error("Sync error: {0}")]
    #[diagnostic(transparent)]
    Sync(#[from] SyncError),

    #[error("Channel error: {0}")]
    #[diagnostic(
        code(coord::channel),
        help("Channels reject sends once closed; receivers drain and then see end-of-channel.")
    )]
    Channel(#[from] ChannelError),

    #[error("Scheduler error: {0}")]
    #[diagnostic(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("Pool error: {0}")]
    #[diagnostic(transparent)]
    Pool(#[from] PoolError),

    #[error("Configuration error: {0}")]
    #[diagnostic(
        code(coord::configuration_error),
        help("Invalid configuration. Review configuration parameters.")
    )]
    Configuration(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(coord::io_error))]
    Io(String),
}

impl From<std::io::Error> for CoordError {
    fn from(err: std::io::Error) -> Self {
        CoordError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CoordError {
    fn from(err: serde_json::Error) -> Self {
        CoordError::Configuration(err.to_string())
    }
}
