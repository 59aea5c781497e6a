/*!
 * Channel Types
 * Errors, configuration and statistics for CSP channels
 */

use crate::core::limits::{DEFAULT_CHANNEL_CAPACITY, MAX_CHANNEL_CAPACITY};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Channel error types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelError {
    #[error("Channel closed")]
    Closed,

    #[error("Channel full")]
    Full,

    #[error("Channel empty")]
    Empty,

    #[error("Channel operation timed out")]
    Timeout,

    #[error("Channel capacity {0} exceeds maximum")]
    CapacityExceeded(usize),
}

/// Failed send, handing the undelivered message back to the caller
pub struct SendError<T> {
    pub message: T,
    pub error: ChannelError,
}

impl<T> SendError<T> {
    pub fn into_inner(self) -> T {
        self.message
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "send failed: {}", self.error)
    }
}

impl<T> std::error::Error for SendError<T> {}

impl<T> From<SendError<T>> for ChannelError {
    fn from(err: SendError<T>) -> Self {
        err.error
    }
}

/// Channel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Buffered messages; 0 makes every send a synchronous handoff
    pub capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl ChannelConfig {
    pub fn validate(&self) -> Result<(), ChannelError> {
        if self.capacity > MAX_CHANNEL_CAPACITY {
            return Err(ChannelError::CapacityExceeded(self.capacity));
        }
        Ok(())
    }
}

/// Channel statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub capacity: usize,
    pub buffered: usize,
    pub sent: u64,
    pub received: u64,
    /// Sends that had to wait for space or a receiver
    pub blocked_sends: u64,
    /// Receives that had to wait for a message
    pub blocked_receives: u64,
    pub max_buffered: usize,
    pub closed: bool,
}
