/*!
 * Control Messages
 * The closed set of messages crossing the host/worker boundary
 */

use crate::core::types::{TaskId, WorkerId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message between the host and its workers, tagged by `type` on the wire
///
/// Host to worker: `Start`, `Stop`, `SubmitTask`.
/// Worker to host: `Progress`, `Result`, `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Start,
    Stop,
    SubmitTask {
        task_id: TaskId,
        payload: Value,
    },
    Progress {
        worker: WorkerId,
        /// Fraction complete in `[0, 1]`
        percent: f64,
        message: String,
    },
    Result {
        worker: WorkerId,
        task_id: TaskId,
        payload: Value,
        elapsed_ms: u64,
    },
    Error {
        worker: WorkerId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<TaskId>,
        message: String,
    },
}

impl ControlMessage {
    /// Progress report with `percent` clamped into `[0, 1]`
    pub fn progress(worker: WorkerId, percent: f64, message: impl Into<String>) -> Self {
        let percent = if percent.is_nan() {
            0.0
        } else {
            percent.clamp(0.0, 1.0)
        };
        Self::Progress {
            worker,
            percent,
            message: message.into(),
        }
    }

    /// Sent by workers rather than the host
    pub fn is_report(&self) -> bool {
        matches!(
            self,
            Self::Progress { .. } | Self::Result { .. } | Self::Error { .. }
        )
    }

    /// Worker that produced a report
    pub fn worker(&self) -> Option<WorkerId> {
        match self {
            Self::Progress { worker, .. }
            | Self::Result { worker, .. }
            | Self::Error { worker, .. } => Some(*worker),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
