//! Error types for prrflow
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur while driving a PRR workflow
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// No running instance is registered under the identity key
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    /// Invalid state transition or operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A single activity attempt failed
    #[error("Activity {activity} failed: {reason}")]
    Activity { activity: String, reason: String },

    /// A single activity attempt ran past its start-to-close timeout
    #[error("Activity {activity} timed out after {timeout_ms}ms")]
    AttemptTimeout { activity: String, timeout_ms: u64 },

    /// A single activity attempt stopped heartbeating
    #[error("Activity {activity} missed its heartbeat ({timeout_ms}ms)")]
    HeartbeatTimeout { activity: String, timeout_ms: u64 },

    /// Every allowed attempt of an activity failed
    #[error("Activity {activity} gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        activity: String,
        attempts: u32,
        #[source]
        source: Box<WorkflowError>,
    },

    /// The hosting execution was canceled
    #[error("Canceled")]
    Cancelled,

    /// The execution task panicked instead of returning an outcome
    #[error("Execution panicked: {0}")]
    Panicked(String),

    /// Checkpoint persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WorkflowError {
    /// Build an attempt failure for the named activity
    pub fn activity(activity: impl Into<String>, reason: impl Into<String>) -> Self {
        WorkflowError::Activity {
            activity: activity.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this error represents cancellation rather than failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkflowError::Cancelled)
    }
}

/// Result type alias for prrflow operations
pub type Result<T> = std::result::Result<T, WorkflowError>;
