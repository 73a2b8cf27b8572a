use bridge_traits::{BridgeError, MediaError};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("No sync job registered for {kind}")]
    JobNotFound { kind: String },

    #[error("Sync job {kind} is already registered")]
    DuplicateJob { kind: String },

    #[error("Invalid sync kind: {0}")]
    InvalidKind(String),

    #[error("Invalid job state: {0}")]
    InvalidState(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Item source error: {0}")]
    ItemSource(String),

    #[error("Queue segment {key} is corrupted: {reason}")]
    CorruptSegment { key: String, reason: String },

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Storage error: {0}")]
    Storage(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Classification of a per-item failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// The whole job cannot make progress
    Fatal,
    /// Only this item cannot succeed
    Unprocessable,
    /// Anything the task did not classify
    Unclassified,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Fatal => "fatal",
            ErrorKind::Unprocessable => "unprocessable",
            ErrorKind::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure returned by a job's per-item task
///
/// Only `Unprocessable` lets the window carry on with the next item.
/// `Fatal` and `Unclassified` both stop the job.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("{0}")]
    Fatal(String),

    #[error("{0}")]
    Unprocessable(String),

    #[error("{0}")]
    Unclassified(String),
}

impl TaskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::Fatal(_) => ErrorKind::Fatal,
            TaskError::Unprocessable(_) => ErrorKind::Unprocessable,
            TaskError::Unclassified(_) => ErrorKind::Unclassified,
        }
    }

    /// Whether this failure ends the whole run
    pub fn stops_job(&self) -> bool {
        !matches!(self, TaskError::Unprocessable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            TaskError::Fatal(message)
            | TaskError::Unprocessable(message)
            | TaskError::Unclassified(message) => message,
        }
    }
}

impl From<MediaError> for TaskError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::Fatal(message) => TaskError::Fatal(message),
            MediaError::Unprocessable(message) => TaskError::Unprocessable(message),
            MediaError::Other(message) => TaskError::Unclassified(message),
        }
    }
}

impl From<SyncError> for TaskError {
    fn from(err: SyncError) -> Self {
        TaskError::Unclassified(err.to_string())
    }
}

impl From<BridgeError> for TaskError {
    fn from(err: BridgeError) -> Self {
        TaskError::Unclassified(err.to_string())
    }
}
