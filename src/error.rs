//! Error types for modqueue
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

use crate::store::{SubjectKind, SubjectStatus};

/// All error types that can occur in modqueue
#[derive(Debug, Error)]
pub enum ModqueueError {
    /// Subject is not present in any partition of its kind
    #[error("{0} {1} not found")]
    SubjectNotFound(SubjectKind, i64),

    /// Requested lifecycle move is not part of the state machine
    #[error("Invalid transition for {kind} {id}: {from} -> {to}")]
    InvalidTransition {
        kind: SubjectKind,
        id: i64,
        from: SubjectStatus,
        to: SubjectStatus,
    },

    /// Caller-supplied deadline passed before the operation started
    #[error("Deadline exceeded before {0}")]
    DeadlineExceeded(&'static str),

    /// Caller cancelled a blocking operation
    #[error("Cancelled while waiting for {0}")]
    Cancelled(String),

    /// Rate limit window store failure
    #[error("Rate limit store error: {0}")]
    RateLimitStore(String),

    /// External platform API error
    #[error("Platform error: {0}")]
    Platform(String),

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for modqueue operations
pub type Result<T> = std::result::Result<T, ModqueueError>;
