//! Error type shared by every component of the metrics engine.

use crate::SessionId;
use crate::status::SessionStatus;
use thiserror::Error;

/// Errors that can occur while maintaining session aggregates.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetricsError {
    /// No aggregate exists for the session; callers must initialize first
    #[error("No aggregate exists for session {0}")]
    NotFound(SessionId),

    /// The session is unknown to the source event store
    #[error("Session {0} is not scheduled in the source event store")]
    UnknownSession(SessionId),

    /// Initialize was called for a session that already has an aggregate
    #[error("Aggregate already exists for session {0}")]
    InvalidInitialization(SessionId),

    /// A status write that is not reachable from the stored status
    #[error("Invalid status transition for session {session_id}: {from} -> {to}")]
    InvalidTransition {
        /// The session whose status was being written
        session_id: SessionId,
        /// Status currently stored
        from: SessionStatus,
        /// Status that was attempted
        to: SessionStatus,
    },

    /// One or more members of a batch failed (the rest were applied)
    #[error("Batch finished with {failed} of {total} sessions failing")]
    PartialBatchFailure {
        /// Number of failed sessions
        failed: usize,
        /// Number of sessions in the batch
        total: usize,
    },

    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl MetricsError {
    /// Short machine-readable label, used for metric labels and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::UnknownSession(_) => "unknown_session",
            Self::InvalidInitialization(_) => "invalid_initialization",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::PartialBatchFailure { .. } => "partial_batch_failure",
            Self::Storage(_) => "storage",
            Self::Serialization(_) => "serialization",
        }
    }
}

/// Result type for metrics operations.
pub type Result<T> = std::result::Result<T, MetricsError>;
