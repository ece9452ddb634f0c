//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while validating or decoding protocol types.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A record failed validation.
    #[error("invalid record {id}: {reason}")]
    InvalidRecord {
        /// Record identifier.
        id: String,
        /// Why the record was rejected.
        reason: String,
    },

    /// Sync interval outside the accepted range.
    #[error("invalid sync interval: {0} (use -1 for manual or a positive number of minutes)")]
    InvalidInterval(i64),

    /// Batch size must be positive.
    #[error("batch size must be greater than zero")]
    InvalidBatchSize,

    /// Unknown conflict strategy name.
    #[error("unknown conflict strategy: {0}")]
    UnknownStrategy(String),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Creates an invalid-record error.
    pub fn invalid_record(id: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}
