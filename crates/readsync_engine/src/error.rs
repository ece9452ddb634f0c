//! Error types for the sync engine.

use crate::gate::DenyReason;
use readsync_protocol::ProtocolError;
use thiserror::Error;
use uuid::Uuid;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for local store and preference store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for remote API operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Result type for background host operations.
pub type HostResult<T> = Result<T, HostError>;

/// Errors raised by a [`LocalStore`](crate::LocalStore) or
/// [`PreferenceStore`](crate::PreferenceStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store has not been initialized.
    #[error("storage not initialized")]
    NotInitialized,

    /// No record with this id.
    #[error("record not found: {0}")]
    NotFound(String),

    /// A record with this id already exists.
    #[error("record already exists: {0}")]
    AlreadyExists(String),

    /// Backend failure.
    #[error("storage error: {0}")]
    Backend(String),

    /// Backend failure that may go away on retry (lock contention, busy file).
    #[error("storage busy: {0}")]
    Busy(String),
}

impl StoreError {
    /// Returns true if the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Busy(_))
    }
}

/// Errors raised by a [`RemoteApi`](crate::RemoteApi).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Connection failed or dropped.
    #[error("network error: {0}")]
    Network(String),

    /// The request timed out.
    #[error("request timed out")]
    Timeout,

    /// Credentials were rejected (401/403).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The payload was rejected (400/422).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The record does not exist remotely (404).
    #[error("remote record not found: {0}")]
    NotFound(String),

    /// The server failed.
    #[error("server error {status}: {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },
}

impl RemoteError {
    /// Creates a server error.
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }

    /// Returns true if the operation can be retried.
    ///
    /// Network failures, timeouts and 5xx responses are transient; 4xx
    /// responses are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Network(_) | RemoteError::Timeout => true,
            RemoteError::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Errors raised by a [`BackgroundHost`](crate::BackgroundHost).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// Registration was refused.
    #[error("background registration failed: {0}")]
    Registration(String),

    /// The host is not available on this platform.
    #[error("background host unavailable: {0}")]
    Unavailable(String),
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// No credentials.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The network gate refused the run.
    #[error("{0}")]
    NetworkDenied(DenyReason),

    /// The local store could not be initialized.
    #[error("storage not initialized")]
    StorageNotInitialized,

    /// Another non-forced run holds the running flag.
    #[error("sync already in progress")]
    AlreadyRunning,

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Local store error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Remote API error.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Background host error.
    #[error(transparent)]
    Host(#[from] HostError),

    /// Validation error.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// No pending conflict with this id.
    #[error("conflict not found: {0}")]
    ConflictNotFound(Uuid),

    /// Remote changes remain beyond the configured page limit.
    #[error("download stopped at the page limit ({0} pages)")]
    PageLimitReached(u32),

    /// The scheduler was used before `initialize`.
    #[error("scheduler not initialized")]
    SchedulerNotInitialized,
}

impl SyncError {
    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(e) => e.is_retryable(),
            SyncError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(RemoteError::Network("connection reset".into()).is_retryable());
        assert!(RemoteError::Timeout.is_retryable());
        assert!(RemoteError::server(503, "unavailable").is_retryable());
        assert!(!RemoteError::server(409, "conflict").is_retryable());
        assert!(!RemoteError::Unauthorized("expired".into()).is_retryable());
        assert!(!RemoteError::Validation("bad url".into()).is_retryable());
        assert!(!RemoteError::NotFound("42".into()).is_retryable());

        assert!(SyncError::from(RemoteError::Timeout).is_retryable());
        assert!(SyncError::from(StoreError::Busy("locked".into())).is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::NotAuthenticated.is_retryable());
    }

    #[test]
    fn error_display() {
        assert_eq!(SyncError::NotAuthenticated.to_string(), "not authenticated");
        assert_eq!(SyncError::AlreadyRunning.to_string(), "sync already in progress");
        assert_eq!(SyncError::Cancelled.to_string(), "sync cancelled");
        assert_eq!(
            SyncError::NetworkDenied(DenyReason::WifiRequired).to_string(),
            "Wi-Fi connection required"
        );
        assert_eq!(
            SyncError::from(RemoteError::server(500, "boom")).to_string(),
            "server error 500: boom"
        );
    }
}
