//! CLI error type.

use readsync_engine::{StoreError, SyncError};
use readsync_protocol::ProtocolError;
use thiserror::Error;

/// Errors surfaced by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Reading or writing a file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A file did not contain the expected JSON.
    #[error("invalid JSON in {path}: {source}")]
    Json {
        /// File that failed to parse.
        path: String,
        /// Parser error.
        source: serde_json::Error,
    },

    /// Rendering output failed.
    #[error("failed to render output: {0}")]
    Render(#[from] serde_json::Error),

    /// Preference storage failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A setting was rejected.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The engine refused or failed.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;
