//! Error types for msgvault-core

use thiserror::Error;

/// Core library error type.
///
/// Caller-facing variants carry a plain-language remediation hint in their
/// display string alongside the underlying failure.
#[derive(Debug, Error)]
pub enum Error {
    #[error(
        "message store unavailable: {reason}. Grant Full Disk Access to the calling process, \
         or point `store_path` at a readable copy of chat.db"
    )]
    StoreUnavailable { reason: String },

    #[error(
        "search scope required: supply a chat id, a participant, or a time bound. \
         Unscoped queries would scan the entire store"
    )]
    ScopeRequired,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<sqlx::Error> for Error {
    // Every sqlx failure in this crate is a failure to reach or read the
    // external store; there is no database of our own.
    fn from(err: sqlx::Error) -> Self {
        Error::StoreUnavailable {
            reason: err.to_string(),
        }
    }
}

/// Result type alias using Error.
pub type Result<T> = std::result::Result<T, Error>;
