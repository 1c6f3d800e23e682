//! Error types for sessionvault

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Transport or pool failure. Not retried at this layer.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Unique-key violation on insert.
    #[error("Duplicate session record: {0}")]
    Conflict(String),

    #[error("Timed out waiting for session lock: {0}")]
    LockTimeout(String),

    /// Any other database failure.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Session lock not held for '{0}'; the session must be read before it is written")]
    LockNotHeld(String),

    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether a higher layer may retry the whole request.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::LockTimeout(_) | Error::Connection(_))
    }

    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Connection(_) => "connection",
            Error::Conflict(_) => "conflict",
            Error::LockTimeout(_) => "lock_timeout",
            Error::Storage(_) => "storage",
            Error::LockNotHeld(_) => "lock_not_held",
            Error::InvalidSessionId(_) => "invalid_session_id",
            Error::Config(_) => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
