//! Common error types for GameShare signaling.

use thiserror::Error;

/// Result type alias using the GameShare error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for signaling operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (socket bind, accept, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame was not valid JSON or did not match any known message shape
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Message was well formed but not legal in the current state
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    /// Create a protocol error from any displayable type.
    pub fn protocol(msg: impl std::fmt::Display) -> Self {
        Self::Protocol(msg.to_string())
    }
}
