//! Error types for the Julia console.

use thiserror::Error;

use crate::TerminalId;

/// Main error type for console operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The remote end went away before answering a call
    #[error("Remote process disconnected before `{0}` completed")]
    RemoteDisconnected(String),

    /// The remote end answered a call with an error
    #[error("Remote call `{name}` failed: {message}")]
    RemoteError {
        /// Remote procedure name
        name: String,
        /// Error message reported by the remote side
        message: String,
    },

    /// No local handler is registered for a pushed message
    #[error("No handler registered for `{0}`")]
    UnknownHandler(String),

    /// The user declined a required selection
    #[error("Selection cancelled")]
    Cancelled,

    /// PTY-related errors
    #[error("PTY error: {0}")]
    PtyError(String),

    /// Spawning a process failed
    #[error("Failed to spawn `{command}`: {reason}")]
    SpawnFailed {
        /// Command that was spawned
        command: String,
        /// Underlying failure
        reason: String,
    },

    /// Terminal is unknown to the registry
    #[error("Terminal not found: {0}")]
    TerminalNotFound(TerminalId),

    /// Invalid keystroke string
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input or parameters (generic)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Whether the error only means "the remote side was not there".
    ///
    /// Callers gating optional UI on a remote answer treat these as a plain
    /// negative rather than surfacing them.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Error::RemoteDisconnected(_))
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
