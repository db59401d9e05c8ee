//! Error types for the driver-side runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to driver code.
#[derive(Debug, Error)]
pub enum Error {
    /// Operation on a handle after `dispose()`. Detected locally; no wire traffic.
    #[error("Handle is disposed")]
    HandleDisposed,

    /// Operation on a handle after `release()`. Detected locally; no wire traffic.
    #[error("Handle is released")]
    HandleReleased,

    /// The host reported a failure for this call.
    #[error("{message}")]
    Remote {
        /// Human-readable failure message from the host.
        message: String,
        /// Host-side trace, when available. Diagnostic only.
        trace: Option<String>,
    },

    /// Transport closed or failed before a reply arrived.
    #[error("Connection closed")]
    ChannelClosed,

    /// Failed to establish the channel.
    #[error("Failed to connect: {0}")]
    ConnectionFailed(String),

    /// Transport-level failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed or unexpected protocol traffic.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True when the handle already reached a terminal state locally.
    pub fn is_local_handle_error(&self) -> bool {
        matches!(self, Error::HandleDisposed | Error::HandleReleased)
    }

    /// Host-provided diagnostic trace, if this is a remote failure carrying one.
    pub fn trace(&self) -> Option<&str> {
        match self {
            Error::Remote { trace, .. } => trace.as_deref(),
            _ => None,
        }
    }
}
