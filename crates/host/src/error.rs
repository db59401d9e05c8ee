//! Error types for the tether host.

use tether_protocol::{ObjectId, WireError};
use thiserror::Error;

/// Result type alias for host operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while serving the channel.
///
/// Failures of individual operations ([`ReferenceNotFound`](Error::ReferenceNotFound),
/// [`Execution`](Error::Execution), [`NotSerializable`](Error::NotSerializable))
/// become structured error replies; they never tear the channel down.
#[derive(Debug, Error)]
pub enum Error {
    /// Target id unknown to the registry.
    #[error("No object with id {0}")]
    ReferenceNotFound(ObjectId),

    /// The invoked function failed.
    #[error("{message}")]
    Execution {
        /// Failure message, surfaced verbatim to the driver.
        message: String,
        /// Host-side trace for diagnostics.
        trace: Option<String>,
    },

    /// By-value reply requested for an object with no by-value projection.
    #[error("Result object has no by-value form; request a handle")]
    NotSerializable,

    /// Transport-level failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Execution failure with just a message.
    pub fn execution(message: impl Into<String>) -> Self {
        Error::Execution { message: message.into(), trace: None }
    }

    /// Execution failure carrying a diagnostic trace.
    pub fn execution_with_trace(message: impl Into<String>, trace: impl Into<String>) -> Self {
        Error::Execution { message: message.into(), trace: Some(trace.into()) }
    }

    /// Wire form carried in an error reply.
    pub(crate) fn to_wire(&self) -> WireError {
        match self {
            Error::Execution { message, trace } => {
                WireError { message: message.clone(), trace: trace.clone() }
            }
            other => WireError { message: other.to_string(), trace: None },
        }
    }
}
