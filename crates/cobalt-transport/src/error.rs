//! Transport error types.

use thiserror::Error;

/// Errors that can occur while opening or closing listeners.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The socket could not be bound.
    #[error("failed to bind {addr}: {reason}")]
    Bind {
        /// The address that failed to bind.
        addr: String,
        /// Reason for failure.
        reason: String,
    },

    /// Another listener already holds the port.
    #[error("port {0} is already in use")]
    PortInUse(u16),

    /// No listener is open on the port.
    #[error("no listener is open on port {0}")]
    PortNotOpen(u16),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
