//! Error types for the core crate.

use thiserror::Error;

// =============================================================================
// Client Errors
// =============================================================================

/// Errors reported by a [`Client`](crate::Client) implementation.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The client has no live session with the platform.
    #[error("client is not connected")]
    NotConnected,

    /// The platform refused or failed to deliver a message.
    #[error("failed to send message to {target}: {reason}")]
    SendFailed {
        /// Human-readable target, e.g. `user 10001` or `group 20002`.
        target: String,
        /// Reason for failure.
        reason: String,
    },

    /// Any other client-side failure.
    #[error("client error: {0}")]
    Other(String),
}

impl ClientError {
    /// Creates a send failure for a private chat.
    pub fn send_private(user_id: i64, reason: impl Into<String>) -> Self {
        Self::SendFailed {
            target: format!("user {user_id}"),
            reason: reason.into(),
        }
    }

    /// Creates a send failure for a group chat.
    pub fn send_group(group_id: i64, reason: impl Into<String>) -> Self {
        Self::SendFailed {
            target: format!("group {group_id}"),
            reason: reason.into(),
        }
    }
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

// =============================================================================
// Parse Errors
// =============================================================================

/// Returned when a string does not name a known element kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown element type '{0}'")]
pub struct ParseKindError(pub String);
