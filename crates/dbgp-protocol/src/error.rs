//! Protocol error taxonomy.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the wire codec and the command/response session.
///
/// Malformed XML is not an error: it downgrades to an empty `Response`.
#[derive(Debug, Error)]
pub enum DbgpError {
    #[error("Timed out after {after:?} waiting for {waiting_for}")]
    Timeout {
        after: Duration,
        waiting_for: &'static str,
    },
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Connection closed by engine")]
    ConnectionClosed,
    #[error("Session is not connected")]
    NotConnected,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DbgpError {
    /// Whether the underlying connection can no longer be used.
    #[must_use]
    pub const fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionClosed | Self::NotConnected | Self::Io(_))
    }
}
