//! Role and session error types.

use std::{fmt, net::SocketAddr, time::Duration};

use dbgp_executor::ExecutorError;
use dbgp_protocol::DbgpError;
use thiserror::Error;

/// The three concurrent roles of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Listener,
    Executor,
    Controller,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Listener => "listener",
            Self::Executor => "executor",
            Self::Controller => "controller",
        })
    }
}

/// Why a single role gave up.
#[derive(Debug, Error)]
pub enum RoleError {
    #[error("Timed out after {after:?} waiting for {waiting_for}")]
    Timeout {
        after: Duration,
        waiting_for: &'static str,
    },
    #[error("The {0} signal was dropped before it fired")]
    SignalDropped(&'static str),
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Protocol error: {0}")]
    Protocol(#[from] DbgpError),
    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),
}

/// The first role failure of a session, reported after cleanup.
#[derive(Debug, Error)]
#[error("Debug session failed in {role}: {source}")]
pub struct DebugSessionError {
    pub role: Role,
    #[source]
    pub source: RoleError,
}

impl DebugSessionError {
    #[must_use]
    pub const fn new(role: Role, source: RoleError) -> Self {
        Self { role, source }
    }

    /// Whether the failure was a bounded wait running out.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(
            self.source,
            RoleError::Timeout { .. }
                | RoleError::Executor(ExecutorError::Timeout(_))
                | RoleError::Protocol(DbgpError::Timeout { .. })
        )
    }
}
