//! Listener role: accept exactly one engine connection.

use std::{net::SocketAddr, time::Duration};

use dbgp_protocol::{DbgpSession, InitPacket};
use tokio::{net::TcpListener, sync::oneshot};

use crate::RoleError;

/// An accepted engine connection, ready for the controller.
pub struct Connection {
    pub session: DbgpSession,
    pub peer: SocketAddr,
    /// The engine's handshake, when it could be read.
    pub init: Option<InitPacket>,
}

/// Binds, announces readiness, and accepts a single engine connection.
#[derive(Debug, Clone)]
pub struct ListenerRole {
    bind: SocketAddr,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl ListenerRole {
    #[must_use]
    pub const fn new(bind: SocketAddr, connect_timeout: Duration, command_timeout: Duration) -> Self {
        Self {
            bind,
            connect_timeout,
            command_timeout,
        }
    }

    /// Run the role to completion.
    ///
    /// `ready` fires with the bound address as soon as the socket listens.
    /// `connected` fires with the accepted connection. When nobody is left
    /// to receive it, the connection is handed back instead so the caller
    /// can release it.
    ///
    /// # Errors
    /// Returns error if binding fails or no engine connects within the
    /// connect timeout.
    pub async fn run(
        self,
        ready: oneshot::Sender<SocketAddr>,
        connected: oneshot::Sender<Connection>,
    ) -> Result<Option<Connection>, RoleError> {
        let listener = TcpListener::bind(self.bind)
            .await
            .map_err(|source| RoleError::Bind {
                addr: self.bind,
                source,
            })?;
        let local = listener.local_addr()?;
        tracing::info!(%local, "Listening for debug engine");

        if ready.send(local).is_err() {
            tracing::warn!("Nobody is waiting for listener-ready");
        }

        let accepted = tokio::time::timeout(self.connect_timeout, listener.accept()).await;
        drop(listener);

        let (stream, peer) = match accepted {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(e)) => {
                tracing::error!("Accept failed: {e}");
                return Err(RoleError::Io(e));
            }
            Err(_) => {
                tracing::error!(timeout = ?self.connect_timeout, "No debug engine connected");
                return Err(RoleError::Timeout {
                    after: self.connect_timeout,
                    waiting_for: "engine connection",
                });
            }
        };
        tracing::info!(%peer, "Debug engine connected; listener closed");

        let mut session = DbgpSession::new(stream, self.command_timeout);
        let init = match session.read_init(self.command_timeout).await {
            Ok(Some(init)) => {
                tracing::info!(
                    language = ?init.language,
                    engine = ?init.engine,
                    fileuri = ?init.fileuri,
                    "Engine handshake received"
                );
                Some(init)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Could not read engine handshake: {e}");
                None
            }
        };

        match connected.send(Connection { session, peer, init }) {
            Ok(()) => Ok(None),
            Err(orphan) => {
                tracing::warn!(%peer, "Controller is gone; returning connection for cleanup");
                Ok(Some(orphan))
            }
        }
    }
}
