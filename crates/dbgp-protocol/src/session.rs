//! Transaction-correlated command/response exchange with one engine.

use std::{path::Path, time::Duration};

use futures::SinkExt;
use serde::Serialize;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    time::Instant,
};
use tokio_util::codec::Framed;

use crate::{
    ClientCodec, Command, DbgpError, read_frame,
    response::{Breakpoint, InitPacket, Response, StackFrame, Status, Variable},
    uri::to_file_uri,
};

/// Whether the engine connection can still carry commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// One engine connection plus its transaction counter.
///
/// Transaction ids start at 1 and are never reused. A transport failure or
/// timeout leaves the session `Disconnected`; it is not reused after that.
pub struct DbgpSession<T = TcpStream> {
    frames: Framed<T, ClientCodec>,
    next_transaction_id: u32,
    state: ConnectionState,
    last_status: Option<Status>,
    command_timeout: Duration,
}

impl<T> DbgpSession<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a freshly accepted engine connection.
    #[must_use]
    pub fn new(io: T, command_timeout: Duration) -> Self {
        Self {
            frames: Framed::new(io, ClientCodec::new()),
            next_transaction_id: 1,
            state: ConnectionState::Connected,
            last_status: None,
            command_timeout,
        }
    }

    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected)
    }

    /// Most recent execution status the engine reported.
    #[must_use]
    pub const fn last_status(&self) -> Option<Status> {
        self.last_status
    }

    /// Id the next command will carry.
    #[must_use]
    pub const fn next_transaction_id(&self) -> u32 {
        self.next_transaction_id
    }

    /// Read the engine's `<init>` handshake.
    ///
    /// Returns `Ok(None)` when a frame arrived but was not a usable handshake.
    ///
    /// # Errors
    /// Returns error if no frame arrives within `deadline`.
    pub async fn read_init(&mut self, deadline: Duration) -> Result<Option<InitPacket>, DbgpError> {
        let frame = match read_frame(&mut self.frames, deadline).await {
            Ok(frame) => frame,
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                return Err(e);
            }
        };
        let response = Response::from_xml(&String::from_utf8_lossy(&frame));
        let init = response.root.as_ref().and_then(InitPacket::from_node);
        if init.is_none() {
            tracing::warn!(kind = ?response.kind(), "Engine handshake was not an <init> packet");
        }
        Ok(init)
    }

    /// Send one command and wait for its response.
    ///
    /// Engine-reported `<error>` elements are logged and returned inside the
    /// `Response`; only transport failures are errors.
    ///
    /// # Errors
    /// Returns `NotConnected` on a dead session, `Timeout` when no response
    /// arrives within the command timeout, or the transport error.
    pub async fn send(
        &mut self,
        name: &str,
        args: &[(char, &str)],
        data: Option<&[u8]>,
    ) -> Result<Response, DbgpError> {
        if !self.is_connected() {
            return Err(DbgpError::NotConnected);
        }
        let transaction_id = self.next_transaction_id;
        self.next_transaction_id = transaction_id
            .checked_add(1)
            .ok_or_else(|| DbgpError::Protocol("transaction ids exhausted".to_string()))?;

        let mut command =
            Command::new(name, transaction_id).with_args(args.iter().map(|&(f, v)| (f, v)));
        if let Some(data) = data {
            command = command.with_data(data);
        }

        match self.exchange(&command).await {
            Ok(response) => {
                if let Some(status) = response.status {
                    self.last_status = Some(status);
                }
                Ok(response)
            }
            Err(e) => {
                tracing::warn!(txid = transaction_id, command = name, "Command failed: {e}");
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    async fn exchange(&mut self, command: &Command) -> Result<Response, DbgpError> {
        let txid = command.transaction_id;
        let deadline = Instant::now() + self.command_timeout;
        tracing::debug!(txid, command = %command.name, "Sending command");

        tokio::time::timeout(self.command_timeout, self.frames.send(command))
            .await
            .map_err(|_| DbgpError::Timeout {
                after: self.command_timeout,
                waiting_for: "command write",
            })??;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let frame = read_frame(&mut self.frames, remaining)
                .await
                .map_err(|e| match e {
                    DbgpError::Timeout { .. } => DbgpError::Timeout {
                        after: self.command_timeout,
                        waiting_for: "engine response",
                    },
                    other => other,
                })?;
            let response = Response::from_xml(&String::from_utf8_lossy(&frame));

            if let Some(kind @ ("stream" | "notify")) = response.kind() {
                tracing::debug!(txid, kind, "Skipping out-of-band packet");
                continue;
            }
            if let Some(error) = &response.error {
                tracing::warn!(txid, command = %command.name, %error, "Engine reported an error");
            }
            if let Some(echoed) = response.transaction_id {
                if echoed != txid {
                    tracing::warn!(txid, echoed, "Response transaction id mismatch");
                }
            }
            tracing::debug!(txid, status = ?response.status, "Received response");
            return Ok(response);
        }
    }

    /// Run a continuation command unless the script is already done.
    ///
    /// On a finished or dead session this returns a completion response
    /// without touching the socket.
    async fn resume(&mut self, name: &str) -> Result<Response, DbgpError> {
        if !self.is_connected() {
            tracing::info!(command = name, "Session disconnected; nothing to resume");
            return Ok(Response::empty());
        }
        if let Some(status) = self.last_status.filter(|s| s.is_terminal()) {
            tracing::info!(command = name, %status, "Script already finished; not sending");
            return Ok(Response {
                status: Some(status),
                ..Response::empty()
            });
        }
        self.send(name, &[], None).await
    }

    /// Resume until the next breakpoint or the end of the script.
    ///
    /// # Errors
    /// Returns the transport error, if any.
    pub async fn continue_execution(&mut self) -> Result<Response, DbgpError> {
        self.resume("run").await
    }

    /// # Errors
    /// Returns the transport error, if any.
    pub async fn step_into(&mut self) -> Result<Response, DbgpError> {
        self.resume("step_into").await
    }

    /// # Errors
    /// Returns the transport error, if any.
    pub async fn step_over(&mut self) -> Result<Response, DbgpError> {
        self.resume("step_over").await
    }

    /// # Errors
    /// Returns the transport error, if any.
    pub async fn step_out(&mut self) -> Result<Response, DbgpError> {
        self.resume("step_out").await
    }

    /// Ask the engine for its current status.
    ///
    /// # Errors
    /// Returns the transport error, if any.
    pub async fn status(&mut self) -> Result<Response, DbgpError> {
        self.send("status", &[], None).await
    }

    /// Set a line breakpoint. Returns the engine-assigned id, or `None` if
    /// the engine refused it.
    ///
    /// # Errors
    /// Returns the transport error, if any.
    pub async fn set_breakpoint(
        &mut self,
        file: &Path,
        line: u32,
    ) -> Result<Option<String>, DbgpError> {
        let uri = to_file_uri(file);
        let line = line.to_string();
        let response = self
            .send("breakpoint_set", &[('t', "line"), ('f', &uri), ('n', &line)], None)
            .await?;
        Ok(breakpoint_id(&response, &uri, &line))
    }

    /// Set a breakpoint that only fires when `condition` holds.
    ///
    /// # Errors
    /// Returns the transport error, if any.
    pub async fn set_conditional_breakpoint(
        &mut self,
        file: &Path,
        line: u32,
        condition: &str,
    ) -> Result<Option<String>, DbgpError> {
        let uri = to_file_uri(file);
        let line = line.to_string();
        let response = self
            .send(
                "breakpoint_set",
                &[('t', "conditional"), ('f', &uri), ('n', &line)],
                Some(condition.as_bytes()),
            )
            .await?;
        Ok(breakpoint_id(&response, &uri, &line))
    }

    /// Remove a breakpoint by id. Returns whether the engine accepted it.
    ///
    /// # Errors
    /// Returns the transport error, if any.
    pub async fn remove_breakpoint(&mut self, id: &str) -> Result<bool, DbgpError> {
        let response = self.send("breakpoint_remove", &[('d', id)], None).await?;
        Ok(response.error.is_none())
    }

    /// # Errors
    /// Returns the transport error, if any.
    pub async fn list_breakpoints(&mut self) -> Result<Vec<Breakpoint>, DbgpError> {
        Ok(self.send("breakpoint_list", &[], None).await?.breakpoints())
    }

    /// Current call stack, innermost frame first.
    ///
    /// # Errors
    /// Returns the transport error, if any.
    pub async fn stack_get(&mut self) -> Result<Vec<StackFrame>, DbgpError> {
        Ok(self.send("stack_get", &[], None).await?.stack_frames())
    }

    /// Available variable contexts (locals, superglobals, ...).
    ///
    /// # Errors
    /// Returns the transport error, if any.
    pub async fn context_names(&mut self, depth: u32) -> Result<Vec<(u32, String)>, DbgpError> {
        let depth = depth.to_string();
        Ok(self
            .send("context_names", &[('d', &depth)], None)
            .await?
            .contexts())
    }

    /// Variables in one context at one stack depth. Context 0 is locals.
    ///
    /// # Errors
    /// Returns the transport error, if any.
    pub async fn context_get(
        &mut self,
        depth: u32,
        context_id: u32,
    ) -> Result<Vec<Variable>, DbgpError> {
        let (depth, context_id) = (depth.to_string(), context_id.to_string());
        Ok(self
            .send("context_get", &[('d', &depth), ('c', &context_id)], None)
            .await?
            .variables())
    }

    /// Fetch one variable by its full name.
    ///
    /// # Errors
    /// Returns the transport error, if any.
    pub async fn property_get(
        &mut self,
        fullname: &str,
        depth: u32,
    ) -> Result<Option<Variable>, DbgpError> {
        let depth = depth.to_string();
        let response = self
            .send("property_get", &[('n', fullname), ('d', &depth)], None)
            .await?;
        Ok(response.variables().into_iter().next())
    }

    /// Evaluate an expression in the current frame.
    ///
    /// # Errors
    /// Returns the transport error, if any.
    pub async fn eval(&mut self, expression: &str) -> Result<Response, DbgpError> {
        self.send("eval", &[], Some(expression.as_bytes())).await
    }

    /// Read an engine feature. `None` when unsupported.
    ///
    /// # Errors
    /// Returns the transport error, if any.
    pub async fn feature_get(&mut self, name: &str) -> Result<Option<String>, DbgpError> {
        let response = self.send("feature_get", &[('n', name)], None).await?;
        if response.error.is_some() || response.attr("supported") == Some("0") {
            return Ok(None);
        }
        Ok(response.text().map(|t| t.trim().to_string()))
    }

    /// Set an engine feature. Returns whether the engine accepted it.
    ///
    /// # Errors
    /// Returns the transport error, if any.
    pub async fn feature_set(&mut self, name: &str, value: &str) -> Result<bool, DbgpError> {
        let response = self
            .send("feature_set", &[('n', name), ('v', value)], None)
            .await?;
        Ok(response.is_success())
    }

    /// Path of the profiler output file, when profiling is active.
    ///
    /// # Errors
    /// Returns the transport error, if any.
    pub async fn profiler_filename(&mut self) -> Result<Option<String>, DbgpError> {
        let response = self.send("xcmd_profiler_name_get", &[], None).await?;
        if response.error.is_some() {
            return Ok(None);
        }
        Ok(response
            .text()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()))
    }

    /// Start collecting code coverage in the debuggee.
    ///
    /// # Errors
    /// Returns the transport error, if any.
    pub async fn start_code_coverage(&mut self) -> Result<bool, DbgpError> {
        let response = self.eval("xdebug_start_code_coverage()").await?;
        Ok(response.error.is_none())
    }

    /// Coverage collected so far, as an expandable property tree.
    ///
    /// # Errors
    /// Returns the transport error, if any.
    pub async fn code_coverage(&mut self) -> Result<Response, DbgpError> {
        self.eval("xdebug_get_code_coverage()").await
    }

    /// # Errors
    /// Returns the transport error, if any.
    pub async fn stop_code_coverage(&mut self) -> Result<bool, DbgpError> {
        let response = self.eval("xdebug_stop_code_coverage()").await?;
        Ok(response.error.is_none())
    }

    /// Ask the engine to end the script.
    ///
    /// # Errors
    /// Returns the transport error, if any.
    pub async fn stop(&mut self) -> Result<Response, DbgpError> {
        self.send("stop", &[], None).await
    }

    /// Release the debuggee and stop talking to the engine.
    ///
    /// The session is `Disconnected` afterwards whatever the outcome.
    ///
    /// # Errors
    /// Returns the transport error, if any.
    pub async fn detach(&mut self) -> Result<Response, DbgpError> {
        let result = self.send("detach", &[], None).await;
        self.state = ConnectionState::Disconnected;
        result
    }

    /// Shut the connection down.
    pub async fn close(mut self) {
        self.state = ConnectionState::Disconnected;
        if let Err(e) = self.frames.get_mut().shutdown().await {
            tracing::debug!("Engine socket shutdown failed: {e}");
        }
    }
}

fn breakpoint_id(response: &Response, uri: &str, line: &str) -> Option<String> {
    if let Some(error) = &response.error {
        tracing::warn!(%uri, line, %error, "Breakpoint rejected");
        return None;
    }
    let id = response.attr("id").map(str::to_string);
    if id.is_none() {
        tracing::warn!(%uri, line, "Breakpoint response carried no id");
    }
    id
}
