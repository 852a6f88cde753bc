//! Session controller: breakpoint, continue, and a bounded step trace.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use dbgp_core::SessionConfig;
use dbgp_protocol::{
    DbgpError, DbgpSession, InitPacket, Response, StackFrame, Status, is_execution_complete,
};
use serde::Serialize;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::oneshot,
};

use crate::{Connection, RoleError, signal::wait_for};

/// Controller phases, in the order they are entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    AwaitingConnection,
    InitialBreakpointSet,
    Running,
    Stepping,
    Completed,
}

/// What the controller observed while driving the script.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Trace {
    pub states: Vec<ControllerState>,
    pub breakpoint_id: Option<String>,
    /// Number of `step_into` commands issued.
    pub steps: u32,
    /// Innermost frame at each stop, in order.
    pub stops: Vec<StackFrame>,
    pub final_status: Option<Status>,
    /// Whether the engine reported the script finished.
    pub completed: bool,
    pub engine: Option<InitPacket>,
}

impl Trace {
    fn enter(&mut self, state: ControllerState) {
        tracing::debug!(?state, "Controller state");
        self.states.push(state);
    }

    /// Record a continuation response; returns whether execution is over.
    fn observe(&mut self, response: &Response) -> bool {
        if let Some(status) = response.status {
            self.final_status = Some(status);
        }
        self.completed = is_execution_complete(response);
        self.completed
    }
}

/// Drives one engine connection through the step-trace sequence.
#[derive(Debug, Clone)]
pub struct Controller {
    script: PathBuf,
    initial_breakpoint_line: Option<u32>,
    max_steps: u32,
    step_delay: Duration,
    connection_wait_timeout: Duration,
}

impl Controller {
    #[must_use]
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            script: config.script_path.clone(),
            initial_breakpoint_line: config.initial_breakpoint_line,
            max_steps: config.max_steps,
            step_delay: config.step_delay(),
            connection_wait_timeout: config.connection_wait_timeout(),
        }
    }

    /// Wait for the engine connection and drive it to completion.
    ///
    /// The session is handed back whenever one was received, so the caller
    /// can detach and close it whatever the outcome.
    pub async fn run(
        &self,
        connected: oneshot::Receiver<Connection>,
    ) -> (Option<DbgpSession>, Result<Trace, RoleError>) {
        let mut trace = Trace::default();
        trace.enter(ControllerState::AwaitingConnection);

        let connection =
            match wait_for(connected, self.connection_wait_timeout, "engine-connected").await {
                Ok(connection) => connection,
                Err(e) => return (None, Err(e)),
            };
        tracing::info!(peer = %connection.peer, "Controller has the engine connection");
        trace.engine = connection.init;

        let mut session = connection.session;
        let result = self.drive(&mut session, &mut trace).await;
        (Some(session), result.map(|()| trace))
    }

    async fn drive<T>(
        &self,
        session: &mut DbgpSession<T>,
        trace: &mut Trace,
    ) -> Result<(), RoleError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        self.step_trace(session, trace).await?;
        trace.enter(ControllerState::Completed);
        Ok(())
    }

    async fn step_trace<T>(
        &self,
        session: &mut DbgpSession<T>,
        trace: &mut Trace,
    ) -> Result<(), RoleError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        if let Some(line) = self.initial_breakpoint_line {
            let id = soften(session.set_breakpoint(&self.script, line).await, "breakpoint_set")?
                .flatten();
            match &id {
                Some(id) => tracing::info!(%id, line, "Initial breakpoint set"),
                None => tracing::warn!(line, "Initial breakpoint not set; running without it"),
            }
            trace.breakpoint_id = id;
            trace.enter(ControllerState::InitialBreakpointSet);
        }

        trace.enter(ControllerState::Running);
        let response = soften(session.continue_execution().await, "run")?.unwrap_or_default();
        if trace.observe(&response) {
            tracing::info!(status = ?response.status, "Script finished before stepping");
            return Ok(());
        }

        trace.enter(ControllerState::Stepping);
        for step in 1..=self.max_steps {
            if !self.snapshot(session, trace, step).await? {
                tracing::info!(step, "Empty stack; script finished");
                trace.completed = true;
                return Ok(());
            }

            let response = soften(session.step_into().await, "step_into")?.unwrap_or_default();
            trace.steps = step;
            if trace.observe(&response) {
                tracing::info!(step, status = ?response.status, "Script finished while stepping");
                return Ok(());
            }
            tokio::time::sleep(self.step_delay).await;
        }

        tracing::info!(max_steps = self.max_steps, "Step budget exhausted; continuing to the end");
        let response = soften(session.continue_execution().await, "run")?.unwrap_or_default();
        trace.observe(&response);
        if !trace.completed {
            tracing::warn!(status = ?response.status, "Script still paused after final continue");
        }
        Ok(())
    }

    /// Log the current stack and locals. Returns false on an empty stack.
    async fn snapshot<T>(
        &self,
        session: &mut DbgpSession<T>,
        trace: &mut Trace,
        step: u32,
    ) -> Result<bool, RoleError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let frames = soften(session.stack_get().await, "stack_get")?.unwrap_or_default();
        let Some(top) = frames.first() else {
            return Ok(false);
        };
        tracing::info!(step, depth = frames.len(), frame = %top, "Stopped");
        if is_outside(&self.script, top) {
            tracing::debug!(step, file = %top.filename, "Stopped outside the target script");
        }
        trace.stops.push(top.clone());

        let locals = soften(session.context_get(0, 0).await, "context_get")?.unwrap_or_default();
        for variable in &locals {
            tracing::debug!(step, "{variable}");
        }
        Ok(true)
    }
}

fn is_outside(script: &Path, frame: &StackFrame) -> bool {
    script
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| !frame.filename.ends_with(name))
}

/// Downgrade a recoverable command failure to "no response".
///
/// A lost connection still propagates.
fn soften<R>(result: Result<R, DbgpError>, command: &'static str) -> Result<Option<R>, RoleError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_connection_lost() => {
            tracing::error!(command, "Engine connection lost: {e}");
            Err(RoleError::Protocol(e))
        }
        Err(e) => {
            tracing::warn!(command, "Command failed; treating as empty response: {e}");
            Ok(None)
        }
    }
}
