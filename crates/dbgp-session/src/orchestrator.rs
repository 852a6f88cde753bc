//! Runs the listener, executor and controller roles as one session.

use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use dbgp_core::{MsgStore, SessionConfig};
use dbgp_executor::{DebugRuntime, ExitOutcome, TargetExecutor};
use dbgp_protocol::DbgpSession;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::Instrument;
use uuid::Uuid;

use crate::{Controller, DebugSessionError, ListenerRole, Role, RoleError, Trace, launch_target};

/// Outcome of a successful session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub trace: Trace,
    pub target_exit: Option<ExitOutcome>,
    /// Everything the target wrote to stdout.
    pub target_stdout: String,
}

/// Wires the three roles together for one debug session.
pub struct Orchestrator {
    config: SessionConfig,
    executor: TargetExecutor,
}

impl Orchestrator {
    #[must_use]
    pub fn new(config: SessionConfig, runtime: Arc<dyn DebugRuntime>) -> Self {
        Self {
            config,
            executor: TargetExecutor::new(runtime, Arc::new(MsgStore::new())),
        }
    }

    /// Captured target output, live.
    #[must_use]
    pub fn output(&self) -> Arc<MsgStore> {
        self.executor.output()
    }

    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run one session to the end.
    ///
    /// All three roles run to completion; none is cancelled because a
    /// sibling failed. Whichever role ends up holding the engine connection
    /// detaches it as soon as that role finishes, while the target may
    /// still be running.
    ///
    /// # Errors
    /// Returns the first role failure, in the order failures happened.
    pub async fn run_session(&self) -> Result<SessionReport, DebugSessionError> {
        let session_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "debug_session",
            %session_id,
            script = %self.config.script_path.display()
        );
        self.run_roles(session_id).instrument(span).await
    }

    async fn run_roles(&self, session_id: Uuid) -> Result<SessionReport, DebugSessionError> {
        let config = &self.config;
        tracing::info!(
            port = config.port,
            breakpoint = ?config.initial_breakpoint_line,
            max_steps = config.max_steps,
            "Starting debug session"
        );

        let (ready_tx, ready_rx) = oneshot::channel();
        let (connected_tx, connected_rx) = oneshot::channel();
        let first_failure = OnceLock::new();

        let listener = ListenerRole::new(
            config.bind_addr(),
            config.connect_timeout(),
            config.command_timeout(),
        );
        let controller = Controller::new(config);

        let listening = async {
            let result = listener.run(ready_tx, connected_tx).await;
            note_failure(&first_failure, Role::Listener, &result);
            let (result, orphan) = match result {
                Ok(orphan) => (Ok(()), orphan.map(|connection| connection.session)),
                Err(e) => (Err(e), None),
            };
            if let Some(orphan) = orphan {
                release(orphan, config.command_timeout()).await;
            }
            result
        };
        let launching = async {
            let result = launch_target(
                &self.executor,
                &config.script_path,
                &config.idekey,
                ready_rx,
                config.ready_timeout(),
                config.execution_timeout(),
            )
            .await;
            note_failure(&first_failure, Role::Executor, &result);
            result
        };
        let controlling = async {
            let (session, result) = controller.run(connected_rx).await;
            note_failure(&first_failure, Role::Controller, &result);
            if let Some(session) = session {
                release(session, config.command_timeout()).await;
            }
            result
        };

        let (listened, launched, controlled) = tokio::join!(listening, launching, controlling);

        let mut failures = Vec::new();
        if let Err(e) = listened {
            failures.push((Role::Listener, e));
        }

        let target_exit = match launched {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                failures.push((Role::Executor, e));
                None
            }
        };
        let trace = match controlled {
            Ok(trace) => trace,
            Err(e) => {
                failures.push((Role::Controller, e));
                Trace::default()
            }
        };

        if let Some(error) = first_of(failures, first_failure.get().copied()) {
            tracing::error!(role = %error.role, "Debug session failed: {}", error.source);
            return Err(error);
        }

        if let Some(exit) = target_exit.filter(|exit| !exit.success) {
            tracing::warn!(code = ?exit.code, "Target exited unsuccessfully");
        }
        tracing::info!(
            steps = trace.steps,
            completed = trace.completed,
            status = ?trace.final_status,
            "Debug session finished"
        );
        Ok(SessionReport {
            session_id,
            trace,
            target_exit,
            target_stdout: self.executor.output().stdout_text(),
        })
    }
}

fn note_failure<T>(first: &OnceLock<Role>, role: Role, result: &Result<T, RoleError>) {
    if let Err(e) = result {
        tracing::warn!(%role, "Role failed: {e}");
        if first.set(role).is_ok() {
            tracing::debug!(%role, "First failing role");
        }
    }
}

/// Pick the failure that happened first and log the rest.
fn first_of(failures: Vec<(Role, RoleError)>, first: Option<Role>) -> Option<DebugSessionError> {
    let index = first
        .and_then(|first| failures.iter().position(|(role, _)| *role == first))
        .unwrap_or(0);
    let mut primary = None;
    for (i, (role, error)) in failures.into_iter().enumerate() {
        if i == index {
            primary = Some(DebugSessionError::new(role, error));
        } else {
            tracing::info!(%role, "Also failed: {error}");
        }
    }
    primary
}

/// Best-effort detach, then close.
async fn release(mut session: DbgpSession, timeout: Duration) {
    if session.is_connected() {
        match tokio::time::timeout(timeout, session.detach()).await {
            Ok(Ok(_)) => tracing::debug!("Detached from engine"),
            Ok(Err(e)) => tracing::debug!("Detach failed: {e}"),
            Err(_) => tracing::debug!(?timeout, "Detach timed out"),
        }
    }
    session.close().await;
    tracing::info!("Engine connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeout() -> RoleError {
        RoleError::Timeout {
            after: Duration::from_secs(1),
            waiting_for: "engine connection",
        }
    }

    #[test]
    fn test_first_failure_wins_over_collection_order() {
        let failures = vec![
            (Role::Listener, timeout()),
            (Role::Controller, RoleError::SignalDropped("engine-connected")),
        ];
        let error = first_of(failures, Some(Role::Controller)).unwrap();
        assert_eq!(error.role, Role::Controller);
        assert!(matches!(error.source, RoleError::SignalDropped(_)));
    }

    #[test]
    fn test_no_failures() {
        assert!(first_of(Vec::new(), None).is_none());
    }

    #[test]
    fn test_is_timeout() {
        let error = first_of(vec![(Role::Listener, timeout())], Some(Role::Listener)).unwrap();
        assert!(error.is_timeout());
    }
}
