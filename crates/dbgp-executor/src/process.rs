//! Target process supervision.

use std::{path::Path, process::Stdio, sync::Arc, time::Duration};

use command_group::{AsyncCommandGroup, AsyncGroupChild};
use dbgp_core::MsgStore;
use serde::Serialize;
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
    task::JoinHandle,
};

use crate::{
    command::CommandBuildError,
    runtime::{DebugEndpoint, DebugRuntime},
};

/// How long to wait for output pipes to drain once the target has exited.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Executor error.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),
    #[error("Command build error: {0}")]
    CommandBuild(#[from] CommandBuildError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Target still running after {0:?}")]
    Timeout(Duration),
}

/// How the target process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExitOutcome {
    /// Exit code, `None` when terminated by a signal.
    pub code: Option<i32>,
    pub success: bool,
}

/// Spawns debug targets and captures their output.
#[derive(Clone)]
pub struct TargetExecutor {
    runtime: Arc<dyn DebugRuntime>,
    output: Arc<MsgStore>,
}

impl TargetExecutor {
    /// Create an executor writing captured output into `output`.
    #[must_use]
    pub fn new(runtime: Arc<dyn DebugRuntime>, output: Arc<MsgStore>) -> Self {
        Self { runtime, output }
    }

    /// Captured target output.
    #[must_use]
    pub fn output(&self) -> Arc<MsgStore> {
        Arc::clone(&self.output)
    }

    /// Run `script` with debugging pointed at `endpoint` and wait for it.
    ///
    /// A non-zero exit is logged and returned, not treated as an error.
    ///
    /// # Errors
    /// Returns error if the command cannot be built or spawned, or the
    /// process outlives `timeout` (it is killed first).
    pub async fn run(
        &self,
        script: &Path,
        endpoint: &DebugEndpoint,
        timeout: Duration,
    ) -> Result<ExitOutcome, ExecutorError> {
        let spec = self.runtime.launch_spec(script, endpoint).await?;
        tracing::info!(
            runtime = self.runtime.name(),
            program = %spec.program.display(),
            port = endpoint.addr.port(),
            "Launching debug target"
        );

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .group_spawn()
            .map_err(|e| ExecutorError::SpawnFailed(format!("{}: {e}", spec.program.display())))?;

        let forwarders = [
            child
                .inner()
                .stdout
                .take()
                .map(|out| self.forward(out, OutputStream::Stdout)),
            child
                .inner()
                .stderr
                .take()
                .map(|err| self.forward(err, OutputStream::Stderr)),
        ];

        let result = wait_bounded(&mut child, timeout).await;

        for forwarder in forwarders.into_iter().flatten() {
            if tokio::time::timeout(DRAIN_TIMEOUT, forwarder).await.is_err() {
                tracing::debug!("Output forwarder still open after exit; leaving it");
            }
        }

        match &result {
            Ok(outcome) => {
                self.output.push_exited(outcome.code);
                if outcome.success {
                    tracing::info!(code = ?outcome.code, "Debug target exited");
                } else {
                    tracing::warn!(code = ?outcome.code, "Debug target exited with failure");
                }
            }
            Err(e) => tracing::error!("Debug target did not finish cleanly: {e}"),
        }
        self.output.push_finished();
        result
    }

    fn forward<R>(&self, reader: R, stream: OutputStream) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let store = Arc::clone(&self.output);
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        tracing::info!(target: "dbgp::target", stream = stream.as_str(), "{line}");
                        match stream {
                            OutputStream::Stdout => store.push_stdout(line),
                            OutputStream::Stderr => store.push_stderr(line),
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!(stream = stream.as_str(), "Output read failed: {e}");
                        break;
                    }
                }
            }
        })
    }
}

async fn wait_bounded(
    child: &mut AsyncGroupChild,
    timeout: Duration,
) -> Result<ExitOutcome, ExecutorError> {
    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => Ok(ExitOutcome {
            code: status.code(),
            success: status.success(),
        }),
        Ok(Err(e)) => Err(ExecutorError::Io(e)),
        Err(_) => {
            tracing::warn!(?timeout, "Debug target timed out; killing process group");
            if let Err(e) = child.kill().await {
                tracing::warn!("Failed to kill debug target: {e}");
            }
            Err(ExecutorError::Timeout(timeout))
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use async_trait::async_trait;
    use dbgp_core::LogMsg;

    use super::*;
    use crate::{LaunchSpec, resolve_executable_path};

    /// Runs `sh -c <script>` with the endpoint exported as env.
    struct ShellRuntime(&'static str);

    #[async_trait]
    impl DebugRuntime for ShellRuntime {
        fn name(&self) -> &str {
            "sh"
        }

        async fn launch_spec(
            &self,
            _script: &Path,
            endpoint: &DebugEndpoint,
        ) -> Result<LaunchSpec, ExecutorError> {
            let program = resolve_executable_path("sh")
                .await
                .ok_or_else(|| ExecutorError::SpawnFailed("no sh".into()))?;
            Ok(LaunchSpec {
                program,
                args: vec!["-c".into(), self.0.into()],
                env: vec![("DEBUG_PORT".into(), endpoint.addr.port().to_string())],
                working_dir: None,
            })
        }
    }

    fn executor(script: &'static str) -> TargetExecutor {
        TargetExecutor::new(Arc::new(ShellRuntime(script)), Arc::new(MsgStore::new()))
    }

    fn endpoint() -> DebugEndpoint {
        DebugEndpoint::new("127.0.0.1:9555".parse().unwrap(), "k")
    }

    #[tokio::test]
    async fn test_output_is_captured_and_env_is_passed() {
        let executor = executor("echo port=$DEBUG_PORT; echo oops >&2");
        let outcome = executor
            .run(Path::new("t.php"), &endpoint(), Duration::from_secs(10))
            .await
            .unwrap();

        assert!(outcome.success);
        let history = executor.output().get_history();
        assert!(history.contains(&LogMsg::Stdout("port=9555".into())));
        assert!(history.contains(&LogMsg::Stderr("oops".into())));
        assert_eq!(history.last(), Some(&LogMsg::Finished));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_not_an_error() {
        let executor = executor("exit 3");
        let outcome = executor
            .run(Path::new("t.php"), &endpoint(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(outcome.code, Some(3));
        assert!(!outcome.success);
        assert!(executor.output().get_history().contains(&LogMsg::Exited(Some(3))));
    }

    #[tokio::test]
    async fn test_runaway_target_is_killed() {
        let executor = executor("sleep 30");
        let started = std::time::Instant::now();
        let result = executor
            .run(Path::new("t.php"), &endpoint(), Duration::from_millis(300))
            .await;
        assert!(matches!(result, Err(ExecutorError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
