//! Full sessions against an in-process fake engine.
#![cfg(unix)]

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use dbgp_core::SessionConfig;
use dbgp_executor::{
    DebugEndpoint, DebugRuntime, ExecutorError, LaunchSpec, resolve_executable_path,
};
use dbgp_protocol::{Command, EngineCodec, Status};
use dbgp_session::{ControllerState, Orchestrator, Role};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

const SCRIPT: &str = "/srv/app/t.php";

/// Pretends to be a script whose executable lines run from 2 to `last_line`.
#[derive(Clone)]
struct FakeEngine {
    last_line: u32,
    /// Keep reporting `break` on every resume, like a script stuck in a loop.
    looping: bool,
    /// Touched when `detach` arrives.
    detach_marker: Option<PathBuf>,
    received: Arc<Mutex<Vec<String>>>,
}

#[derive(Default)]
struct Position {
    line: Option<u32>,
    breakpoint: Option<u32>,
    done: bool,
}

impl FakeEngine {
    fn new(last_line: u32) -> Self {
        Self {
            last_line,
            looping: false,
            detach_marker: None,
            received: Arc::default(),
        }
    }

    fn looping(marker: PathBuf) -> Self {
        Self {
            looping: true,
            detach_marker: Some(marker),
            ..Self::new(u32::MAX)
        }
    }

    fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    fn count(&self, name: &str) -> usize {
        self.received().iter().filter(|c| *c == name).count()
    }

    async fn serve(self, addr: SocketAddr) {
        let Ok(stream) = TcpStream::connect(addr).await else {
            return;
        };
        let mut framed = Framed::new(stream, EngineCodec::new());
        let init = format!(
            r#"<init appid="42" idekey="dbgp-driver" language="PHP" protocol_version="1.0" fileuri="file://{SCRIPT}"><engine version="3.3.1"><![CDATA[Xdebug]]></engine></init>"#
        );
        if framed.send(Bytes::from(init)).await.is_err() {
            return;
        }

        let mut position = Position::default();
        while let Some(Ok(command)) = framed.next().await {
            self.received.lock().unwrap().push(command.name.clone());
            let reply = self.answer(&mut position, &command);
            if framed.send(Bytes::from(reply)).await.is_err() || command.name == "detach" {
                break;
            }
        }
    }

    fn answer(&self, position: &mut Position, command: &Command) -> String {
        let txid = command.transaction_id;
        let name = command.name.as_str();
        match name {
            "breakpoint_set" => {
                position.breakpoint = command.arg('n').and_then(|n| n.parse().ok());
                format!(
                    r#"<response command="breakpoint_set" transaction_id="{txid}" state="enabled" id="1"/>"#
                )
            }
            "run" if self.looping => {
                position.line = position.breakpoint.or(position.line).or(Some(2));
                status_reply(name, txid, "break")
            }
            "run" => {
                let target = position.breakpoint.filter(|&bp| {
                    !position.done
                        && bp <= self.last_line
                        && position.line.is_none_or(|line| line < bp)
                });
                let status = if let Some(bp) = target {
                    position.line = Some(bp);
                    "break"
                } else {
                    position.line = None;
                    position.done = true;
                    "stopping"
                };
                status_reply(name, txid, status)
            }
            "step_into" => {
                let status = match position.line {
                    Some(line) if line < self.last_line => {
                        position.line = Some(line + 1);
                        "break"
                    }
                    _ => {
                        position.line = None;
                        position.done = true;
                        "stopping"
                    }
                };
                status_reply(name, txid, status)
            }
            "stack_get" => match position.line {
                Some(line) => format!(
                    r#"<response command="stack_get" transaction_id="{txid}"><stack where="{{main}}" level="0" type="file" filename="file://{SCRIPT}" lineno="{line}"/></response>"#
                ),
                None => format!(r#"<response command="stack_get" transaction_id="{txid}"/>"#),
            },
            "context_get" => format!(
                r#"<response command="context_get" transaction_id="{txid}" context="0"><property name="$i" fullname="$i" type="int"><![CDATA[{}]]></property></response>"#,
                position.line.unwrap_or_default()
            ),
            "detach" => {
                if let Some(marker) = &self.detach_marker {
                    std::fs::write(marker, b"").unwrap();
                }
                status_reply(name, txid, "stopped")
            }
            _ => format!(r#"<response command="{name}" transaction_id="{txid}" success="1"/>"#),
        }
    }
}

fn status_reply(command: &str, txid: u32, status: &str) -> String {
    format!(
        r#"<response command="{command}" transaction_id="{txid}" status="{status}" reason="ok"/>"#
    )
}

/// Starts the fake engine alongside a trivial shell "target".
struct FakeRuntime {
    engine: Option<FakeEngine>,
    exit_code: i32,
    /// Replaces the default `echo hello` target script.
    script: Option<String>,
}

#[async_trait]
impl DebugRuntime for FakeRuntime {
    fn name(&self) -> &str {
        "fake"
    }

    async fn launch_spec(
        &self,
        _script: &Path,
        endpoint: &DebugEndpoint,
    ) -> Result<LaunchSpec, ExecutorError> {
        if let Some(engine) = &self.engine {
            tokio::spawn(engine.clone().serve(endpoint.addr));
        }
        let program = resolve_executable_path("sh")
            .await
            .ok_or_else(|| ExecutorError::SpawnFailed("no sh".into()))?;
        Ok(LaunchSpec {
            program,
            args: vec![
                "-c".into(),
                self.script
                    .clone()
                    .unwrap_or_else(|| format!("echo hello; exit {}", self.exit_code)),
            ],
            env: Vec::new(),
            working_dir: None,
        })
    }
}

fn config() -> SessionConfig {
    SessionConfig::new(SCRIPT)
        .with_port(0)
        .with_step_delay(Duration::ZERO)
        .with_connect_timeout(Duration::from_secs(5))
        .with_command_timeout(Duration::from_secs(5))
        .with_execution_timeout(Duration::from_secs(10))
}

fn orchestrator(config: SessionConfig, engine: Option<&FakeEngine>, exit_code: i32) -> Orchestrator {
    Orchestrator::new(
        config,
        Arc::new(FakeRuntime {
            engine: engine.cloned(),
            exit_code,
            script: None,
        }),
    )
}

#[tokio::test]
async fn test_breakpoint_stop_then_bounded_steps_then_final_continue() {
    let engine = FakeEngine::new(20);
    let config = config().with_initial_breakpoint(4).with_max_steps(3);

    let report = orchestrator(config, Some(&engine), 0)
        .run_session()
        .await
        .unwrap();

    let trace = &report.trace;
    assert_eq!(trace.breakpoint_id.as_deref(), Some("1"));
    assert_eq!(trace.stops.first().map(|f| f.lineno), Some(4));
    assert_eq!(
        trace.stops.iter().map(|f| f.lineno).collect::<Vec<_>>(),
        vec![4, 5, 6]
    );
    assert_eq!(trace.steps, 3);
    assert_eq!(trace.final_status, Some(Status::Stopping));
    assert!(trace.completed);
    assert_eq!(trace.states.last(), Some(&ControllerState::Completed));
    assert_eq!(
        trace.engine.as_ref().and_then(|e| e.language.as_deref()),
        Some("PHP")
    );

    assert_eq!(engine.count("step_into"), 3);
    assert_eq!(engine.count("run"), 2);
    assert_eq!(engine.received().first().map(String::as_str), Some("breakpoint_set"));
    assert_eq!(engine.received().last().map(String::as_str), Some("detach"));

    assert_eq!(report.target_exit.map(|e| e.code), Some(Some(0)));
    assert!(report.target_stdout.contains("hello"));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["trace"]["final_status"], "stopping");
    assert_eq!(json["trace"]["stops"][0]["lineno"], 4);
}

#[tokio::test]
async fn test_script_ending_during_steps_needs_no_trailing_continue() {
    let engine = FakeEngine::new(10);
    let config = config().with_initial_breakpoint(9).with_max_steps(5);

    let report = orchestrator(config, Some(&engine), 0)
        .run_session()
        .await
        .unwrap();

    assert_eq!(report.trace.steps, 2);
    assert!(report.trace.completed);
    assert_eq!(engine.count("run"), 1);
    assert_eq!(engine.count("step_into"), 2);
}

#[tokio::test]
async fn test_no_breakpoint_runs_to_completion() {
    let engine = FakeEngine::new(10);

    let report = orchestrator(config(), Some(&engine), 0)
        .run_session()
        .await
        .unwrap();

    assert!(report.trace.completed);
    assert!(report.trace.stops.is_empty());
    assert_eq!(engine.count("step_into"), 0);
    assert_eq!(engine.count("run"), 1);
}

#[tokio::test]
async fn test_failed_target_exit_is_reported_not_raised() {
    let engine = FakeEngine::new(10);

    let report = orchestrator(config(), Some(&engine), 3)
        .run_session()
        .await
        .unwrap();

    let exit = report.target_exit.unwrap();
    assert_eq!(exit.code, Some(3));
    assert!(!exit.success);
}

#[tokio::test]
async fn test_target_blocked_until_detach_is_released_before_execution_timeout() {
    let marker = std::env::temp_dir().join(format!("dbgp-detached-{}", uuid::Uuid::new_v4()));
    let engine = FakeEngine::looping(marker.clone());
    let execution_timeout = Duration::from_secs(5);
    let config = config()
        .with_initial_breakpoint(4)
        .with_max_steps(2)
        .with_execution_timeout(execution_timeout);
    let orchestrator = Orchestrator::new(
        config,
        Arc::new(FakeRuntime {
            engine: Some(engine.clone()),
            exit_code: 0,
            script: Some(format!(
                "while [ ! -f '{}' ]; do sleep 0.05; done; echo released",
                marker.display()
            )),
        }),
    );

    let started = Instant::now();
    let report = orchestrator.run_session().await.unwrap();
    let elapsed = started.elapsed();
    let _ = std::fs::remove_file(&marker);

    assert!(elapsed < execution_timeout, "session took {elapsed:?}");
    assert!(!report.trace.completed);
    assert_eq!(report.trace.final_status, Some(Status::Break));
    assert_eq!(report.trace.steps, 2);
    assert_eq!(engine.count("detach"), 1);
    let exit = report.target_exit.unwrap();
    assert!(exit.success);
    assert!(report.target_stdout.contains("released"));
}

#[tokio::test]
async fn test_missing_engine_fails_in_listener() {
    let config = config().with_connect_timeout(Duration::from_millis(300));

    let error = orchestrator(config, None, 0)
        .run_session()
        .await
        .unwrap_err();

    assert_eq!(error.role, Role::Listener);
    assert!(error.is_timeout());
}
