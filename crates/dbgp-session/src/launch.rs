//! Executor role: start the target once the listener is up.

use std::{net::SocketAddr, path::Path, time::Duration};

use dbgp_executor::{DebugEndpoint, ExitOutcome, TargetExecutor};
use tokio::sync::oneshot;

use crate::{RoleError, signal::wait_for};

/// Wait for listener-ready, then run the target to completion.
///
/// # Errors
/// Returns error if the listener never becomes ready, the target cannot be
/// started, or it outlives `execution_timeout`.
pub async fn launch_target(
    executor: &TargetExecutor,
    script: &Path,
    idekey: &str,
    ready: oneshot::Receiver<SocketAddr>,
    ready_timeout: Duration,
    execution_timeout: Duration,
) -> Result<ExitOutcome, RoleError> {
    let addr = wait_for(ready, ready_timeout, "listener-ready").await?;
    tracing::info!(%addr, script = %script.display(), "Listener ready; starting target");

    let endpoint = DebugEndpoint::new(addr, idekey);
    let outcome = executor.run(script, &endpoint, execution_timeout).await?;
    Ok(outcome)
}
