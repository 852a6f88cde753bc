//! Step through a PHP script under Xdebug and print what was observed.
//!
//! Run with: cargo run -p step-trace -- path/to/script.php [breakpoint-line]
//!
//! or with a JSON `SessionConfig`: cargo run -p step-trace -- --config session.json
//!
//! Set `DBGP_PHP` to use a different PHP command line (default `php`).

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, bail};
use dbgp_core::SessionConfig;
use dbgp_executor::XdebugRuntime;
use dbgp_session::Orchestrator;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = load_config(std::env::args().skip(1).collect())?;
    config.validate()?;

    let runtime = std::env::var("DBGP_PHP")
        .map_or_else(|_| XdebugRuntime::default(), XdebugRuntime::new);
    let orchestrator = Orchestrator::new(config, Arc::new(runtime));

    let report = orchestrator.run_session().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn load_config(args: Vec<String>) -> anyhow::Result<SessionConfig> {
    match args.as_slice() {
        [flag, path] if flag == "--config" => {
            let path = PathBuf::from(path);
            SessionConfig::from_json_file(&path)
                .with_context(|| format!("loading {}", path.display()))
        }
        [script] => Ok(SessionConfig::new(script)),
        [script, line] => {
            let line = line
                .parse()
                .with_context(|| format!("breakpoint line is not a number: {line}"))?;
            Ok(SessionConfig::new(script).with_initial_breakpoint(line))
        }
        _ => bail!("usage: step-trace <script.php> [breakpoint-line] | --config <session.json>"),
    }
}
