//! Configuration for a single debug session.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default DBGp client port used by Xdebug 3.
pub const DEFAULT_PORT: u16 = 9003;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Everything needed to run one listen/launch/step session.
///
/// Timeouts are stored in milliseconds so the config stays plain JSON.
/// Every field has a default, so a config file only needs `script_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Address the listener binds. Must be a loopback address.
    pub host: IpAddr,

    /// Port the listener binds. `0` picks an ephemeral port.
    pub port: u16,

    /// Script handed to the target runtime.
    pub script_path: PathBuf,

    /// Line to break on before stepping starts.
    pub initial_breakpoint_line: Option<u32>,

    /// Upper bound on `step_into` commands issued by the controller.
    pub max_steps: u32,

    /// Pause between steps so the trace stays readable.
    pub step_delay_ms: u64,

    /// How long the listener waits for the engine to connect.
    pub connect_timeout_ms: u64,

    /// How long the executor waits for the listener to come up.
    pub ready_timeout_ms: u64,

    /// How long the controller waits for the engine connection handoff.
    pub connection_wait_timeout_ms: u64,

    /// How long the target process may run.
    pub execution_timeout_ms: u64,

    /// Deadline for each command/response exchange.
    pub command_timeout_ms: u64,

    /// IDE key advertised to the engine.
    pub idekey: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            script_path: PathBuf::new(),
            initial_breakpoint_line: None,
            max_steps: 20,
            step_delay_ms: 100,
            connect_timeout_ms: 15_000,
            ready_timeout_ms: 3_000,
            connection_wait_timeout_ms: 30_000,
            execution_timeout_ms: 60_000,
            command_timeout_ms: 10_000,
            idekey: "dbgp-driver".to_string(),
        }
    }
}

impl SessionConfig {
    /// Create a config for a script with default bounds.
    #[must_use]
    pub fn new(script_path: impl Into<PathBuf>) -> Self {
        Self {
            script_path: script_path.into(),
            ..Self::default()
        }
    }

    /// Load a config from a JSON file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed, or fails validation.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        tracing::debug!(
            path = %path.display(),
            script = %config.script_path.display(),
            "Loaded session config"
        );
        Ok(config)
    }

    /// Check invariants serde cannot express.
    ///
    /// # Errors
    /// Returns error naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.script_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "script_path",
                reason: "must not be empty".to_string(),
            });
        }
        if !self.host.is_loopback() {
            return Err(ConfigError::Invalid {
                field: "host",
                reason: format!("{} is not a loopback address", self.host),
            });
        }
        if self.initial_breakpoint_line == Some(0) {
            return Err(ConfigError::Invalid {
                field: "initial_breakpoint_line",
                reason: "lines are 1-based".to_string(),
            });
        }
        if self.command_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "command_timeout_ms",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Set the listening port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Break on a line before stepping.
    #[must_use]
    pub const fn with_initial_breakpoint(mut self, line: u32) -> Self {
        self.initial_breakpoint_line = Some(line);
        self
    }

    /// Bound the step loop.
    #[must_use]
    pub const fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Set the inter-step delay.
    #[must_use]
    pub const fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay_ms = duration_ms(delay);
        self
    }

    /// Set the engine connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the target execution timeout.
    #[must_use]
    pub const fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the per-command timeout.
    #[must_use]
    pub const fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout_ms = duration_ms(timeout);
        self
    }

    /// Address the listener should bind.
    #[must_use]
    pub const fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    #[must_use]
    pub const fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub const fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    #[must_use]
    pub const fn connection_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_wait_timeout_ms)
    }

    #[must_use]
    pub const fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis() as u64
}
