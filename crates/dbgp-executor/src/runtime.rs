//! Runtime-specific debug activation.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
};

use async_trait::async_trait;

use crate::{CommandBuilder, process::ExecutorError};

/// Where the engine inside the target should connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugEndpoint {
    pub addr: SocketAddr,
    pub idekey: String,
}

impl DebugEndpoint {
    #[must_use]
    pub fn new(addr: SocketAddr, idekey: impl Into<String>) -> Self {
        Self {
            addr,
            idekey: idekey.into(),
        }
    }
}

/// A fully resolved process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
}

/// Knows how to start a script with its debug engine pointed at an endpoint.
///
/// Implementations must enable debug mode, trigger activation, and the
/// client host/port for their runtime.
#[async_trait]
pub trait DebugRuntime: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Build the invocation for `script`.
    async fn launch_spec(
        &self,
        script: &Path,
        endpoint: &DebugEndpoint,
    ) -> Result<LaunchSpec, ExecutorError>;
}

/// PHP with the Xdebug 3 extension.
#[derive(Debug, Clone)]
pub struct XdebugRuntime {
    php: String,
}

impl Default for XdebugRuntime {
    fn default() -> Self {
        Self::new("php")
    }
}

impl XdebugRuntime {
    /// Use a specific PHP command, e.g. `"/usr/bin/php8.3 -n"`.
    #[must_use]
    pub fn new(php: impl Into<String>) -> Self {
        Self { php: php.into() }
    }

    fn builder(&self, script: &Path, endpoint: &DebugEndpoint) -> CommandBuilder {
        let settings = [
            "xdebug.mode=debug".to_string(),
            "xdebug.start_with_request=trigger".to_string(),
            format!("xdebug.client_host={}", endpoint.addr.ip()),
            format!("xdebug.client_port={}", endpoint.addr.port()),
            format!("xdebug.idekey={}", endpoint.idekey),
        ];
        settings
            .into_iter()
            .fold(CommandBuilder::new(self.php.clone()), |builder, setting| {
                builder.param("-d").param(setting)
            })
            .param(script.to_string_lossy())
    }

    fn env(endpoint: &DebugEndpoint) -> Vec<(String, String)> {
        vec![
            ("XDEBUG_MODE".to_string(), "debug".to_string()),
            ("XDEBUG_TRIGGER".to_string(), endpoint.idekey.clone()),
            (
                "XDEBUG_CONFIG".to_string(),
                format!(
                    "client_host={} client_port={} idekey={}",
                    endpoint.addr.ip(),
                    endpoint.addr.port(),
                    endpoint.idekey
                ),
            ),
        ]
    }
}

#[async_trait]
impl DebugRuntime for XdebugRuntime {
    fn name(&self) -> &str {
        "php-xdebug"
    }

    async fn launch_spec(
        &self,
        script: &Path,
        endpoint: &DebugEndpoint,
    ) -> Result<LaunchSpec, ExecutorError> {
        let (program, args) = self.builder(script, endpoint).build()?.into_resolved().await?;
        Ok(LaunchSpec {
            program,
            args,
            env: Self::env(endpoint),
            working_dir: script.parent().filter(|p| p.is_dir()).map(Path::to_path_buf),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> DebugEndpoint {
        DebugEndpoint::new("127.0.0.1:9123".parse().unwrap(), "key")
    }

    #[test]
    fn test_ini_settings_bind_port_and_trigger() {
        let parts = XdebugRuntime::default()
            .builder(Path::new("/srv/t.php"), &endpoint())
            .build()
            .unwrap();
        assert_eq!(parts.program, "php");
        assert_eq!(
            parts.args,
            vec![
                "-d",
                "xdebug.mode=debug",
                "-d",
                "xdebug.start_with_request=trigger",
                "-d",
                "xdebug.client_host=127.0.0.1",
                "-d",
                "xdebug.client_port=9123",
                "-d",
                "xdebug.idekey=key",
                "/srv/t.php",
            ]
        );
    }

    #[test]
    fn test_env_activates_trigger() {
        let env = XdebugRuntime::env(&endpoint());
        assert!(env.contains(&("XDEBUG_TRIGGER".to_string(), "key".to_string())));
        assert!(env.iter().any(|(k, v)| k == "XDEBUG_CONFIG" && v.contains("client_port=9123")));
    }

    #[tokio::test]
    async fn test_missing_php_is_reported() {
        let runtime = XdebugRuntime::new("/no/such/php");
        let result = runtime.launch_spec(Path::new("/srv/t.php"), &endpoint()).await;
        assert!(matches!(result, Err(ExecutorError::CommandBuild(_))));
    }
}
