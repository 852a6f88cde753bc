//! Debug target launching.
//!
//! Provides:
//! - `DebugRuntime` - how a runtime is told to connect back to the listener
//! - `XdebugRuntime` - PHP + Xdebug trigger activation
//! - `TargetExecutor` - spawn, stream output, bounded wait
//! - Command building and executable resolution

pub mod command;
pub mod process;
pub mod resolve;
pub mod runtime;

pub use command::{CommandBuildError, CommandBuilder, CommandParts};
pub use process::{ExecutorError, ExitOutcome, TargetExecutor};
pub use resolve::resolve_executable_path;
pub use runtime::{DebugEndpoint, DebugRuntime, LaunchSpec, XdebugRuntime};
