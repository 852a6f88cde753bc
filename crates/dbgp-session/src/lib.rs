//! Session orchestration for DBGp debugging.
//!
//! Provides:
//! - `ListenerRole` - single-shot accept of the engine connection
//! - `launch_target` - the executor role, gated on listener-ready
//! - `Controller` - breakpoint, continue and bounded step trace
//! - `Orchestrator` - runs all three, reports the first failure, cleans up

pub mod controller;
pub mod error;
pub mod launch;
pub mod listener;
pub mod orchestrator;
pub mod signal;

pub use controller::{Controller, ControllerState, Trace};
pub use error::{DebugSessionError, Role, RoleError};
pub use launch::launch_target;
pub use listener::{Connection, ListenerRole};
pub use orchestrator::{Orchestrator, SessionReport};
