//! Core building blocks shared by the DBGp session crates.
//!
//! This crate provides:
//! - `SessionConfig` - Ports, timeouts and stepping bounds for one session
//! - `LogMsg` - Typed output captured from the debug target
//! - `MsgStore` - Broadcast + history for captured target output

pub mod context;
pub mod log_msg;
pub mod msg_store;

pub use context::{ConfigError, SessionConfig};
pub use log_msg::LogMsg;
pub use msg_store::MsgStore;
