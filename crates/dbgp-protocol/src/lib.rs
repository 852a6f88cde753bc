//! DBGp wire protocol support.
//!
//! Provides:
//! - Frame codecs for both directions of a DBGp connection
//! - `Command` building and parsing
//! - Defensive XML parsing into a generic `Node` tree
//! - `Response` classification plus stack/variable snapshots
//! - `DbgpSession` - transaction-correlated command/response exchange

pub mod codec;
pub mod command;
pub mod error;
pub mod response;
pub mod session;
pub mod uri;
pub mod xml;

pub use codec::{ClientCodec, EngineCodec, encode_frame, read_frame, write_frame};
pub use command::Command;
pub use error::DbgpError;
pub use response::{
    Breakpoint, EngineError, InitPacket, Response, StackFrame, Status, Value, Variable,
    is_execution_complete,
};
pub use session::{ConnectionState, DbgpSession};
pub use uri::to_file_uri;
pub use xml::{Node, Parsed, parse};
