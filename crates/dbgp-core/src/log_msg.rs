//! Output captured from a debug target.

use serde::{Deserialize, Serialize};

/// One captured event from the target process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum LogMsg {
    /// A line written to stdout.
    Stdout(String),
    /// A line written to stderr.
    Stderr(String),
    /// The process exited. `None` when killed by a signal.
    Exited(Option<i32>),
    /// No more output will follow.
    Finished,
}

impl LogMsg {
    /// Rough heap footprint, used to bound history.
    #[must_use]
    pub fn approx_bytes(&self) -> usize {
        const OVERHEAD: usize = 8;
        match self {
            Self::Stdout(s) | Self::Stderr(s) => s.len() + OVERHEAD,
            Self::Exited(_) | Self::Finished => OVERHEAD,
        }
    }
}
