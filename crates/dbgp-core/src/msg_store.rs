//! Broadcast + history store for target output.

use std::{collections::VecDeque, sync::RwLock};

use futures::{StreamExt, future};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::LogMsg;

/// Default history size limit (8 MB).
const HISTORY_BYTES: usize = 8 * 1024 * 1024;

#[derive(Clone)]
struct StoredMsg {
    msg: LogMsg,
    bytes: usize,
}

struct Inner {
    history: VecDeque<StoredMsg>,
    total_bytes: usize,
}

/// Message store with broadcast and history support.
///
/// Late subscribers receive history first, then live output.
pub struct MsgStore {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<LogMsg>,
    history_limit: usize,
}

impl Default for MsgStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MsgStore {
    /// Create a new message store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_history_limit(HISTORY_BYTES)
    }

    /// Create a store that keeps at most `limit` bytes of history.
    #[must_use]
    pub fn with_history_limit(limit: usize) -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            inner: RwLock::new(Inner {
                history: VecDeque::with_capacity(32),
                total_bytes: 0,
            }),
            sender,
            history_limit: limit,
        }
    }

    /// Push a message to both live listeners and history.
    pub fn push(&self, msg: LogMsg) {
        let _ = self.sender.send(msg.clone()); // live listeners
        let bytes = msg.approx_bytes();

        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        while inner.total_bytes.saturating_add(bytes) > self.history_limit {
            if let Some(front) = inner.history.pop_front() {
                inner.total_bytes = inner.total_bytes.saturating_sub(front.bytes);
            } else {
                break;
            }
        }
        inner.history.push_back(StoredMsg { msg, bytes });
        inner.total_bytes = inner.total_bytes.saturating_add(bytes);
    }

    /// Push stdout line.
    pub fn push_stdout<S: Into<String>>(&self, s: S) {
        self.push(LogMsg::Stdout(s.into()));
    }

    /// Push stderr line.
    pub fn push_stderr<S: Into<String>>(&self, s: S) {
        self.push(LogMsg::Stderr(s.into()));
    }

    /// Push exit notification.
    pub fn push_exited(&self, code: Option<i32>) {
        self.push(LogMsg::Exited(code));
    }

    /// Push finished notification.
    pub fn push_finished(&self) {
        self.push(LogMsg::Finished);
    }

    /// Get a receiver for live updates.
    #[must_use]
    pub fn get_receiver(&self) -> broadcast::Receiver<LogMsg> {
        self.sender.subscribe()
    }

    /// Get a snapshot of the history.
    #[must_use]
    pub fn get_history(&self) -> Vec<LogMsg> {
        self.inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .history
            .iter()
            .map(|s| s.msg.clone())
            .collect()
    }

    /// All stdout captured so far, joined by newlines.
    #[must_use]
    pub fn stdout_text(&self) -> String {
        self.get_history()
            .into_iter()
            .filter_map(|msg| match msg {
                LogMsg::Stdout(s) => Some(s),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Stream that yields history first, then live updates.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, LogMsg> {
        let (history, rx) = (self.get_history(), self.get_receiver());

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        Box::pin(hist.chain(live))
    }

    /// Stream of messages up to (not including) `Finished`.
    #[must_use]
    pub fn until_finished(&self) -> futures::stream::BoxStream<'static, LogMsg> {
        self.history_plus_stream()
            .take_while(|msg| future::ready(!matches!(msg, LogMsg::Finished)))
            .boxed()
    }
}
