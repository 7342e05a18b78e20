//! Downstream result sinks
//!
//! Workers hand every non-empty successful [`FetchResult`] to a [`ResultSink`].
//! Accepting must be effectively non-blocking from the worker's point of view;
//! a sink that needs to do slow work should queue it internally.

use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::FetchResult;

/// Sink errors
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The consumer behind the sink is gone
    #[error("result sink closed")]
    Closed,

    /// The consumer rejected the result
    #[error("result sink rejected result: {0}")]
    Rejected(String),
}

/// Consumer of successful fetches
pub trait ResultSink: Send + Sync {
    /// Take ownership of a result
    fn accept(&self, result: FetchResult) -> Result<(), SinkError>;
}

/// Forwards results over an unbounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<FetchResult>,
}

impl ChannelSink {
    /// Create a sink and the receiver results arrive on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FetchResult>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ResultSink for ChannelSink {
    fn accept(&self, result: FetchResult) -> Result<(), SinkError> {
        self.sender.send(result).map_err(|_| SinkError::Closed)
    }
}

/// Discards every result
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ResultSink for NullSink {
    fn accept(&self, _result: FetchResult) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Keeps every result in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    results: Mutex<Vec<FetchResult>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything collected so far
    pub fn drain(&self) -> Vec<FetchResult> {
        std::mem::take(&mut *self.results.lock().unwrap_or_else(|p| p.into_inner()))
    }

    /// Number of results held
    pub fn len(&self) -> usize {
        self.results.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Whether no results are held
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultSink for MemorySink {
    fn accept(&self, result: FetchResult) -> Result<(), SinkError> {
        self.results
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(result);
        Ok(())
    }
}
