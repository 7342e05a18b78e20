//! Work queue, workers and the pool lifecycle
//!
//! # Overview
//!
//! 1. **Submission**: callers enqueue [`WorkItem`](crate::WorkItem)s with [`WorkerPool::submit`]
//! 2. **Binding**: each popped item is turned into a provider call by the task builder
//! 3. **Rate Limiting**: the worker waits for a token from the item's category bucket
//! 4. **Retry**: transient failures are re-enqueued until `max_retries` is exceeded
//! 5. **Dead Letters**: items that end in failure are appended to today's dead-letter file
//! 6. **Drain**: [`WorkerPool::join`] returns once every submitted item is terminal
//!
//! # Quick Start
//!
//! ```no_run
//! use bulk_fetcher::config::PipelineConfig;
//! use bulk_fetcher::pipeline::WorkerPool;
//! use bulk_fetcher::task::ProviderClients;
//! use bulk_fetcher::WorkItem;
//!
//! # async fn example(clients: ProviderClients) -> Result<(), Box<dyn std::error::Error>> {
//! let pool = WorkerPool::builder(PipelineConfig::default(), clients).start()?;
//! let report = pool
//!     .run(["600000", "000001"].into_iter().map(|key| WorkItem::new("daily", key)))
//!     .await?;
//! assert!(report.is_complete());
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! Item errors never escape a worker. They are classified as:
//! - Transient provider errors, panics, timeouts and rate limit waits (retried)
//! - Permanent provider errors (not retried)
//! - Unknown categories and malformed keys (not retried, never attempted)
//!
//! [`PipelineError`] only covers pool-level misuse and configuration.

pub mod config;
pub mod pool;
pub mod progress;
pub mod queue;
mod worker;

pub use pool::{WorkerPool, WorkerPoolBuilder, DEFAULT_POOL_NAME};
pub use progress::{CounterSnapshot, DrainReport, PipelineCounters};
pub use queue::{QueueError, WorkQueue};

use crate::config::ConfigError;
use crate::dead_letter::DeadLetterError;

/// Pool-level errors
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Configuration rejected at start
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Submission after `close`
    #[error("work queue is closed")]
    QueueClosed,

    /// Submission after `stop`
    #[error("worker pool is stopped")]
    Stopped,

    /// Dead-letter file could not be read for a re-drive
    #[error("dead-letter error: {0}")]
    DeadLetter(#[from] DeadLetterError),
}

impl From<QueueError> for PipelineError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Closed => PipelineError::QueueClosed,
        }
    }
}
