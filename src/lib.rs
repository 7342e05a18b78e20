//! # Bulk Fetcher
//!
//! A concurrent, rate-limited acquisition pipeline for pulling large volumes of
//! records out of a data-provider API, one work item (category + key) at a time.
//!
//! ## Features
//!
//! - **Per-category rate limiting**: lazily refilled token buckets, one per category
//! - **Bounded work queue**: FIFO with re-enqueue for retries and a drain barrier
//! - **Worker pool**: configurable number of async workers that never die on item errors
//! - **Dead letters**: idempotent, date-keyed CSV record of permanently failed items
//! - **Event bus**: synchronous fan-out of lifecycle events to isolated observers
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use bulk_fetcher::config::PipelineConfig;
//! use bulk_fetcher::events::EventBus;
//! use bulk_fetcher::pipeline::WorkerPool;
//! use bulk_fetcher::sink::ChannelSink;
//! use bulk_fetcher::task::ProviderClients;
//! use bulk_fetcher::WorkItem;
//!
//! # async fn example(clients: ProviderClients) -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::load("pipeline.toml")?;
//! let (sink, mut results) = ChannelSink::new();
//! let bus = Arc::new(EventBus::new());
//!
//! let pool = WorkerPool::builder(config, clients)
//!     .with_sink(Arc::new(sink))
//!     .with_event_bus(bus)
//!     .start()?;
//!
//! pool.submit(WorkItem::new("daily", "600000")).await?;
//! pool.close();
//! let report = pool.join().await;
//! println!("{} succeeded, {} failed", report.successful, report.failed);
//! # while results.try_recv().is_ok() {}
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`task`] - Task templates, key normalization and the provider seam
//! - [`rate_limit`] - Per-category token bucket limiter
//! - [`pipeline`] - Work queue, workers and the pool lifecycle
//! - [`dead_letter`] - Date-keyed dead-letter store
//! - [`events`] - Event bus and the stock observers
//! - [`sink`] - Result sink seam

#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};

/// CLI command implementations
pub mod cli;

/// Pipeline configuration loading
pub mod config;

/// Dead-letter persistence
pub mod dead_letter;

/// Event bus and observers
pub mod events;

/// Metrics recording and exporter setup
pub mod metrics;

/// Work queue and worker pool
pub mod pipeline;

/// Per-category rate limiting
pub mod rate_limit;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

/// Downstream result sinks
pub mod sink;

/// Task templates and builders
pub mod task;

/// Provider call parameters.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// Opaque tabular data returned by a provider.
///
/// The pipeline never inspects rows; it only needs to know whether any came back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Column names
    pub columns: Vec<String>,
    /// Row values, one inner vector per row
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl Payload {
    /// Create a payload from columns and rows
    pub fn new(columns: Vec<String>, rows: Vec<Vec<serde_json::Value>>) -> Self {
        Self { columns, rows }
    }

    /// An empty payload (no rows)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the provider returned no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A unit of work: one fetch for one key within one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Category name (selects template and rate budget)
    pub category: String,
    /// Key such as a ticker; empty for category-wide fetches
    pub key: String,
    /// Number of times this item has been re-enqueued after a failure
    #[serde(default)]
    pub retry_count: u32,
    /// Parameter overrides merged over the template defaults
    #[serde(default)]
    pub overrides: Params,
}

impl WorkItem {
    /// Create a fresh work item with no overrides
    pub fn new(category: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            key: key.into(),
            retry_count: 0,
            overrides: Params::new(),
        }
    }

    /// Create a category-wide work item (empty key)
    pub fn category_wide(category: impl Into<String>) -> Self {
        Self::new(category, "")
    }

    /// Attach parameter overrides
    pub fn with_overrides(mut self, overrides: Params) -> Self {
        self.overrides = overrides;
        self
    }

    /// Short `category/key` label for logs
    pub fn label(&self) -> String {
        if self.key.is_empty() {
            self.category.clone()
        } else {
            format!("{}/{}", self.category, self.key)
        }
    }
}

/// Outcome of one successful fetch, handed to the result sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    /// Key the payload belongs to
    pub key: String,
    /// Category the payload belongs to
    pub category: String,
    /// Fetched rows
    pub payload: Payload,
    /// Whether the fetch succeeded
    pub success: bool,
}
