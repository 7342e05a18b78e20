//! Observability metrics for the acquisition pipeline
//!
//! ## Architecture
//!
//! - Uses `metrics` crate for low-overhead metric collection
//! - Optional Prometheus exporter for a scrape endpoint
//! - Recording is a no-op until a recorder is installed, so library users who
//!   never call [`init_metrics`] pay almost nothing

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<AtomicBool> = Lazy::new(|| AtomicBool::new(false));

/// Metrics exporter errors
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Prometheus exporter could not be installed
    #[error("failed to install Prometheus exporter: {0}")]
    InstallError(String),
}

/// Initialize metrics system with Prometheus exporter
///
/// Must be called from within a tokio runtime. Idempotent: later calls are no-ops.
///
/// # Arguments
/// * `addr` - Socket address to bind the scrape endpoint (e.g., "0.0.0.0:9090")
pub fn init_metrics(addr: SocketAddr) -> Result<(), MetricsError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    if let Err(e) = PrometheusBuilder::new().with_http_listener(addr).install() {
        METRICS_INITIALIZED.store(false, Ordering::SeqCst);
        return Err(MetricsError::InstallError(e.to_string()));
    }

    describe_counter!(
        "items_succeeded_total",
        Unit::Count,
        "Work items that reached terminal success"
    );
    describe_counter!(
        "items_failed_total",
        Unit::Count,
        "Work items that exhausted retries and were dead-lettered"
    );
    describe_counter!(
        "items_retried_total",
        Unit::Count,
        "Work items re-enqueued after a retryable failure"
    );
    describe_histogram!(
        "fetch_duration_seconds",
        Unit::Seconds,
        "Duration of individual provider calls"
    );
    describe_histogram!(
        "rate_limit_wait_seconds",
        Unit::Seconds,
        "Time spent waiting for a rate limit token"
    );
    describe_counter!(
        "rate_limit_timeouts_total",
        Unit::Count,
        "Token acquisitions abandoned after the acquire timeout"
    );
    describe_gauge!("queue_depth", Unit::Count, "Items waiting in the work queue");

    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Check if the Prometheus exporter has been installed
pub fn is_initialized() -> bool {
    METRICS_INITIALIZED.load(Ordering::SeqCst)
}

/// Rate limiter metrics helper
pub struct RateLimiterMetrics {
    category: String,
    start_time: Option<Instant>,
}

impl RateLimiterMetrics {
    /// Create a helper for one acquisition on `category`
    pub fn new(category: &str) -> Self {
        Self {
            category: category.to_string(),
            start_time: None,
        }
    }

    /// Start measuring queue wait time
    pub fn start_acquire(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Record successful token acquisition
    pub fn record_acquired(&mut self) {
        if let Some(start) = self.start_time.take() {
            let wait_duration = start.elapsed();
            histogram!("rate_limit_wait_seconds", "category" => self.category.clone())
                .record(wait_duration.as_secs_f64());

            if wait_duration.as_millis() > 100 {
                debug!(
                    category = %self.category,
                    wait_ms = wait_duration.as_millis(),
                    "Rate limit token acquired after wait"
                );
            }
        }
    }

    /// Record an abandoned acquisition
    pub fn record_timeout(&mut self) {
        self.start_time = None;
        counter!("rate_limit_timeouts_total", "category" => self.category.clone()).increment(1);
    }
}

/// Timing for a single provider call
pub struct FetchMetrics {
    category: String,
    start_time: Instant,
}

impl FetchMetrics {
    /// Start timing a provider call
    pub fn start(category: &str) -> Self {
        Self {
            category: category.to_string(),
            start_time: Instant::now(),
        }
    }

    /// Record the call's duration with its outcome label
    pub fn record(self, outcome: &'static str) -> Duration {
        let duration = self.start_time.elapsed();
        histogram!(
            "fetch_duration_seconds",
            "category" => self.category,
            "outcome" => outcome,
        )
        .record(duration.as_secs_f64());
        duration
    }
}

/// Record a terminal success
pub fn record_item_succeeded(category: &str, empty: bool) {
    counter!(
        "items_succeeded_total",
        "category" => category.to_string(),
        "empty" => empty.to_string(),
    )
    .increment(1);
}

/// Record a terminal failure
pub fn record_item_failed(category: &str) {
    counter!("items_failed_total", "category" => category.to_string()).increment(1);
}

/// Record a re-enqueue
pub fn record_item_retried(category: &str, retry_count: u32) {
    counter!(
        "items_retried_total",
        "category" => category.to_string(),
        "retry" => retry_count.to_string(),
    )
    .increment(1);
}

/// Update the queue depth gauge
pub fn record_queue_depth(depth: usize) {
    gauge!("queue_depth").set(depth as f64);
}
