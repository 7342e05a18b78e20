//! Pipeline configuration constants

use std::time::Duration;

/// Default number of workers.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Upper bound on workers accepted from configuration.
pub const MAX_WORKER_COUNT: usize = 256;

/// Default bound on fresh submissions waiting in the queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Maximum number of retries for a failing item.
/// An item is attempted at most `MAX_RETRIES + 1` times before it is dead-lettered.
pub const MAX_RETRIES: u32 = 5;

/// Longest a worker waits for a rate limit token before treating the attempt
/// as a transient failure.
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: f64 = 60.0;

/// Ceiling for the acquire and fetch timeouts (one week).
pub const MAX_TIMEOUT_SECS: f64 = 7.0 * 24.0 * 3600.0;

/// Default delay before the first retry (0 = re-enqueue immediately).
pub const INITIAL_BACKOFF_MS: u64 = 0;

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Requests per window for categories without an explicit rate.
pub const DEFAULT_RATE_COUNT: u32 = 200;

/// Window length in seconds for the default rate.
pub const DEFAULT_RATE_WINDOW_SECS: f64 = 60.0;

/// Calculate exponential backoff before re-enqueueing retry number `retry_count` (1-based).
pub fn calculate_backoff(initial_ms: u64, max_ms: u64, retry_count: u32) -> Duration {
    let exponent = retry_count.saturating_sub(1).min(32);
    let delay_ms = initial_ms.saturating_mul(2u64.saturating_pow(exponent));
    Duration::from_millis(delay_ms.min(max_ms))
}
