//! Per-category rate limiting
//!
//! One token bucket per category, created lazily on first use. Refill is
//! computed from elapsed time whenever a caller tries to take a token, under
//! that bucket's own mutex, so there is no background timer and acquisition is
//! linearizable per category. Buckets never share state: draining one category
//! has no effect on any other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace, warn};

use crate::metrics::RateLimiterMetrics;

mod bucket;

pub use bucket::RateConfig;
use bucket::TokenBucket;

/// Shared per-category token bucket limiter
#[derive(Debug)]
pub struct RateLimiter {
    default_rate: RateConfig,
    rates: HashMap<String, RateConfig>,
    buckets: Mutex<HashMap<String, Arc<Mutex<TokenBucket>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Bucket arithmetic cannot leave the state half-updated, so a poisoned
    // lock is still safe to use
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RateLimiter {
    /// Create a limiter where every category gets `default_rate`
    pub fn new(default_rate: RateConfig) -> Self {
        Self {
            default_rate,
            rates: HashMap::new(),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Create a limiter with explicit per-category rates
    pub fn with_rates(default_rate: RateConfig, rates: HashMap<String, RateConfig>) -> Self {
        Self {
            default_rate,
            rates,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Configure a category's rate. Only affects buckets created afterwards.
    pub fn set_rate(&mut self, category: impl Into<String>, rate: RateConfig) {
        self.rates.insert(category.into(), rate);
    }

    /// Rate a category runs at
    pub fn rate_for(&self, category: &str) -> RateConfig {
        self.rates.get(category).copied().unwrap_or(self.default_rate)
    }

    /// Check the default and every per-category rate
    pub fn validate(&self) -> Result<(), String> {
        self.default_rate
            .validate()
            .map_err(|e| format!("default rate: {e}"))?;
        for (category, rate) in &self.rates {
            rate.validate().map_err(|e| format!("rate for '{category}': {e}"))?;
        }
        Ok(())
    }

    fn bucket(&self, category: &str) -> Arc<Mutex<TokenBucket>> {
        let mut buckets = lock(&self.buckets);
        if let Some(bucket) = buckets.get(category) {
            return bucket.clone();
        }
        let mut rate = self.rate_for(category);
        if let Err(e) = rate.validate() {
            warn!(category = %category, error = %e, "Invalid rate, using the default rate");
            rate = self.default_rate;
        }
        debug!(
            category = %category,
            count = rate.count,
            window_secs = rate.window_secs,
            "Creating rate limit bucket"
        );
        let bucket = Arc::new(Mutex::new(TokenBucket::new(rate, Instant::now())));
        buckets.insert(category.to_string(), bucket.clone());
        bucket
    }

    /// Take a token for `category` if one is available right now.
    pub fn try_acquire(&self, category: &str) -> bool {
        let bucket = self.bucket(category);
        let taken = lock(&bucket).try_take(Instant::now()).is_ok();
        trace!(category = %category, taken, "try_acquire");
        taken
    }

    /// Wait for a token for `category`.
    ///
    /// With `timeout = None` this waits as long as needed. Otherwise it gives
    /// up once `timeout` has elapsed and returns `false`.
    pub async fn acquire(&self, category: &str, timeout: Option<Duration>) -> bool {
        let bucket = self.bucket(category);
        let mut metrics = RateLimiterMetrics::new(category);
        metrics.start_acquire();

        // A deadline past the clock's range is no deadline
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        loop {
            let now = Instant::now();
            // Guard is dropped before any await
            let attempt = lock(&bucket).try_take(now);
            let wait = match attempt {
                Ok(()) => {
                    metrics.record_acquired();
                    return true;
                }
                Err(wait) => wait,
            };

            let wait = match deadline {
                Some(deadline) if now >= deadline => {
                    metrics.record_timeout();
                    debug!(category = %category, "Rate limit acquire timed out");
                    return false;
                }
                Some(deadline) => wait.min(deadline - now),
                None => wait,
            };

            trace!(category = %category, wait_ms = wait.as_millis(), "Waiting for rate limit token");
            sleep(wait).await;
        }
    }
}
