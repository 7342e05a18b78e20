//! Lazily refilled token bucket

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Rate expressed as `count` operations per `window_secs` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateConfig {
    /// Operations allowed per window (also the bucket capacity)
    pub count: u32,
    /// Window length in seconds
    pub window_secs: f64,
}

impl RateConfig {
    /// Create a rate of `count` per `window`
    pub fn new(count: u32, window: Duration) -> Self {
        Self {
            count,
            window_secs: window.as_secs_f64(),
        }
    }

    /// `count` operations per second
    pub fn per_second(count: u32) -> Self {
        Self::new(count, Duration::from_secs(1))
    }

    /// `count` operations per minute
    pub fn per_minute(count: u32) -> Self {
        Self::new(count, Duration::from_secs(60))
    }

    /// Tokens added per second. Zero for a rate that fails `validate`.
    pub fn refill_per_sec(&self) -> f64 {
        if self.validate().is_err() {
            return 0.0;
        }
        self.count as f64 / self.window_secs
    }

    /// Check the rate can ever admit a request
    pub fn validate(&self) -> Result<(), String> {
        if self.count == 0 {
            return Err("rate count must be at least 1".to_string());
        }
        if !self.window_secs.is_finite() || self.window_secs <= 0.0 {
            return Err(format!(
                "rate window must be a positive number of seconds, got {}",
                self.window_secs
            ));
        }
        Ok(())
    }
}

/// Token bucket state. Starts full; refilled from elapsed time on each attempt.
#[derive(Debug)]
pub(crate) struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub(crate) fn new(rate: RateConfig, now: Instant) -> Self {
        let capacity = rate.count.max(1) as f64;
        Self {
            capacity,
            refill_per_sec: rate.refill_per_sec(),
            tokens: capacity,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            self.last_refill = now;
        }
    }

    /// Take one token, or report how long until one is available.
    pub(crate) fn try_take(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }
        let missing = 1.0 - self.tokens;
        let secs = missing / self.refill_per_sec;
        // A bucket that never refills reports an effectively endless wait
        let wait = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
        // Never sleep for zero; float error can leave the bucket just short
        Err(wait.max(Duration::from_millis(1)))
    }

    #[cfg(test)]
    pub(crate) fn tokens(&self) -> f64 {
        self.tokens
    }
}
