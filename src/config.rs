//! Pipeline configuration
//!
//! Loaded from a TOML file. Every field has a default, so an empty file is a
//! valid configuration (with no templates registered).
//!
//! ```toml
//! worker_count = 8
//! max_retries = 3
//! dead_letter_dir = "dead_letter"
//!
//! [default_rate]
//! count = 200
//! window_secs = 60
//!
//! [rates.daily]
//! count = 500
//! window_secs = 60
//!
//! [templates.daily]
//! provider_method = "daily"
//! default_params = { fields = "ts_code,trade_date,close" }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::pipeline::config::{
    DEFAULT_ACQUIRE_TIMEOUT_SECS, DEFAULT_QUEUE_CAPACITY, DEFAULT_RATE_COUNT,
    DEFAULT_RATE_WINDOW_SECS, DEFAULT_WORKER_COUNT, INITIAL_BACKOFF_MS, MAX_BACKOFF_MS,
    MAX_RETRIES, MAX_TIMEOUT_SECS, MAX_WORKER_COUNT,
};
use crate::rate_limit::{RateConfig, RateLimiter};
use crate::task::{TaskRegistry, TaskTemplate};

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("IO error: {0}")]
    IoError(String),

    /// File is not valid TOML for this schema
    #[error("parse error: {0}")]
    ParseError(String),

    /// Values parse but make no sense
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Everything the pool needs besides the provider clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of concurrent workers
    pub worker_count: usize,
    /// Bound on fresh submissions waiting in the queue
    pub queue_capacity: usize,
    /// Retries before an item is dead-lettered
    pub max_retries: u32,
    /// Longest a worker waits for a rate limit token
    pub acquire_timeout_secs: f64,
    /// Optional limit on a single provider call
    pub fetch_timeout_secs: Option<f64>,
    /// Delay before the first retry (doubles per retry, 0 = immediate)
    pub initial_backoff_ms: u64,
    /// Cap on the retry delay
    pub max_backoff_ms: u64,
    /// Rate for categories not listed in `rates`
    pub default_rate: RateConfig,
    /// Per-category rates
    pub rates: HashMap<String, RateConfig>,
    /// Directory for dead-letter files
    pub dead_letter_dir: PathBuf,
    /// Per-category task templates
    pub templates: HashMap<String, TaskTemplate>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_retries: MAX_RETRIES,
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT_SECS,
            fetch_timeout_secs: None,
            initial_backoff_ms: INITIAL_BACKOFF_MS,
            max_backoff_ms: MAX_BACKOFF_MS,
            default_rate: RateConfig {
                count: DEFAULT_RATE_COUNT,
                window_secs: DEFAULT_RATE_WINDOW_SECS,
            },
            rates: HashMap::new(),
            dead_letter_dir: PathBuf::from("dead_letter"),
            templates: HashMap::new(),
        }
    }
}

impl PipelineConfig {
    /// Read, parse and validate a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::IoError(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&content)?;
        info!(
            path = %path.display(),
            templates = config.templates.len(),
            workers = config.worker_count,
            "Loaded pipeline configuration"
        );
        Ok(config)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall or break the pipeline
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 || self.worker_count > MAX_WORKER_COUNT {
            return Err(ConfigError::Invalid(format!(
                "worker_count must be between 1 and {MAX_WORKER_COUNT}, got {}",
                self.worker_count
            )));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if !(0.0..=MAX_TIMEOUT_SECS).contains(&self.acquire_timeout_secs) {
            return Err(ConfigError::Invalid(format!(
                "acquire_timeout_secs must be between 0 and {MAX_TIMEOUT_SECS}, got {}",
                self.acquire_timeout_secs
            )));
        }
        if let Some(secs) = self.fetch_timeout_secs {
            if !(secs > 0.0 && secs <= MAX_TIMEOUT_SECS) {
                return Err(ConfigError::Invalid(format!(
                    "fetch_timeout_secs must be positive and at most {MAX_TIMEOUT_SECS}, got {secs}"
                )));
            }
        }
        self.default_rate
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("default_rate: {e}")))?;
        for (category, rate) in &self.rates {
            rate.validate()
                .map_err(|e| ConfigError::Invalid(format!("rates.{category}: {e}")))?;
        }
        for (category, template) in &self.templates {
            if template.provider_method.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "templates.{category}: provider_method cannot be empty"
                )));
            }
        }
        Ok(())
    }

    /// Rate limit wait ceiling. Out-of-range values are clamped; `validate`
    /// rejects them.
    pub fn acquire_timeout(&self) -> Duration {
        seconds(self.acquire_timeout_secs)
    }

    /// Per-call timeout, if configured
    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_secs.map(seconds)
    }

    /// Build the task registry from `templates`
    pub fn registry(&self) -> TaskRegistry {
        TaskRegistry::from(self.templates.clone())
    }

    /// Build a rate limiter from `default_rate` and `rates`
    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::with_rates(self.default_rate, self.rates.clone())
    }

    /// Set the worker count
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the retry ceiling
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the queue capacity
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Set a category's rate
    pub fn with_rate(mut self, category: impl Into<String>, rate: RateConfig) -> Self {
        self.rates.insert(category.into(), rate);
        self
    }

    /// Register a template
    pub fn with_template(mut self, category: impl Into<String>, template: TaskTemplate) -> Self {
        self.templates.insert(category.into(), template);
        self
    }

    /// Set the dead-letter directory
    pub fn with_dead_letter_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.dead_letter_dir = dir.into();
        self
    }
}

fn seconds(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.clamp(0.0, MAX_TIMEOUT_SECS)).unwrap_or(Duration::ZERO)
}
