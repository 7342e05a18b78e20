//! Provider seam
//!
//! The pipeline never talks to a vendor SDK directly. Callers construct one
//! client per provider object once per process and hand them in as
//! [`ProviderClients`]; every worker shares the same `Arc`s.

use crate::{Params, Payload};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Which provider client a template dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderObject {
    /// The main data API client
    #[default]
    Primary,
    /// The auxiliary client (e.g. adjusted-price helpers)
    Secondary,
}

impl fmt::Display for ProviderObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
        }
    }
}

/// Provider call errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Network, timeout or throttling failure worth retrying
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Failure that will not go away on retry (bad parameters, no permission)
    #[error("permanent provider error: {0}")]
    Permanent(String),
}

impl ProviderError {
    /// Whether the worker should re-enqueue the item after this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// Result type for provider calls
pub type ProviderResult<T> = Result<T, ProviderError>;

/// A data provider able to execute one named method with parameters.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Call `method` with `params` and return the resulting rows.
    ///
    /// An empty payload means "no data for these parameters", not an error.
    async fn fetch(&self, method: &str, params: &Params) -> ProviderResult<Payload>;
}

/// The explicitly constructed, shared provider clients.
#[derive(Clone)]
pub struct ProviderClients {
    primary: Arc<dyn Provider>,
    secondary: Arc<dyn Provider>,
}

impl ProviderClients {
    /// Create clients for both provider objects
    pub fn new(primary: Arc<dyn Provider>, secondary: Arc<dyn Provider>) -> Self {
        Self { primary, secondary }
    }

    /// Use a single client for both provider objects
    pub fn single(client: Arc<dyn Provider>) -> Self {
        Self {
            primary: client.clone(),
            secondary: client,
        }
    }

    /// Resolve the client for a provider object
    pub fn get(&self, object: ProviderObject) -> &Arc<dyn Provider> {
        match object {
            ProviderObject::Primary => &self.primary,
            ProviderObject::Secondary => &self.secondary,
        }
    }
}

impl fmt::Debug for ProviderClients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderClients").finish_non_exhaustive()
    }
}
