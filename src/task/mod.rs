//! Task templates and the task builder
//!
//! A [`TaskTemplate`] describes how one category is fetched: which provider
//! client, which method, and which default parameters. The [`TaskBuilder`]
//! turns `(category, key, overrides)` into a [`BoundTask`], a plain value that
//! does nothing until [`invoke`]d against the shared [`ProviderClients`].

use crate::{Params, Payload};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub mod key;
pub mod provider;

pub use key::{normalize_key, KeyFormat};
pub use provider::{Provider, ProviderClients, ProviderError, ProviderObject, ProviderResult};

/// Parameter name keys are injected under when a template does not say otherwise
pub const DEFAULT_KEY_PARAM: &str = "ts_code";

/// Task builder errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// No template registered for the category
    #[error("unknown category: {0}")]
    UnknownCategory(String),

    /// Key could not be normalized
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

/// How one category is fetched. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    /// Provider method name (e.g. "daily")
    pub provider_method: String,
    /// Which provider client handles the call
    #[serde(default)]
    pub provider_object: ProviderObject,
    /// Parameters applied before caller overrides
    #[serde(default)]
    pub default_params: Params,
    /// Parameter the normalized key is injected under
    #[serde(default = "default_key_param")]
    pub key_param: String,
    /// How keys for this category are normalized
    #[serde(default)]
    pub key_format: KeyFormat,
}

fn default_key_param() -> String {
    DEFAULT_KEY_PARAM.to_string()
}

impl TaskTemplate {
    /// Template calling `method` on the primary client with no defaults
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            provider_method: method.into(),
            provider_object: ProviderObject::Primary,
            default_params: Params::new(),
            key_param: default_key_param(),
            key_format: KeyFormat::default(),
        }
    }

    /// Dispatch to a different provider object
    pub fn with_object(mut self, object: ProviderObject) -> Self {
        self.provider_object = object;
        self
    }

    /// Add a default parameter
    pub fn with_default(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.default_params.insert(name.into(), value.into());
        self
    }

    /// Inject keys under a different parameter name
    pub fn with_key_param(mut self, key_param: impl Into<String>) -> Self {
        self.key_param = key_param.into();
        self
    }

    /// Use a different key format
    pub fn with_key_format(mut self, key_format: KeyFormat) -> Self {
        self.key_format = key_format;
        self
    }
}

/// Templates keyed by category name, loaded once at startup
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    templates: HashMap<String, TaskTemplate>,
}

impl TaskRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template, replacing any existing one for the category
    pub fn insert(&mut self, category: impl Into<String>, template: TaskTemplate) {
        self.templates.insert(category.into(), template);
    }

    /// Builder-style registration
    pub fn with(mut self, category: impl Into<String>, template: TaskTemplate) -> Self {
        self.insert(category, template);
        self
    }

    /// Look up a category's template
    pub fn get(&self, category: &str) -> Option<&TaskTemplate> {
        self.templates.get(category)
    }

    /// Registered category names, sorted
    pub fn categories(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered templates
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether the registry has no templates
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl From<HashMap<String, TaskTemplate>> for TaskRegistry {
    fn from(templates: HashMap<String, TaskTemplate>) -> Self {
        Self { templates }
    }
}

/// A fully parameterized provider call, ready to be invoked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundTask {
    /// Category the task was built for
    pub category: String,
    /// Normalized key (empty for category-wide tasks)
    pub key: String,
    /// Client the call is routed to
    pub provider_object: ProviderObject,
    /// Method name on that client
    pub provider_method: String,
    /// Defaults merged with overrides and the injected key
    pub params: Params,
}

impl BoundTask {
    /// Perform the call. Every invocation hits the provider again.
    pub async fn invoke(&self, clients: &ProviderClients) -> ProviderResult<Payload> {
        invoke(self, clients).await
    }
}

/// Route a bound task to its provider client and execute it.
pub async fn invoke(task: &BoundTask, clients: &ProviderClients) -> ProviderResult<Payload> {
    clients
        .get(task.provider_object)
        .fetch(&task.provider_method, &task.params)
        .await
}

/// Builds [`BoundTask`]s from the registry
#[derive(Debug, Clone)]
pub struct TaskBuilder {
    registry: Arc<TaskRegistry>,
}

impl TaskBuilder {
    /// Create a builder over a shared registry
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this builder reads from
    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Bind `category` to a concrete call.
    ///
    /// Overrides win over template defaults. A non-empty key is normalized and
    /// written under the template's key parameter last, so it wins over both.
    ///
    /// # Errors
    /// [`TaskError::UnknownCategory`] if no template exists,
    /// [`TaskError::InvalidKey`] if the key cannot be normalized.
    pub fn build(&self, category: &str, key: &str, overrides: &Params) -> Result<BoundTask, TaskError> {
        let template = self
            .registry
            .get(category)
            .ok_or_else(|| TaskError::UnknownCategory(category.to_string()))?;

        let mut params = template.default_params.clone();
        for (name, value) in overrides {
            params.insert(name.clone(), value.clone());
        }

        let key = if key.trim().is_empty() {
            String::new()
        } else {
            let normalized = normalize_key(key, template.key_format)?;
            params.insert(
                template.key_param.clone(),
                serde_json::Value::String(normalized.clone()),
            );
            normalized
        };

        debug!(
            category = %category,
            key = %key,
            method = %template.provider_method,
            object = %template.provider_object,
            "Built task"
        );

        Ok(BoundTask {
            category: category.to_string(),
            key,
            provider_object: template.provider_object,
            provider_method: template.provider_method.clone(),
            params,
        })
    }
}
