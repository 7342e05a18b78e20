//! CLI error types and conversions

use crate::config::ConfigError;
use crate::dead_letter::DeadLetterError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    /// Dead-letter error
    #[error("dead-letter error: {0}")]
    DeadLetterError(#[from] DeadLetterError),

    /// Output could not be rendered
    #[error("output error: {0}")]
    OutputError(String),
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::OutputError(err.to_string())
    }
}
