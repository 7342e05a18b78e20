//! Configuration checking command

use clap::{Args, Subcommand};
use serde_json::json;
use std::path::PathBuf;

use super::{CliError, OutputFormat};
use crate::config::PipelineConfig;

/// Config subcommand
#[derive(Debug, Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    action: ConfigAction,
}

/// Config actions
#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Parse and validate a pipeline configuration file
    Check {
        /// Path to the TOML file
        path: PathBuf,
    },
}

impl ConfigCommand {
    /// Execute the config command
    pub fn execute(&self, format: OutputFormat) -> Result<(), CliError> {
        match &self.action {
            ConfigAction::Check { path } => {
                let config = PipelineConfig::load(path)?;
                print!("{}", render_summary(&config, format)?);
                Ok(())
            }
        }
    }
}

fn render_summary(config: &PipelineConfig, format: OutputFormat) -> Result<String, CliError> {
    let limiter = config.rate_limiter();
    let registry = config.registry();
    let categories = registry.categories();

    match format {
        OutputFormat::Json => {
            let templates: Vec<_> = categories
                .iter()
                .filter_map(|category| {
                    let template = registry.get(category)?;
                    let rate = limiter.rate_for(category);
                    Some(json!({
                        "category": category,
                        "provider_method": template.provider_method,
                        "provider_object": template.provider_object.to_string(),
                        "rate": rate,
                    }))
                })
                .collect();
            let value = json!({
                "valid": true,
                "worker_count": config.worker_count,
                "queue_capacity": config.queue_capacity,
                "max_retries": config.max_retries,
                "dead_letter_dir": config.dead_letter_dir.display().to_string(),
                "templates": templates,
            });
            Ok(format!("{}\n", serde_json::to_string_pretty(&value)?))
        }
        OutputFormat::Human => {
            let mut lines = vec![
                "Configuration is valid".to_string(),
                format!("  Workers: {}", config.worker_count),
                format!("  Queue capacity: {}", config.queue_capacity),
                format!("  Max retries: {}", config.max_retries),
                format!("  Dead-letter dir: {}", config.dead_letter_dir.display()),
                format!("  Templates: {}", categories.len()),
            ];
            for category in &categories {
                if let Some(template) = registry.get(category) {
                    let rate = limiter.rate_for(category);
                    lines.push(format!(
                        "    {category}: {}.{} ({} per {}s)",
                        template.provider_object, template.provider_method, rate.count, rate.window_secs
                    ));
                }
            }
            Ok(lines.join("\n") + "\n")
        }
    }
}
