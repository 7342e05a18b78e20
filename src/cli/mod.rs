//! CLI command implementations

pub mod config;
pub mod dead_letter;
pub mod error;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::str::FromStr;

pub use config::ConfigCommand;
pub use dead_letter::DeadLetterCommand;
pub use error::CliError;

/// Bulk fetcher command line
#[derive(Parser, Debug)]
#[command(name = "bulk-fetcher")]
#[command(about = "Rate-limited bulk acquisition pipeline tools", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Expose Prometheus metrics on this address (e.g. 127.0.0.1:9000)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Inspect dead-letter files
    DeadLetter(DeadLetterCommand),

    /// Check pipeline configuration files
    Config(ConfigCommand),
}

impl Cli {
    /// Run the selected command
    pub fn execute(&self) -> Result<(), CliError> {
        match &self.command {
            Commands::DeadLetter(command) => command.execute(self.output_format),
            Commands::Config(command) => command.execute(self.output_format),
        }
    }
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}. Valid options: json, human")),
        }
    }
}
