//! Dead-letter inspection commands

use clap::{Args, Subcommand};
use serde_json::json;
use std::fmt::Write as _;
use std::path::PathBuf;

use super::{CliError, OutputFormat};
use crate::dead_letter::{self, DeadLetterEntry, DeadLetterStore};

/// Dead-letter subcommand
#[derive(Debug, Args)]
pub struct DeadLetterCommand {
    #[command(subcommand)]
    action: DeadLetterAction,
}

/// Dead-letter actions
#[derive(Debug, Subcommand)]
enum DeadLetterAction {
    /// Print the entries recorded for one date
    Show {
        /// Dead-letter directory
        #[arg(long, default_value = "dead_letter")]
        dir: PathBuf,

        /// Date to show (YYYYMMDD, default: today)
        #[arg(long)]
        date: Option<String>,
    },
    /// List dates that have a dead-letter file
    Dates {
        /// Dead-letter directory
        #[arg(long, default_value = "dead_letter")]
        dir: PathBuf,
    },
}

impl DeadLetterCommand {
    /// Execute the dead-letter command
    pub fn execute(&self, format: OutputFormat) -> Result<(), CliError> {
        let output = match &self.action {
            DeadLetterAction::Show { dir, date } => {
                let date = date.clone().unwrap_or_else(dead_letter::today);
                let entries = DeadLetterStore::new(dir).entries(&date)?;
                render_entries(&date, &entries, format)?
            }
            DeadLetterAction::Dates { dir } => {
                let store = DeadLetterStore::new(dir);
                let dates = store.list_dates()?;
                render_dates(&store, &dates, format)?
            }
        };
        print!("{output}");
        Ok(())
    }
}

fn render_entries(
    date: &str,
    entries: &[DeadLetterEntry],
    format: OutputFormat,
) -> Result<String, CliError> {
    match format {
        OutputFormat::Json => {
            let value = json!({ "date": date, "count": entries.len(), "entries": entries });
            Ok(format!("{}\n", serde_json::to_string_pretty(&value)?))
        }
        OutputFormat::Human => {
            let mut out = String::new();
            if entries.is_empty() {
                let _ = writeln!(out, "No dead letters for {date}");
                return Ok(out);
            }
            let _ = writeln!(out, "{} dead letter(s) for {date}:\n", entries.len());
            for entry in entries {
                let key = if entry.key.is_empty() { "-" } else { entry.key.as_str() };
                let _ = writeln!(
                    out,
                    "{} | {} | {}",
                    entry.category,
                    key,
                    entry.recorded_at.to_rfc3339()
                );
            }
            Ok(out)
        }
    }
}

fn render_dates(
    store: &DeadLetterStore,
    dates: &[String],
    format: OutputFormat,
) -> Result<String, CliError> {
    match format {
        OutputFormat::Json => Ok(format!(
            "{}\n",
            serde_json::to_string_pretty(&json!({
                "dir": store.dir().display().to_string(),
                "dates": dates,
            }))?
        )),
        OutputFormat::Human => {
            let mut out = String::new();
            if dates.is_empty() {
                let _ = writeln!(out, "No dead-letter files in {}", store.dir().display());
            }
            for date in dates {
                let _ = writeln!(out, "{date}");
            }
            Ok(out)
        }
    }
}
