//! Command-line interface argument parsing.
//!
//! Flags override the config file and the environment for the few settings
//! that make sense per run; credentials stay in config/env only.

use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;

/// dayreport - LLM-written daily work reports
///
/// Collects today's Clockify time entries, Jira tasks, and GitLab/GitHub
/// commits, asks an LLM to write the report, and emails it.
///
/// Examples:
///   dayreport
///   dayreport --dry-run
///   dayreport --date 2024-05-02 --no-email
///   dayreport --allow-empty-time --to boss@example.com,team@example.com
///   dayreport --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to configuration file
    ///
    /// If not specified, looks for .dayreport.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Day to report on (YYYY-MM-DD), instead of today
    #[arg(short, long, value_name = "DATE")]
    pub date: Option<NaiveDate>,

    /// Collect data and print it as JSON without calling the LLM
    #[arg(long)]
    pub dry_run: bool,

    /// Print the report instead of emailing it
    #[arg(long)]
    pub no_email: bool,

    /// Also write the report to this file
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Generate a report even when no time was tracked
    #[arg(long)]
    pub allow_empty_time: bool,

    /// LLM model used to write the report
    #[arg(short, long, env = "OPENAI_MODEL")]
    pub model: Option<String>,

    /// Report recipients (comma-separated), replacing RECIPIENT_EMAILS
    #[arg(long, value_name = "EMAILS", value_delimiter = ',')]
    pub to: Option<Vec<String>>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .dayreport.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref recipients) = self.to {
            if let Some(bad) = recipients.iter().find(|r| !r.contains('@')) {
                return Err(format!("Invalid recipient address: {}", bad));
            }
        }

        if let Some(ref model) = self.model {
            if model.trim().is_empty() {
                return Err("Model name cannot be empty".to_string());
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
