//! dayreport - daily work reports written by an LLM
//!
//! Collects the day's time entries, issue-tracker tasks, and commits from
//! every configured source, decides whether there is enough to report on,
//! has an LLM write the report, and emails it.
//!
//! Exit codes:
//!   0 - Report delivered, printed, or skipped for lack of activity
//!   1 - Runtime or configuration error

mod aggregator;
mod cli;
mod config;
mod error;
mod mailer;
mod models;
mod report;
mod sources;

use aggregator::{Aggregator, GateDecision};
use anyhow::{Context, Result};
use cli::Args;
use config::{Config, DEFAULT_CONFIG_FILE};
use indicatif::{ProgressBar, ProgressStyle};
use mailer::Mailer;
use models::{format_minutes, AggregatedDataset, ReportDay};
use report::{PromptTemplates, ReportSynthesizer};
use std::path::Path;
use std::time::Duration;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("dayreport v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    if let Err(e) = run(args).await {
        error!("Run failed: {:#}", e);
        eprintln!("\n❌ Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Handle --init-config: generate a default .dayreport.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Add your API credentials there or export them as environment variables.");
    Ok(())
}

/// Initialize logging; `RUST_LOG` wins over the verbosity flags.
fn init_logging(args: &Args) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(args.log_level()).into())
        .from_env_lossy();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Warning: a tracing subscriber was already installed");
    }
}

/// Collect, gate, synthesize, deliver.
async fn run(args: Args) -> Result<()> {
    let mut config = load_config(&args)?;
    config.apply_process_env();
    config.merge_with_args(&args);
    config.validate().context("Invalid configuration")?;

    let day = match args.date {
        Some(date) => ReportDay::for_date(date),
        None => ReportDay::local_today(),
    };

    // Step 1: Collect from every configured source
    let aggregator = Aggregator::from_config(&config);
    let sources = aggregator.source_names();
    if sources.is_empty() {
        warn!(
            "No sources are configured; set credentials in {} or the environment",
            DEFAULT_CONFIG_FILE
        );
    }
    println!("📥 Collecting activity for {}...", day.iso_date());
    println!(
        "   Sources: {}",
        if sources.is_empty() { "none".to_string() } else { sources.join(", ") }
    );

    let dataset = aggregator.collect(&day).await;
    print_summary(&dataset);

    if args.dry_run {
        let json = serde_json::to_string_pretty(&dataset).context("Failed to serialize dataset")?;
        println!("\n{}", json);
        match aggregator.gate(&dataset) {
            GateDecision::Proceed => println!("\n   A report would be generated."),
            GateDecision::Skipped(reason) => {
                println!("\n   A report would be skipped: {}.", reason)
            }
        }
        println!("\n✅ Dry run complete. No LLM calls were made.");
        return Ok(());
    }

    // Step 2: Gate
    if let GateDecision::Skipped(reason) = aggregator.gate(&dataset) {
        println!("\n⏭️ SKIPPED: {}", reason);
        return Ok(());
    }

    // Step 3: Write the report
    let synthesizer = ReportSynthesizer::from_config(&config.llm)?;
    let templates = PromptTemplates::load(Path::new(&config.llm.templates_dir));

    println!("\n🤖 Writing report...");
    println!("   Model: {}", synthesizer.model());

    let spinner = if args.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("   {spinner:.green} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message("Waiting for the model");
    spinner.enable_steady_tick(Duration::from_millis(120));

    let result = synthesizer.generate(&dataset, &templates, &day).await;
    spinner.finish_and_clear();
    let report = result.context("Failed to generate report")?;

    if let Some(ref path) = args.output {
        std::fs::write(path, &report)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        println!("   Report saved to: {}", path.display());
    }

    // Step 4: Deliver
    if args.no_email {
        println!("\n{}", report);
        println!("\n✅ Report generated (email disabled).");
        return Ok(());
    }

    let recipients = &config.general.recipients;
    if recipients.is_empty() {
        println!("\n⚠️ WARNING: No recipients configured (RECIPIENT_EMAILS is empty)");
        if args.output.is_none() {
            println!("\n{}", report);
        }
        return Ok(());
    }

    println!("\n📧 Sending report to {} recipient(s)...", recipients.len());
    let mailer = Mailer::from_config(&config.smtp)?;
    mailer.send_report(recipients, &report, day.date).await?;

    println!("\n✅ SUCCESS: Report sent to {} recipient(s)", recipients.len());
    Ok(())
}

fn print_summary(dataset: &AggregatedDataset) {
    println!("\n📊 Collected:");
    println!("   Commits: {}", dataset.commits.len());
    println!(
        "   Tasks: {} in progress | {} closed today | {} open",
        dataset.tasks.in_progress.len(),
        dataset.tasks.closed_today.len(),
        dataset.tasks.all.len()
    );
    if !dataset.boards.is_empty() || !dataset.board_items.is_empty() {
        println!(
            "   Boards: {} | Board items today: {}",
            dataset.boards.len(),
            dataset.board_items.len()
        );
    }
    println!(
        "   Time entries: {} ({})",
        dataset.time_entries.len(),
        format_minutes(dataset.total_minutes())
    );
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults and environment");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {:#}", e);
            Ok(Config::default())
        }
    }
}
