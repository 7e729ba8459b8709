//! Credwatch CLI
//!
//! Command-line runner for application-registration secret expiry checks.
//!
//! # Usage
//!
//! ```bash
//! # Check every registration and deliver the report to configured sinks
//! credwatch run
//!
//! # Report secrets expiring within 14 days without delivering anything
//! credwatch run --threshold 14 --dry-run
//!
//! # Re-render a saved snapshot
//! credwatch render ~/.local/share/credwatch/snapshots/expiring_apps_20240101_090000.json --html
//!
//! # Show what the configuration enables
//! credwatch check-config
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use credwatch_core::{
    CredentialRecord, Pipeline, RunOutcome, RunState, Settings, SinkOutcome, read_snapshot, recompute, render,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "credwatch")]
#[command(about = "Monitor client secret expiry of application registrations")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Defaults to `run` with configured settings
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, classify, report and deliver
    Run {
        /// Report secrets expiring within this many days
        #[arg(short, long, allow_hyphen_values = true)]
        threshold: Option<i64>,

        /// Print the report instead of delivering it
        #[arg(long)]
        dry_run: bool,
    },

    /// Render a saved snapshot to stdout
    Render {
        /// Snapshot file written by a previous run
        snapshot: PathBuf,

        /// Emit the HTML document instead of the plain table
        #[arg(long)]
        html: bool,
    },

    /// Load and validate the configuration
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Some(Commands::Run { threshold, dry_run }) => {
            run(cli.config.as_deref(), threshold, dry_run).await
        }
        Some(Commands::Render { snapshot, html }) => render_snapshot(&snapshot, html),
        Some(Commands::CheckConfig) => check_config(cli.config.as_deref()),
        None => run(cli.config.as_deref(), None, false).await,
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => Settings::default_path()?,
    };
    info!("Loading configuration from {}", path.display());

    Settings::load(&path).with_context(|| format!("could not load {}", path.display()))
}

async fn run(config: Option<&Path>, threshold: Option<i64>, dry_run: bool) -> Result<ExitCode> {
    let mut settings = match load_settings(config) {
        Ok(settings) => settings,
        Err(e) => {
            error!(stage = %RunState::Init, "Run aborted: {:#}", e);
            return Ok(ExitCode::FAILURE);
        }
    };
    if let Some(threshold) = threshold {
        settings.threshold_days = threshold;
    }

    let pipeline = match Pipeline::from_settings(&settings) {
        Ok(pipeline) => pipeline.with_dry_run(dry_run),
        Err(e) => {
            let outcome = RunOutcome::aborted(e);
            return Ok(finish(outcome));
        }
    };

    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_err() {
            // No signal handling available; never cancel.
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    let outcome = pipeline.run_until(Utc::now(), shutdown).await;
    Ok(finish(outcome))
}

fn finish(outcome: RunOutcome) -> ExitCode {
    if let Some(error) = &outcome.error {
        error!(stage = %error.stage(), "Run aborted: {}", error);
        return ExitCode::FAILURE;
    }

    println!(
        "Checked {} credential(s); {} expiring or expired.",
        outcome.records_seen,
        outcome.selected.len()
    );
    for sink in &outcome.sink_results {
        let status = match &sink.result {
            Ok(SinkOutcome::Delivered { detail }) => format!("delivered ({})", detail),
            Ok(SinkOutcome::Skipped { reason }) => format!("skipped ({})", reason),
            Err(e) => format!("failed: {}", e),
        };
        println!("  {}: {}", sink.name, status);
    }
    if let Some(path) = &outcome.snapshot_path {
        println!("Snapshot: {}", path.display());
    }
    if let Some(report) = &outcome.fallback_report {
        println!();
        println!("{}", report);
    }

    ExitCode::SUCCESS
}

fn render_snapshot(path: &Path, html: bool) -> Result<ExitCode> {
    let records = read_snapshot(path)?;
    println!("{}", snapshot_report(&records, Utc::now(), html));
    Ok(ExitCode::SUCCESS)
}

/// Day counts in a snapshot are as of the run that wrote it; count again.
fn snapshot_report(records: &[CredentialRecord], now: DateTime<Utc>, html: bool) -> String {
    let report = render(&recompute(records, now), now);
    if html { report.html } else { report.plain }
}

fn check_config(config: Option<&Path>) -> Result<ExitCode> {
    let settings = match load_settings(config) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    println!("Threshold: {} days", settings.threshold_days);
    println!("Timeout: {}s", settings.timeout_secs);
    println!("Directory: {}", settings.directory.base_url);
    println!(
        "Identity: tenant={} client={} secret={}",
        or_missing(&settings.identity.tenant_id),
        or_missing(&settings.identity.client_id),
        settings
            .identity
            .client_secret
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "<missing>".to_string())
    );

    match &settings.ingestion_sink {
        Some(sink) if sink.enabled => println!(
            "Log ingestion: enabled (workspace {}, log type {})",
            or_missing(&sink.endpoint_id),
            sink.log_type
        ),
        Some(_) => println!("Log ingestion: disabled"),
        None => println!("Log ingestion: not configured"),
    }
    match &settings.notification_sink {
        Some(sink) if sink.enabled => println!(
            "Email: enabled ({}:{}, {} recipient(s))",
            or_missing(&sink.smtp_host),
            sink.smtp_port,
            sink.recipients.len()
        ),
        Some(_) => println!("Email: disabled"),
        None => println!("Email: not configured"),
    }
    match settings.snapshot_dir() {
        Some(dir) => println!("Snapshots: {}", dir.display()),
        None => println!("Snapshots: disabled"),
    }

    if let Err(e) = settings.validate_identity() {
        eprintln!("{}", e);
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn or_missing(value: &str) -> &str {
    if value.trim().is_empty() { "<missing>" } else { value }
}
