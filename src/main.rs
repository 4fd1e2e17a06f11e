//! Schema Ledger Guard
//!
//! Keeps a production database out of reach of auto-generated schema diffs.
//! The migration ledger is the single source of truth; this binary checks
//! that dev and prod agree with it before anything is promoted.
//!
//! COMMANDS:
//! - `audit`: capture dev/prod snapshots, print the drift diagnosis (never blocks)
//! - `stamp-baseline`: mark an unmanaged production ledger at the baseline, once
//! - `deploy-guard`: read-only go/no-go gate for the deployment pipeline

mod cli;
mod commands;
mod config;
mod connection;
mod db;
mod diff;
mod error;
mod guard;
mod report;
mod snapshot;
mod stamp;

use crate::cli::{Cli, Command};
use crate::config::Settings;
use crate::error::GuardError;
use clap::Parser;
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing subscriber for structured logging
    init_tracing();

    // Load configuration once; nothing downstream reads the environment
    let mut settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            let err = GuardError::from(e);
            err.report();
            return err.exit_code();
        }
    };
    if let Some(dir) = cli.report_dir {
        settings.report_dir = dir;
    }
    if let Some(threshold) = cli.threshold {
        settings.drift_threshold = threshold;
    }

    info!(
        "📋 Configuration loaded (threshold {}, prod {}, auto_migrate {})",
        settings.drift_threshold,
        if settings.prod_url.is_some() { "configured" } else { "not configured" },
        settings.auto_migrate.as_str()
    );
    if settings.prod_url.is_none() {
        warn!("⚠️  PROD_DATABASE_URL not set; production checks will be skipped");
    }

    let result = match cli.command {
        Command::Audit => commands::audit(&settings, cli.format).await,
        Command::StampBaseline { revision } => commands::stamp_baseline(&settings, revision, cli.format).await,
        Command::DeployGuard => commands::deploy_guard(&settings, cli.format).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            e.report();
            e.exit_code()
        }
    }
}

/// Initialize tracing with structured logging on stderr
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ledger_guard=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}
