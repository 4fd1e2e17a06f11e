//! CLI struct definitions for the ledger guard.
//!
//! All clap-derived types live here. Dispatch logic lives in `commands`.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "ledger-guard",
    version = env!("CARGO_PKG_VERSION"),
    about = "Audit dev/prod schema drift against the migration ledger and gate production deploys"
)]
pub struct Cli {
    /// Directory for audit reports (overrides AUDIT_REPORT_DIR)
    #[clap(long, global = true)]
    pub report_dir: Option<PathBuf>,
    /// Maximum tolerated table-set distance (overrides DRIFT_THRESHOLD)
    #[clap(long, global = true)]
    pub threshold: Option<usize>,
    /// Output format for the command result
    #[clap(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub format: OutputFormat,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Capture dev (and prod, if configured) snapshots and print the drift diagnosis. Never blocks.
    Audit,
    /// Stamp the production ledger at the baseline revision, once
    StampBaseline {
        /// Baseline revision (overrides BASELINE_REVISION)
        #[clap(long)]
        revision: Option<String>,
    },
    /// Run the pre-promotion guard; exits non-zero unless dev and prod agree
    DeployGuard,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}
