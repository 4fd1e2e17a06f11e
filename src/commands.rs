//! Command handlers
//!
//! Each handler takes the startup `Settings`, wires the components together
//! and returns the process exit status.

use crate::cli::OutputFormat;
use crate::config::{ConfigError, Settings};
use crate::connection::ConnectionParams;
use crate::db::{PostgresCatalog, PostgresProbe};
use crate::diff::{check_baseline, diagnose, Diagnosis};
use crate::error::{GuardError, GuardResult};
use crate::guard::{DeployGuard, PROD_SKIPPED_REASON};
use crate::report::ReportWriter;
use crate::snapshot::{self, CatalogReader, Role, SnapshotProbe};
use crate::stamp::{self, BaselineRecord, LedgerCommand, LedgerStamper, SessionLock, StampResult};
use std::process::ExitCode;
use tracing::{info, warn};

fn report_writer(settings: &Settings) -> ReportWriter {
    ReportWriter::new(settings.report_dir.clone(), settings.auto_migrate)
}

/// Dev probe (always required) and prod probe (optional)
fn probes(settings: &Settings) -> GuardResult<(PostgresProbe, Option<PostgresProbe>)> {
    let dev = PostgresProbe::from_settings(Role::Dev, settings)?
        .ok_or_else(|| GuardError::from(ConfigError::MissingVar("DEV_DATABASE_URL".to_string())))?;
    let prod = PostgresProbe::from_settings(Role::Prod, settings)?;
    Ok((dev, prod))
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => warn!("Could not serialize output: {}", e),
    }
}

/// Probe, diff and report without deciding anything
pub async fn run_audit(
    dev: &dyn SnapshotProbe,
    prod: Option<&dyn SnapshotProbe>,
    threshold: usize,
    reports: &ReportWriter,
    baseline: &BaselineRecord,
) -> GuardResult<Diagnosis> {
    let dev_snapshot = dev.capture().await?;
    if let Err(e) = reports.write_snapshot(&dev_snapshot).await {
        warn!("Could not write dev snapshot report: {}", e);
    }

    let Some(prod) = prod else {
        warn!("⚠️  {}", PROD_SKIPPED_REASON);
        return Ok(Diagnosis::skipped(PROD_SKIPPED_REASON));
    };

    let prod_snapshot = prod.capture().await?;
    if let Err(e) = reports.write_snapshot(&prod_snapshot).await {
        warn!("Could not write prod snapshot report: {}", e);
    }

    let against_baseline = check_baseline(&prod_snapshot, baseline);
    info!("Production vs baseline: {}", against_baseline.status_line());

    Ok(diagnose(&dev_snapshot, &prod_snapshot, threshold))
}

/// `audit`: diagnostic only, exit 0 whatever the diagnosis
pub async fn audit(settings: &Settings, format: OutputFormat) -> GuardResult<ExitCode> {
    let (dev, prod) = probes(settings)?;
    let reports = report_writer(settings);
    let baseline = BaselineRecord::new(settings.ledger.baseline_revision.clone());

    let diagnosis = run_audit(
        &dev,
        prod.as_ref().map(|p| p as &dyn SnapshotProbe),
        settings.drift_threshold,
        &reports,
        &baseline,
    )
    .await?;

    match format {
        OutputFormat::Text => println!("{}", diagnosis.status_line()),
        OutputFormat::Json => print_json(&diagnosis),
    }
    Ok(ExitCode::SUCCESS)
}

/// Stamp `target`, then record its post-stamp snapshot.
///
/// Once the stamp is verified the result stands; a failed re-read only costs the report.
pub async fn run_stamp<T>(
    target: &T,
    ledger: &dyn LedgerStamper,
    baseline: &BaselineRecord,
    reports: &ReportWriter,
) -> GuardResult<StampResult>
where
    T: CatalogReader + SessionLock,
{
    let result = stamp::stamp(target, ledger, baseline).await?;

    match snapshot::capture(target, Role::Prod).await {
        Ok(after) => {
            if let Err(e) = reports.write_snapshot(&after).await {
                warn!("Could not write prod snapshot report: {}", e);
            }
        }
        Err(e) => warn!("Could not re-read production after stamping: {}", e),
    }

    Ok(result)
}

/// `stamp-baseline`: requires the production connection string
pub async fn stamp_baseline(
    settings: &Settings,
    revision: Option<String>,
    format: OutputFormat,
) -> GuardResult<ExitCode> {
    // Fail on configuration before touching the network
    let url = settings.require_url(Role::Prod)?;
    let params = ConnectionParams::from_connection_string(url)?;
    let baseline = BaselineRecord::new(revision.unwrap_or_else(|| settings.ledger.baseline_revision.clone()));

    info!("Stamping production ledger at baseline {}", baseline.baseline_revision);

    let catalog =
        PostgresCatalog::connect(Role::Prod, &params, &settings.ledger.version_table, settings.timeout).await?;
    let ledger = LedgerCommand::new(settings.ledger.stamp_command.clone(), &params, settings.timeout);

    let result = run_stamp(&catalog, &ledger, &baseline, &report_writer(settings)).await?;

    match format {
        OutputFormat::Text => match &result {
            StampResult::Applied { revision } => println!("applied: production ledger stamped at {}", revision),
            StampResult::AlreadyStamped { revision } => {
                println!("already_stamped: production ledger already at {}", revision)
            }
        },
        OutputFormat::Json => print_json(&result),
    }
    Ok(ExitCode::SUCCESS)
}

/// `deploy-guard`: exit 0 only when the guard passes
pub async fn deploy_guard(settings: &Settings, format: OutputFormat) -> GuardResult<ExitCode> {
    let (dev, prod) = probes(settings)?;
    let reports = report_writer(settings);

    Ok(run_deploy_guard(
        &dev,
        prod.as_ref().map(|p| p as &dyn SnapshotProbe),
        settings.drift_threshold,
        &reports,
        format,
    )
    .await)
}

/// Run the guard, print its verdict and map it to the process exit status
pub async fn run_deploy_guard(
    dev: &dyn SnapshotProbe,
    prod: Option<&dyn SnapshotProbe>,
    threshold: usize,
    reports: &ReportWriter,
    format: OutputFormat,
) -> ExitCode {
    let outcome = DeployGuard::new(dev, prod, threshold, reports).run().await;

    match format {
        OutputFormat::Json => print_json(&outcome),
        OutputFormat::Text => {
            if outcome.passed() {
                let line = outcome
                    .diagnosis
                    .as_ref()
                    .map(Diagnosis::status_line)
                    .unwrap_or_else(|| "OK".to_string());
                println!("PASSED: {}", line);
            } else {
                println!("FAILED: promotion blocked");
                for line in &outcome.remediation {
                    println!("  - {}", line);
                }
            }
        }
    }

    ExitCode::from(outcome.exit_status())
}
