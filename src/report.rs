//! Report Writer
//!
//! Renders snapshots and guard progress into fixed-layout files. Each file is
//! overwritten per run so it always reflects the latest capture.

use crate::config::AutoMigrate;
use crate::guard::GuardProgress;
use crate::snapshot::{DatabaseSnapshot, Role};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const GUARD_REPORT_TEXT: &str = "deploy_guard.txt";
pub const GUARD_REPORT_JSON: &str = "deploy_guard.json";

/// Writes audit artifacts into one directory
#[derive(Debug, Clone)]
pub struct ReportWriter {
    dir: PathBuf,
    auto_migrate: AutoMigrate,
}

impl ReportWriter {
    pub fn new(dir: impl Into<PathBuf>, auto_migrate: AutoMigrate) -> Self {
        Self {
            dir: dir.into(),
            auto_migrate,
        }
    }

    /// Destination of the snapshot summary for `role`
    pub fn snapshot_path(&self, role: Role) -> PathBuf {
        self.dir.join(format!("{}_schema_audit.txt", role))
    }

    /// Write the snapshot summary to its per-role file
    pub async fn write_snapshot(&self, snapshot: &DatabaseSnapshot) -> std::io::Result<PathBuf> {
        let path = self.snapshot_path(snapshot.role);
        self.write_snapshot_to(snapshot, &path).await?;
        Ok(path)
    }

    pub async fn write_snapshot_to(&self, snapshot: &DatabaseSnapshot, destination: &Path) -> std::io::Result<()> {
        let body = render_snapshot(snapshot, self.auto_migrate);
        tokio::fs::write(destination, body).await?;
        debug!("Wrote {} snapshot report to {}", snapshot.role, destination.display());
        Ok(())
    }

    /// Write the guard's current state as text and JSON
    pub async fn write_guard_progress(&self, progress: &GuardProgress) -> std::io::Result<PathBuf> {
        let text_path = self.dir.join(GUARD_REPORT_TEXT);
        tokio::fs::write(&text_path, render_guard_progress(progress, self.auto_migrate)).await?;

        let json = serde_json::to_vec_pretty(progress)?;
        tokio::fs::write(self.dir.join(GUARD_REPORT_JSON), json).await?;

        debug!("Wrote guard report ({:?}) to {}", progress.state, text_path.display());
        Ok(text_path)
    }
}

/// Fixed snapshot layout: header, sorted inventory, trailing ledger version
pub fn render_snapshot(snapshot: &DatabaseSnapshot, auto_migrate: AutoMigrate) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# schema audit");
    let _ = writeln!(out, "source: {} {}", snapshot.role, snapshot.source);
    let _ = writeln!(out, "captured_at: {}", snapshot.captured_at.to_rfc3339());
    let _ = writeln!(out, "auto_migrate: {}", auto_migrate.as_str());
    let _ = writeln!(out, "table_count: {}", snapshot.tables.len());
    let _ = writeln!(out, "tables_sha256: {}", snapshot.tables_checksum());
    let _ = writeln!(out, "tables:");
    // BTreeSet iterates in sorted order
    for table in &snapshot.tables {
        let _ = writeln!(out, "  {}", table);
    }
    let _ = writeln!(
        out,
        "ledger_version: {}",
        snapshot.ledger_version.as_deref().unwrap_or("(absent)")
    );
    out
}

pub fn render_guard_progress(progress: &GuardProgress, auto_migrate: AutoMigrate) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# deploy guard");
    let _ = writeln!(out, "updated_at: {}", progress.updated_at.to_rfc3339());
    let _ = writeln!(out, "state: {}", progress.state);
    let _ = writeln!(out, "auto_migrate: {}", auto_migrate.as_str());
    let _ = writeln!(out, "threshold: {}", progress.threshold);
    let _ = writeln!(out, "trail: {}", progress.trail.iter().map(ToString::to_string).collect::<Vec<_>>().join(" -> "));
    match &progress.diagnosis {
        Some(d) => {
            let _ = writeln!(out, "status: {}", d.status);
            let _ = writeln!(out, "schema_distance: {}", d.schema_distance);
        }
        None => {
            let _ = writeln!(out, "status: (pending)");
        }
    }
    let _ = writeln!(out, "reasons:");
    for reason in &progress.reasons {
        let _ = writeln!(out, "  - {}", reason);
    }
    out
}
