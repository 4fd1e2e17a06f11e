//! Deploy Guard
//!
//! Read-only state machine run before every promotion:
//! `PROBE_DEV -> PROBE_PROD -> DIFFERENCE -> DECIDE -> PASSED | FAILED`.
//! A report is written at every transition so partial runs leave a trail.

use crate::diff::{diagnose, Diagnosis, DiagnosisStatus};
use crate::error::{GuardError, GuardResult, GUARD_FAILED_EXIT};
use crate::report::ReportWriter;
use crate::snapshot::{DatabaseSnapshot, SnapshotProbe};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracing::{error, info, warn};

pub const PROD_SKIPPED_REASON: &str = "production audit skipped — not configured";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GuardState {
    ProbeDev,
    ProbeProd,
    Difference,
    Decide,
    Passed,
    Failed,
}

impl GuardState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GuardState::Passed | GuardState::Failed)
    }
}

impl fmt::Display for GuardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GuardState::ProbeDev => "PROBE_DEV",
            GuardState::ProbeProd => "PROBE_PROD",
            GuardState::Difference => "DIFFERENCE",
            GuardState::Decide => "DECIDE",
            GuardState::Passed => "PASSED",
            GuardState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Everything the guard knows at one point of the run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardProgress {
    pub state: GuardState,
    pub trail: Vec<GuardState>,
    pub updated_at: DateTime<Utc>,
    pub threshold: usize,
    pub diagnosis: Option<Diagnosis>,
    pub reasons: Vec<String>,
}

/// Final verdict handed back to the pipeline
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardOutcome {
    pub state: GuardState,
    pub diagnosis: Option<Diagnosis>,
    /// Actionable lines to print when the guard fails
    pub remediation: Vec<String>,
    pub trail: Vec<GuardState>,
}

impl GuardOutcome {
    pub fn passed(&self) -> bool {
        self.state == GuardState::Passed
    }

    /// Process exit status for the pipeline: 0 only when the guard passed
    pub fn exit_status(&self) -> u8 {
        if self.passed() {
            0
        } else {
            GUARD_FAILED_EXIT
        }
    }
}

/// Hints appended after the diagnosis reasons for a failed decision
pub fn remediation_hints(diagnosis: &Diagnosis) -> Vec<String> {
    match diagnosis.status {
        DiagnosisStatus::Ok => Vec::new(),
        DiagnosisStatus::Missing => vec![
            "bring the unmanaged database under the ledger: verify its schema, then run `stamp-baseline`".to_string(),
        ],
        DiagnosisStatus::Mismatch => vec![
            "apply pending ledger migrations so dev and prod reach the same revision before promoting".to_string(),
            "do not let the platform's auto-generated diff reconcile the table sets".to_string(),
        ],
    }
}

pub struct DeployGuard<'a> {
    dev: &'a dyn SnapshotProbe,
    prod: Option<&'a dyn SnapshotProbe>,
    threshold: usize,
    reports: &'a ReportWriter,
    progress: GuardProgress,
}

impl<'a> DeployGuard<'a> {
    pub fn new(
        dev: &'a dyn SnapshotProbe,
        prod: Option<&'a dyn SnapshotProbe>,
        threshold: usize,
        reports: &'a ReportWriter,
    ) -> Self {
        Self {
            dev,
            prod,
            threshold,
            reports,
            progress: GuardProgress {
                state: GuardState::ProbeDev,
                trail: vec![GuardState::ProbeDev],
                updated_at: Utc::now(),
                threshold,
                diagnosis: None,
                reasons: Vec::new(),
            },
        }
    }

    /// Record the transition and persist it before the next state runs
    async fn advance(&mut self, next: GuardState) {
        info!("Deploy guard: {} -> {}", self.progress.state, next);
        self.progress.state = next;
        self.progress.trail.push(next);
        self.progress.updated_at = Utc::now();
        if let Err(e) = self.reports.write_guard_progress(&self.progress).await {
            warn!("Could not write guard report: {}", e);
        }
    }

    async fn probe(&self, probe: &dyn SnapshotProbe) -> GuardResult<DatabaseSnapshot> {
        info!("Probing {} database", probe.role());
        probe.capture().await
    }

    async fn record_snapshot(&self, snapshot: &DatabaseSnapshot) {
        if let Err(e) = self.reports.write_snapshot(snapshot).await {
            warn!("Could not write {} snapshot report: {}", snapshot.role, e);
        }
    }

    async fn fail_probe(&mut self, err: GuardError) {
        let reason = match &err {
            GuardError::Connection { role, message } => format!("{} unreachable: {}", role, message),
            other => other.to_string(),
        };
        error!("Deploy guard probe failed: {}", reason);
        self.progress.reasons.push(reason);
        self.progress.reasons.push(err.remediation());
        self.advance(GuardState::Failed).await;
    }

    /// Run the state machine to a terminal state
    pub async fn run(mut self) -> GuardOutcome {
        if let Err(e) = self.reports.write_guard_progress(&self.progress).await {
            warn!("Could not write guard report: {}", e);
        }

        let mut dev_snapshot: Option<DatabaseSnapshot> = None;
        let mut prod_snapshot: Option<DatabaseSnapshot> = None;

        while !self.progress.state.is_terminal() {
            match self.progress.state {
                GuardState::ProbeDev => match self.probe(self.dev).await {
                    Ok(snapshot) => {
                        self.record_snapshot(&snapshot).await;
                        dev_snapshot = Some(snapshot);
                        self.advance(GuardState::ProbeProd).await;
                    }
                    Err(e) => self.fail_probe(e).await,
                },
                GuardState::ProbeProd => match self.prod {
                    None => {
                        warn!("⚠️  {}", PROD_SKIPPED_REASON);
                        let diagnosis = Diagnosis::skipped(PROD_SKIPPED_REASON);
                        self.progress.reasons = diagnosis.reasons.clone();
                        self.progress.diagnosis = Some(diagnosis);
                        self.advance(GuardState::Decide).await;
                    }
                    Some(prod) => match self.probe(prod).await {
                        Ok(snapshot) => {
                            self.record_snapshot(&snapshot).await;
                            prod_snapshot = Some(snapshot);
                            self.advance(GuardState::Difference).await;
                        }
                        Err(e) => self.fail_probe(e).await,
                    },
                },
                GuardState::Difference => {
                    if let (Some(dev), Some(prod)) = (&dev_snapshot, &prod_snapshot) {
                        let diagnosis = diagnose(dev, prod, self.threshold);
                        info!(
                            "Diagnosis: {} (distance {})",
                            diagnosis.status, diagnosis.schema_distance
                        );
                        self.progress.reasons = diagnosis.reasons.clone();
                        self.progress.diagnosis = Some(diagnosis);
                    }
                    self.advance(GuardState::Decide).await;
                }
                GuardState::Decide => {
                    let next = match &self.progress.diagnosis {
                        Some(d) if d.is_ok() => GuardState::Passed,
                        Some(d) => {
                            let hints = remediation_hints(d);
                            self.progress.reasons.extend(hints);
                            GuardState::Failed
                        }
                        None => {
                            self.progress.reasons.push("no diagnosis was produced".to_string());
                            GuardState::Failed
                        }
                    };
                    self.advance(next).await;
                }
                GuardState::Passed | GuardState::Failed => break,
            }
        }

        let remediation = if self.progress.state == GuardState::Failed {
            self.progress.reasons.clone()
        } else {
            Vec::new()
        };

        GuardOutcome {
            state: self.progress.state,
            diagnosis: self.progress.diagnosis,
            remediation,
            trail: self.progress.trail,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::AutoMigrate;
    use crate::snapshot::tests::snapshot;
    use crate::snapshot::Role;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    /// Probe returning a canned snapshot or a connection failure
    pub struct FixedProbe {
        pub role: Role,
        pub snapshot: Option<DatabaseSnapshot>,
    }

    #[async_trait]
    impl SnapshotProbe for FixedProbe {
        fn role(&self) -> Role {
            self.role
        }

        async fn capture(&self) -> GuardResult<DatabaseSnapshot> {
            self.snapshot.clone().ok_or(GuardError::Connection {
                role: self.role,
                message: "connection refused".to_string(),
            })
        }
    }

    pub fn probe(role: Role, tables: &[&str], version: Option<&str>) -> FixedProbe {
        FixedProbe {
            role,
            snapshot: Some(snapshot(role, tables, version)),
        }
    }

    fn numbered(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("public.t{}", i)).collect()
    }

    #[tokio::test]
    async fn test_no_prod_configured_passes_and_reports_skip() {
        let dir = tempfile::tempdir().unwrap();
        let reports = ReportWriter::new(dir.path(), AutoMigrate::Unset);
        let dev = probe(Role::Dev, &["public.a"], Some("r1"));

        let outcome = DeployGuard::new(&dev, None, 5, &reports).run().await;

        assert!(outcome.passed());
        assert_eq!(
            outcome.trail,
            vec![GuardState::ProbeDev, GuardState::ProbeProd, GuardState::Decide, GuardState::Passed]
        );
        let report = std::fs::read_to_string(dir.path().join("deploy_guard.txt")).unwrap();
        assert!(report.contains("state: PASSED"));
        assert!(report.contains(PROD_SKIPPED_REASON));
        assert!(dir.path().join("dev_schema_audit.txt").exists());
    }

    #[tokio::test]
    async fn test_matching_prod_passes() {
        let dir = tempfile::tempdir().unwrap();
        let reports = ReportWriter::new(dir.path(), AutoMigrate::Disabled);
        let dev = probe(Role::Dev, &["public.a", "public.b"], Some("r1"));
        let prod = probe(Role::Prod, &["public.a", "public.b"], Some("r1"));

        let outcome = DeployGuard::new(&dev, Some(&prod), 5, &reports).run().await;

        assert!(outcome.passed());
        assert_eq!(outcome.diagnosis.unwrap().schema_distance, 0);
        assert!(outcome.trail.contains(&GuardState::Difference));
        assert!(dir.path().join("prod_schema_audit.txt").exists());
    }

    #[tokio::test]
    async fn test_table_drift_beyond_threshold_fails() {
        let dir = tempfile::tempdir().unwrap();
        let reports = ReportWriter::new(dir.path(), AutoMigrate::Unset);
        let all = numbered(20);
        let refs: Vec<&str> = all.iter().map(String::as_str).collect();
        let dev = probe(Role::Dev, &refs, Some("r1"));
        let prod = probe(Role::Prod, &refs[..12], Some("r1"));

        let outcome = DeployGuard::new(&dev, Some(&prod), 5, &reports).run().await;

        assert!(!outcome.passed());
        let diagnosis = outcome.diagnosis.unwrap();
        assert_eq!(diagnosis.status, DiagnosisStatus::Mismatch);
        assert_eq!(diagnosis.schema_distance, 8);
        assert!(outcome.remediation.iter().any(|r| r.contains("differ by 8 tables")));
    }

    #[tokio::test]
    async fn test_unmanaged_prod_fails_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let reports = ReportWriter::new(dir.path(), AutoMigrate::Unset);
        let dev = probe(Role::Dev, &["a", "b", "c"], Some("r1"));
        let prod = probe(Role::Prod, &["a", "b", "c"], None);

        let outcome = DeployGuard::new(&dev, Some(&prod), 5, &reports).run().await;

        assert_eq!(outcome.state, GuardState::Failed);
        let diagnosis = outcome.diagnosis.unwrap();
        assert_eq!(diagnosis.status, DiagnosisStatus::Missing);
        assert_eq!(diagnosis.schema_distance, 0);
        assert!(outcome.remediation.iter().any(|r| r.contains("stamp-baseline")));
    }

    #[tokio::test]
    async fn test_dev_unreachable_fails_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let reports = ReportWriter::new(dir.path(), AutoMigrate::Unset);
        let dev = FixedProbe { role: Role::Dev, snapshot: None };
        let prod = probe(Role::Prod, &["a"], Some("r1"));

        let outcome = DeployGuard::new(&dev, Some(&prod), 5, &reports).run().await;

        assert_eq!(outcome.trail, vec![GuardState::ProbeDev, GuardState::Failed]);
        assert!(outcome.remediation[0].starts_with("dev unreachable"));
        assert!(outcome.diagnosis.is_none());
    }

    #[tokio::test]
    async fn test_prod_unreachable_fails() {
        let dir = tempfile::tempdir().unwrap();
        let reports = ReportWriter::new(dir.path(), AutoMigrate::Unset);
        let dev = probe(Role::Dev, &["a"], Some("r1"));
        let prod = FixedProbe { role: Role::Prod, snapshot: None };

        let outcome = DeployGuard::new(&dev, Some(&prod), 5, &reports).run().await;

        assert_eq!(outcome.state, GuardState::Failed);
        assert!(outcome.remediation[0].starts_with("prod unreachable"));
    }

    #[tokio::test]
    async fn test_report_failure_does_not_change_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let reports = ReportWriter::new(dir.path().join("missing"), AutoMigrate::Unset);
        let dev = probe(Role::Dev, &["a"], Some("r1"));
        let prod = probe(Role::Prod, &["a"], Some("r1"));

        let outcome = DeployGuard::new(&dev, Some(&prod), 5, &reports).run().await;
        assert!(outcome.passed());
    }
}
