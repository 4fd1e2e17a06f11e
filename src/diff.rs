//! Drift Diff Engine
//!
//! Compares two snapshots (or one snapshot against the expected baseline)
//! and produces a `Diagnosis`. Pure: no I/O, deterministic for equal inputs.

use crate::snapshot::DatabaseSnapshot;
use crate::stamp::BaselineRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of drift outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DiagnosisStatus {
    Ok,
    Mismatch,
    Missing,
}

impl DiagnosisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosisStatus::Ok => "OK",
            DiagnosisStatus::Mismatch => "MISMATCH",
            DiagnosisStatus::Missing => "MISSING",
        }
    }
}

impl fmt::Display for DiagnosisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one comparison
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnosis {
    pub status: DiagnosisStatus,
    /// Size of the symmetric difference between the two table sets
    pub schema_distance: usize,
    pub reasons: Vec<String>,
    /// Tables present only on the left-hand snapshot
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub only_in_left: Vec<String>,
    /// Tables present only on the right-hand snapshot
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub only_in_right: Vec<String>,
}

impl Diagnosis {
    /// Diagnosis that carries no comparison at all
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: DiagnosisStatus::Ok,
            schema_distance: 0,
            reasons: vec![reason.into()],
            only_in_left: Vec::new(),
            only_in_right: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == DiagnosisStatus::Ok
    }

    /// `STATUS: first reason` as printed by `audit`
    pub fn status_line(&self) -> String {
        let reason = self
            .reasons
            .first()
            .map(String::as_str)
            .unwrap_or("dev and prod agree");
        format!("{}: {}", self.status, reason)
    }
}

/// How many table names to spell out in a reason before eliding
const LISTED_TABLES: usize = 10;

fn preview(tables: &[String]) -> String {
    if tables.len() <= LISTED_TABLES {
        tables.join(", ")
    } else {
        format!(
            "{}, ... ({} more)",
            tables[..LISTED_TABLES].join(", "),
            tables.len() - LISTED_TABLES
        )
    }
}

/// Compare two snapshots.
///
/// Status rules, first match wins: a missing ledger version on either side is
/// `MISSING`; differing versions are `MISMATCH`; a distance above `threshold`
/// is `MISMATCH`; anything else is `OK`. Every condition that holds adds a
/// reason, including those that did not decide the status.
pub fn diagnose(a: &DatabaseSnapshot, b: &DatabaseSnapshot, threshold: usize) -> Diagnosis {
    let only_in_left: Vec<String> = a.tables.difference(&b.tables).cloned().collect();
    let only_in_right: Vec<String> = b.tables.difference(&a.tables).cloned().collect();
    let schema_distance = only_in_left.len() + only_in_right.len();

    let mut reasons = Vec::new();
    let mut status: Option<DiagnosisStatus> = None;

    let unmanaged: Vec<String> = [a, b]
        .iter()
        .filter(|s| s.ledger_version.is_none())
        .map(|s| s.role.to_string())
        .collect();
    if !unmanaged.is_empty() {
        for role in &unmanaged {
            reasons.push(format!("{} has no ledger_version row", role));
        }
        status.get_or_insert(DiagnosisStatus::Missing);
    }

    if let (Some(va), Some(vb)) = (&a.ledger_version, &b.ledger_version) {
        if va != vb {
            reasons.push(format!(
                "ledger versions differ: {} at {}, {} at {}",
                a.role, va, b.role, vb
            ));
            status.get_or_insert(DiagnosisStatus::Mismatch);
        }
    }

    if schema_distance > threshold {
        reasons.push(format!(
            "{}/{} table sets differ by {} tables (threshold {})",
            a.role, b.role, schema_distance, threshold
        ));
        status.get_or_insert(DiagnosisStatus::Mismatch);
    } else if schema_distance > 0 {
        reasons.push(format!(
            "{}/{} table sets differ by {} tables, within threshold {}",
            a.role, b.role, schema_distance, threshold
        ));
    }

    if !only_in_left.is_empty() {
        reasons.push(format!("only in {}: {}", a.role, preview(&only_in_left)));
    }
    if !only_in_right.is_empty() {
        reasons.push(format!("only in {}: {}", b.role, preview(&only_in_right)));
    }

    Diagnosis {
        status: status.unwrap_or(DiagnosisStatus::Ok),
        schema_distance,
        reasons,
        only_in_left,
        only_in_right,
    }
}

/// Compare one snapshot's ledger position against the expected baseline
pub fn check_baseline(snapshot: &DatabaseSnapshot, baseline: &BaselineRecord) -> Diagnosis {
    let (status, reason) = match &snapshot.ledger_version {
        None => (
            DiagnosisStatus::Missing,
            format!("{} has no ledger_version row", snapshot.role),
        ),
        Some(v) if *v == baseline.baseline_revision => (
            DiagnosisStatus::Ok,
            format!("{} ledger at baseline {}", snapshot.role, v),
        ),
        Some(v) => (
            DiagnosisStatus::Mismatch,
            format!(
                "{} ledger at revision {}, expected baseline {}",
                snapshot.role, v, baseline.baseline_revision
            ),
        ),
    };

    Diagnosis {
        status,
        schema_distance: 0,
        reasons: vec![reason],
        only_in_left: Vec::new(),
        only_in_right: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::tests::snapshot;
    use crate::snapshot::Role;
    use pretty_assertions::assert_eq;

    fn tables(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("public.{}{}", prefix, i)).collect()
    }

    fn refs(v: &[String]) -> Vec<&str> {
        v.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_identical_managed_snapshots_are_ok() {
        let dev = snapshot(Role::Dev, &["public.a", "public.b"], Some("r1"));
        let prod = snapshot(Role::Prod, &["public.b", "public.a"], Some("r1"));

        let diagnosis = diagnose(&dev, &prod, 5);
        assert_eq!(diagnosis.status, DiagnosisStatus::Ok);
        assert_eq!(diagnosis.schema_distance, 0);
        assert!(diagnosis.reasons.is_empty());
        assert_eq!(diagnosis.status_line(), "OK: dev and prod agree");
    }

    #[test]
    fn test_missing_ledger_wins_over_distance() {
        let many = tables("t", 20);
        let dev = snapshot(Role::Dev, &refs(&many), Some("r1"));
        let prod = snapshot(Role::Prod, &["public.x"], None);

        let diagnosis = diagnose(&dev, &prod, 5);
        assert_eq!(diagnosis.status, DiagnosisStatus::Missing);
        assert_eq!(diagnosis.schema_distance, 21);
        assert_eq!(diagnosis.reasons[0], "prod has no ledger_version row");
        assert!(diagnosis.reasons.iter().any(|r| r.contains("differ by 21 tables")));
    }

    #[test]
    fn test_missing_regardless_of_similarity() {
        let dev = snapshot(Role::Dev, &["public.a"], None);
        let prod = snapshot(Role::Prod, &["public.a"], None);

        let diagnosis = diagnose(&dev, &prod, 5);
        assert_eq!(diagnosis.status, DiagnosisStatus::Missing);
        assert_eq!(
            diagnosis.reasons,
            vec![
                "dev has no ledger_version row".to_string(),
                "prod has no ledger_version row".to_string()
            ]
        );
    }

    #[test]
    fn test_version_mismatch_with_distance_reports_both() {
        let dev = snapshot(Role::Dev, &refs(&tables("t", 10)), Some("r2"));
        let prod = snapshot(Role::Prod, &[], Some("r1"));

        let diagnosis = diagnose(&dev, &prod, 5);
        assert_eq!(diagnosis.status, DiagnosisStatus::Mismatch);
        assert_eq!(diagnosis.reasons[0], "ledger versions differ: dev at r2, prod at r1");
        assert_eq!(diagnosis.reasons[1], "dev/prod table sets differ by 10 tables (threshold 5)");
    }

    #[test]
    fn test_distance_above_threshold_is_mismatch() {
        let all = tables("t", 20);
        let dev = snapshot(Role::Dev, &refs(&all), Some("r1"));
        let prod = snapshot(Role::Prod, &refs(&all[..12]), Some("r1"));

        let diagnosis = diagnose(&dev, &prod, 5);
        assert_eq!(diagnosis.status, DiagnosisStatus::Mismatch);
        assert_eq!(diagnosis.schema_distance, 8);
        assert_eq!(diagnosis.only_in_left.len(), 8);
        assert!(diagnosis.only_in_right.is_empty());
    }

    #[test]
    fn test_distance_at_threshold_is_ok_but_noted() {
        let all = tables("t", 5);
        let dev = snapshot(Role::Dev, &refs(&all), Some("r1"));
        let prod = snapshot(Role::Prod, &[], Some("r1"));

        let diagnosis = diagnose(&dev, &prod, 5);
        assert_eq!(diagnosis.status, DiagnosisStatus::Ok);
        assert_eq!(diagnosis.schema_distance, 5);
        assert!(diagnosis.reasons[0].contains("within threshold 5"));
    }

    #[test]
    fn test_distance_is_symmetric() {
        let dev = snapshot(Role::Dev, &["public.a", "public.b", "public.c"], Some("r1"));
        let prod = snapshot(Role::Prod, &["public.c", "public.d"], Some("r1"));

        let ab = diagnose(&dev, &prod, 5);
        let ba = diagnose(&prod, &dev, 5);
        assert_eq!(ab.schema_distance, ba.schema_distance);
        assert_eq!(ab.schema_distance, 3);
        assert_eq!(ab.only_in_left, ba.only_in_right);
    }

    #[test]
    fn test_deterministic() {
        let dev = snapshot(Role::Dev, &["public.a", "public.z"], Some("r1"));
        let prod = snapshot(Role::Prod, &["public.m"], Some("r2"));
        assert_eq!(diagnose(&dev, &prod, 1), diagnose(&dev, &prod, 1));
    }

    #[test]
    fn test_long_table_lists_are_elided() {
        let dev = snapshot(Role::Dev, &refs(&tables("t", 14)), Some("r1"));
        let prod = snapshot(Role::Prod, &[], Some("r1"));

        let diagnosis = diagnose(&dev, &prod, 20);
        let listing = diagnosis.reasons.iter().find(|r| r.starts_with("only in dev")).unwrap();
        assert!(listing.ends_with("(4 more)"));
    }

    #[test]
    fn test_end_to_end_unmanaged_prod() {
        let dev = snapshot(Role::Dev, &["a", "b", "c"], Some("r1"));
        let prod = snapshot(Role::Prod, &["a", "b", "c"], None);

        let diagnosis = diagnose(&dev, &prod, 5);
        assert_eq!(diagnosis.status, DiagnosisStatus::Missing);
        assert_eq!(diagnosis.schema_distance, 0);
    }

    #[test]
    fn test_check_baseline() {
        let baseline = BaselineRecord::new("0000_baseline");

        let at = snapshot(Role::Prod, &[], Some("0000_baseline"));
        assert_eq!(check_baseline(&at, &baseline).status, DiagnosisStatus::Ok);

        let other = snapshot(Role::Prod, &[], Some("abc"));
        let diagnosis = check_baseline(&other, &baseline);
        assert_eq!(diagnosis.status, DiagnosisStatus::Mismatch);
        assert!(diagnosis.reasons[0].contains("expected baseline 0000_baseline"));

        let none = snapshot(Role::Prod, &[], None);
        assert_eq!(check_baseline(&none, &baseline).status, DiagnosisStatus::Missing);
    }

    #[test]
    fn test_status_serializes_uppercase() {
        let json = serde_json::to_string(&DiagnosisStatus::Mismatch).unwrap();
        assert_eq!(json, "\"MISMATCH\"");
    }
}
