//! Baseline Stamper
//!
//! Marks a database's ledger at the baseline revision exactly once, without
//! running any migration. Concurrent invocations serialize on a session
//! advisory lock; a foreign revision is a hard stop.

use crate::connection::ConnectionParams;
use crate::error::{GuardError, GuardResult};
use crate::snapshot::{self, CatalogReader, Role};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{error, info, warn};

/// Well-known advisory lock key shared by every stamper ("LEDGERST")
pub const BASELINE_LOCK_KEY: i64 = 0x4C45_4447_4552_5354;

/// The ledger state a database should reach exactly once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineRecord {
    pub baseline_revision: String,
}

impl BaselineRecord {
    pub fn new(revision: impl Into<String>) -> Self {
        Self {
            baseline_revision: revision.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StampResult {
    Applied { revision: String },
    AlreadyStamped { revision: String },
}

/// Connection-scoped mutual exclusion
#[async_trait]
pub trait SessionLock: Send + Sync {
    /// Block until the lock for `key` is held by this session
    async fn lock(&self, key: i64) -> GuardResult<()>;

    async fn unlock(&self, key: i64) -> GuardResult<()>;
}

/// The ledger's native "stamp to revision without running migrations" primitive
#[async_trait]
pub trait LedgerStamper: Send + Sync {
    async fn stamp_to(&self, revision: &str) -> GuardResult<()>;
}

/// Stamp `target` at `baseline`, holding the advisory lock for the whole
/// probe-then-stamp sequence and releasing it on every exit path.
pub async fn stamp<T>(
    target: &T,
    ledger: &dyn LedgerStamper,
    baseline: &BaselineRecord,
) -> GuardResult<StampResult>
where
    T: CatalogReader + SessionLock,
{
    target.lock(BASELINE_LOCK_KEY).await?;

    let result = stamp_locked(target, ledger, baseline).await;

    if let Err(e) = target.unlock(BASELINE_LOCK_KEY).await {
        // Session teardown drops the lock anyway; keep the primary result
        error!("Failed to release baseline advisory lock: {}", e);
    }

    result
}

async fn stamp_locked<T>(
    target: &T,
    ledger: &dyn LedgerStamper,
    baseline: &BaselineRecord,
) -> GuardResult<StampResult>
where
    T: CatalogReader + SessionLock,
{
    let expected = &baseline.baseline_revision;
    let before = snapshot::capture(target, Role::Prod).await?;

    match before.ledger_version {
        Some(ref current) if current == expected => {
            info!("Ledger already stamped at baseline {}, nothing to do", expected);
            Ok(StampResult::AlreadyStamped {
                revision: current.clone(),
            })
        }
        Some(current) => {
            warn!(
                "Refusing to stamp: ledger at {}, expected baseline {}",
                current, expected
            );
            Err(GuardError::Conflict {
                found: current,
                expected: expected.clone(),
            })
        }
        None => {
            info!(
                "Ledger unmanaged ({} tables present), stamping baseline {}",
                before.tables.len(),
                expected
            );
            ledger.stamp_to(expected).await?;

            let after = snapshot::capture(target, Role::Prod).await?;
            match after.ledger_version {
                Some(ref v) if v == expected => {
                    info!("✅ Ledger stamped at baseline {}", expected);
                    Ok(StampResult::Applied {
                        revision: v.clone(),
                    })
                }
                other => Err(GuardError::Ledger(format!(
                    "stamp reported success but ledger reads {:?}, expected {}",
                    other, expected
                ))),
            }
        }
    }
}

/// Runs the configured ledger command, e.g. `alembic stamp {revision}`
pub struct LedgerCommand {
    template: String,
    database_url: String,
    timeout: Duration,
}

impl LedgerCommand {
    pub fn new(template: impl Into<String>, params: &ConnectionParams, timeout: Duration) -> Self {
        Self {
            template: template.into(),
            database_url: params.raw.clone(),
            timeout,
        }
    }

    /// Program and arguments with `{revision}` substituted
    pub fn argv(&self, revision: &str) -> Vec<String> {
        self.template
            .split_whitespace()
            .map(|part| part.replace("{revision}", revision))
            .collect()
    }
}

#[async_trait]
impl LedgerStamper for LedgerCommand {
    async fn stamp_to(&self, revision: &str) -> GuardResult<()> {
        let argv = self.argv(revision);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| GuardError::Configuration("LEDGER_STAMP_COMMAND is empty".to_string()))?;

        info!("Running ledger command: {}", argv.join(" "));

        let child = Command::new(program)
            .args(args)
            .env("DATABASE_URL", &self.database_url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        // The stamp is a single-row write; it should finish well inside a few timeouts
        let output = tokio::time::timeout(self.timeout * 6, child)
            .await
            .map_err(|_| GuardError::Ledger(format!("'{}' timed out", argv.join(" "))))?
            .map_err(|e| GuardError::Ledger(format!("failed to start '{}': {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GuardError::Ledger(format!(
                "'{}' exited with {}: {}",
                argv.join(" "),
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }
}
