//! Schema Snapshot Module
//!
//! Point-in-time structural captures of one database instance, and the
//! catalog abstraction they are read through.

use crate::error::GuardResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, warn};

/// Which side of the promotion a database sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Dev,
    Prod,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Dev => "dev",
            Role::Prod => "prod",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed structural state of one database instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSnapshot {
    pub role: Role,
    pub captured_at: DateTime<Utc>,
    /// Masked connection string the snapshot was read from
    pub source: String,
    /// Schema-qualified table names (`schema.table`)
    pub tables: BTreeSet<String>,
    /// `None` when the ledger version table is missing or empty
    pub ledger_version: Option<String>,
}

impl DatabaseSnapshot {
    pub fn new(
        role: Role,
        source: impl Into<String>,
        tables: BTreeSet<String>,
        ledger_version: Option<String>,
    ) -> Self {
        Self {
            role,
            captured_at: Utc::now(),
            source: source.into(),
            tables,
            ledger_version,
        }
    }

    /// Hex SHA-256 over the sorted table inventory
    pub fn tables_checksum(&self) -> String {
        let mut hasher = Sha256::new();
        for table in &self.tables {
            hasher.update(table.as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Read-only access to a database catalog.
///
/// Implementations issue introspection queries only; nothing here may write.
#[async_trait]
pub trait CatalogReader: Send + Sync {
    /// Tables in the default application schema, schema-qualified
    async fn list_tables(&self) -> GuardResult<BTreeSet<String>>;

    /// Revision rows in the ledger version table, or `None` if the table does not exist
    async fn ledger_versions(&self) -> GuardResult<Option<Vec<String>>>;

    /// Display form of the connection (password masked)
    fn source(&self) -> String;
}

/// Something that can produce a snapshot for one role on demand
#[async_trait]
pub trait SnapshotProbe: Send + Sync {
    fn role(&self) -> Role;

    async fn capture(&self) -> GuardResult<DatabaseSnapshot>;
}

/// Capture a snapshot through `reader`
pub async fn capture(reader: &dyn CatalogReader, role: Role) -> GuardResult<DatabaseSnapshot> {
    let tables = reader.list_tables().await?;
    let ledger_version = match reader.ledger_versions().await? {
        None => None,
        Some(mut rows) => {
            rows.sort();
            rows.dedup();
            match rows.len() {
                0 => None,
                1 => rows.pop(),
                _ => {
                    warn!("{} ledger has {} version rows (branched history): {:?}", role, rows.len(), rows);
                    Some(rows.join(","))
                }
            }
        }
    };

    let snapshot = DatabaseSnapshot::new(role, reader.source(), tables, ledger_version);

    debug!(
        "Captured {} snapshot with {} tables, ledger version {:?}",
        role,
        snapshot.tables.len(),
        snapshot.ledger_version
    );

    Ok(snapshot)
}
