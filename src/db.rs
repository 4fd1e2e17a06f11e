//! PostgreSQL catalog access
//!
//! `PostgresCatalog` is the `CatalogReader` for PostgreSQL. It owns one
//! session so that advisory locks taken by the stamper stay on the same
//! connection as the reads they guard.

pub mod queries;

use crate::config::Settings;
use crate::connection::{open_session, ConnectionParams};
use crate::error::{GuardError, GuardResult};
use crate::snapshot::{self, CatalogReader, DatabaseSnapshot, Role, SnapshotProbe};
use crate::stamp::SessionLock;
use async_trait::async_trait;
use deadpool_postgres::Object;
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Catalog reader bound to one open session
pub struct PostgresCatalog {
    role: Role,
    client: Object,
    source: String,
    version_table: String,
    timeout: Duration,
}

impl PostgresCatalog {
    pub async fn connect(
        role: Role,
        params: &ConnectionParams,
        version_table: &str,
        timeout: Duration,
    ) -> GuardResult<Self> {
        let client = open_session(role, params, timeout).await?;
        Ok(Self {
            role,
            client,
            source: params.to_display_string(),
            version_table: version_table.to_string(),
            timeout,
        })
    }

    /// Run one statement under the query timeout, classifying failures for this role
    async fn bounded<T, F>(&self, what: &str, fut: F) -> GuardResult<T>
    where
        F: Future<Output = Result<T, tokio_postgres::Error>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| GuardError::timeout(self.role, what))?
            .map_err(|e| GuardError::from_postgres(self.role, e))
    }

    fn is_version_table(&self, schema: &str, name: &str) -> bool {
        names_version_table(&self.version_table, schema, name)
    }
}

/// Whether `schema.name` is the ledger's own bookkeeping table.
/// `version_table` is already case-folded by `Settings`.
fn names_version_table(version_table: &str, schema: &str, name: &str) -> bool {
    match version_table.split_once('.') {
        Some((s, t)) => s == schema && t == name,
        None => version_table == name,
    }
}

#[async_trait]
impl CatalogReader for PostgresCatalog {
    async fn list_tables(&self) -> GuardResult<BTreeSet<String>> {
        let rows = self
            .bounded("listing tables", self.client.query(queries::LIST_TABLES, &[]))
            .await?;

        let mut tables = BTreeSet::new();
        for row in rows {
            let schema: String = row.get("schema");
            let name: String = row.get("name");
            if self.is_version_table(&schema, &name) {
                continue;
            }
            tables.insert(format!("{}.{}", schema, name));
        }

        debug!("{} catalog lists {} tables", self.role, tables.len());
        Ok(tables)
    }

    async fn ledger_versions(&self) -> GuardResult<Option<Vec<String>>> {
        let relation = queries::quote_qualified(&self.version_table);
        let row = self
            .bounded(
                "checking for the ledger version table",
                self.client.query_one(queries::RELATION_EXISTS, &[&relation]),
            )
            .await?;
        let present: bool = row.get("present");
        if !present {
            warn!(
                "{} has no ledger version table '{}'",
                self.role, self.version_table
            );
            return Ok(None);
        }

        let sql = queries::select_versions(&self.version_table);
        let rows = self
            .bounded("reading the ledger version", self.client.query(sql.as_str(), &[]))
            .await?;

        Ok(Some(rows.iter().map(|r| r.get::<_, String>(0)).collect()))
    }

    fn source(&self) -> String {
        self.source.clone()
    }
}

#[async_trait]
impl SessionLock for PostgresCatalog {
    async fn lock(&self, key: i64) -> GuardResult<()> {
        self.bounded(
            "waiting for the baseline advisory lock",
            self.client.query_one(queries::ADVISORY_LOCK, &[&key]),
        )
        .await?;
        debug!("Acquired advisory lock {} on {}", key, self.role);
        Ok(())
    }

    async fn unlock(&self, key: i64) -> GuardResult<()> {
        let row = self
            .bounded(
                "releasing the baseline advisory lock",
                self.client.query_one(queries::ADVISORY_UNLOCK, &[&key]),
            )
            .await?;
        let released: bool = row.get("released");
        if !released {
            warn!("Advisory lock {} was not held on {}", key, self.role);
        }
        Ok(())
    }
}

/// Probe that opens a fresh session per capture
pub struct PostgresProbe {
    role: Role,
    params: ConnectionParams,
    version_table: String,
    timeout: Duration,
}

impl PostgresProbe {
    pub fn new(role: Role, params: ConnectionParams, settings: &Settings) -> Self {
        Self {
            role,
            params,
            version_table: settings.ledger.version_table.clone(),
            timeout: settings.timeout,
        }
    }

    /// Probe for `role` if its connection string is configured
    pub fn from_settings(role: Role, settings: &Settings) -> GuardResult<Option<Self>> {
        let url = match role {
            Role::Dev => settings.dev_url.as_deref(),
            Role::Prod => settings.prod_url.as_deref(),
        };
        url.map(|u| {
            ConnectionParams::from_connection_string(u).map(|params| Self::new(role, params, settings))
        })
        .transpose()
    }
}

#[async_trait]
impl SnapshotProbe for PostgresProbe {
    fn role(&self) -> Role {
        self.role
    }

    async fn capture(&self) -> GuardResult<DatabaseSnapshot> {
        let catalog =
            PostgresCatalog::connect(self.role, &self.params, &self.version_table, self.timeout).await?;
        snapshot::capture(&catalog, self.role).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_table_excluded_from_inventory_by_name() {
        assert!(names_version_table("alembic_version", "public", "alembic_version"));
        assert!(names_version_table("ledger.version_log", "ledger", "version_log"));
        assert!(!names_version_table("ledger.version_log", "public", "version_log"));
        assert!(!names_version_table("alembic_version", "public", "users"));
    }

    #[test]
    fn test_mixed_case_setting_matches_catalog_name() {
        let settings = Settings::from_lookup(|name| {
            (name == "LEDGER_VERSION_TABLE").then(|| "Ledger_Version".to_string())
        })
        .unwrap();
        assert!(names_version_table(&settings.ledger.version_table, "public", "ledger_version"));
        assert_eq!(
            queries::select_versions(&settings.ledger.version_table),
            "SELECT \"version_num\" FROM \"ledger_version\""
        );
    }
}
