//! SQL query constants and builders
//!
//! Contains every statement the crate sends to a database. All of them are
//! catalog reads or session-level advisory lock calls; none touch user data.

/// Base and partitioned tables in the session's default schema
pub const LIST_TABLES: &str = r#"
    SELECT
        n.nspname AS schema,
        c.relname AS name
    FROM pg_catalog.pg_class c
        JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE c.relkind IN ('r','p')
        AND NOT c.relispartition
        AND n.nspname = current_schema()
    ORDER BY schema, name
"#;

/// Whether a relation exists, without raising when it does not.
/// Bind the name through `quote_qualified` so it resolves exactly like `select_versions`.
pub const RELATION_EXISTS: &str = "SELECT to_regclass($1::text) IS NOT NULL AS present";

/// Column holding the revision identifier in the ledger version table
pub const VERSION_COLUMN: &str = "version_num";

pub const ADVISORY_LOCK: &str = "SELECT pg_advisory_lock($1)";

pub const ADVISORY_UNLOCK: &str = "SELECT pg_advisory_unlock($1) AS released";

/// Quote a validated `table` or `schema.table` identifier
pub fn quote_qualified(identifier: &str) -> String {
    identifier
        .split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

/// Read every revision row from the ledger version table
pub fn select_versions(version_table: &str) -> String {
    format!(
        "SELECT {} FROM {}",
        quote_qualified(VERSION_COLUMN),
        quote_qualified(version_table)
    )
}
