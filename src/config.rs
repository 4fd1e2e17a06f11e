//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables.
//! Settings are built once at startup and handed to each component; nothing
//! else in the crate reads the process environment.

use crate::error::{config_error, GuardError};
use crate::snapshot::Role;
use regex::Regex;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_DRIFT_THRESHOLD: usize = 5;
pub const DEFAULT_BASELINE_REVISION: &str = "0000_baseline";
pub const DEFAULT_VERSION_TABLE: &str = "alembic_version";
pub const DEFAULT_STAMP_COMMAND: &str = "alembic stamp {revision}";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid configuration value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

impl From<ConfigError> for GuardError {
    fn from(err: ConfigError) -> Self {
        config_error(err.to_string())
    }
}

/// State of the auto-migration suppression flag consumed by the startup sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoMigrate {
    /// Flag absent: the surrounding startup sequence runs migrations
    Unset,
    /// Flag present and truthy: migrations were suppressed
    Disabled,
    /// Flag present and falsy
    Enabled,
}

impl AutoMigrate {
    fn parse(raw: Option<&str>) -> Self {
        match raw.map(|v| v.trim().to_ascii_lowercase()) {
            None => AutoMigrate::Unset,
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => AutoMigrate::Disabled,
            Some(_) => AutoMigrate::Enabled,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AutoMigrate::Unset => "unset",
            AutoMigrate::Disabled => "disabled",
            AutoMigrate::Enabled => "enabled",
        }
    }
}

/// Ledger configuration
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub version_table: String,
    pub baseline_revision: String,
    /// Stamp primitive; `{revision}` is substituted
    pub stamp_command: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            version_table: DEFAULT_VERSION_TABLE.to_string(),
            baseline_revision: DEFAULT_BASELINE_REVISION.to_string(),
            stamp_command: DEFAULT_STAMP_COMMAND.to_string(),
        }
    }
}

/// Complete application settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub dev_url: Option<String>,
    pub prod_url: Option<String>,
    pub drift_threshold: usize,
    pub auto_migrate: AutoMigrate,
    pub report_dir: PathBuf,
    pub timeout: Duration,
    pub ledger: LedgerConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dev_url: None,
            prod_url: None,
            drift_threshold: DEFAULT_DRIFT_THRESHOLD,
            auto_migrate: AutoMigrate::Unset,
            report_dir: PathBuf::from("."),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            ledger: LedgerConfig::default(),
        }
    }
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}(\.[A-Za-z_][A-Za-z0-9_]{0,62})?$")
            .expect("identifier pattern is valid")
    })
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Settings::default();

        let drift_threshold = match non_empty("DRIFT_THRESHOLD") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                name: "DRIFT_THRESHOLD".to_string(),
                reason: format!("expected a non-negative integer, got '{}'", raw),
            })?,
            None => defaults.drift_threshold,
        };

        let timeout = match non_empty("DB_TIMEOUT_SECS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: "DB_TIMEOUT_SECS".to_string(),
                        reason: format!("expected a positive number of seconds, got '{}'", raw),
                    })
                }
            },
            None => defaults.timeout,
        };

        // Unquoted identifiers fold to lower case in PostgreSQL; store the folded form
        let version_table = non_empty("LEDGER_VERSION_TABLE")
            .map(|raw| raw.trim().to_ascii_lowercase())
            .unwrap_or_else(|| defaults.ledger.version_table.clone());
        if !identifier_pattern().is_match(&version_table) {
            return Err(ConfigError::InvalidValue {
                name: "LEDGER_VERSION_TABLE".to_string(),
                reason: format!("'{}' is not a plain SQL identifier", version_table),
            });
        }

        let stamp_command = non_empty("LEDGER_STAMP_COMMAND")
            .unwrap_or_else(|| defaults.ledger.stamp_command.clone());
        if !stamp_command.contains("{revision}") {
            return Err(ConfigError::InvalidValue {
                name: "LEDGER_STAMP_COMMAND".to_string(),
                reason: "must contain the {revision} placeholder".to_string(),
            });
        }

        Ok(Self {
            // Prefer the explicit dev variable, fall back to the conventional DATABASE_URL
            dev_url: non_empty("DEV_DATABASE_URL").or_else(|| non_empty("DATABASE_URL")),
            prod_url: non_empty("PROD_DATABASE_URL"),
            drift_threshold,
            auto_migrate: AutoMigrate::parse(non_empty("SKIP_AUTO_MIGRATE").as_deref()),
            report_dir: non_empty("AUDIT_REPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.report_dir),
            timeout,
            ledger: LedgerConfig {
                version_table,
                baseline_revision: non_empty("BASELINE_REVISION")
                    .unwrap_or(defaults.ledger.baseline_revision),
                stamp_command,
            },
        })
    }

    /// Connection string for `role`, or a configuration error if unset
    pub fn require_url(&self, role: Role) -> Result<&str, ConfigError> {
        let (value, var) = match role {
            Role::Dev => (&self.dev_url, "DEV_DATABASE_URL"),
            Role::Prod => (&self.prod_url, "PROD_DATABASE_URL"),
        };
        value
            .as_deref()
            .ok_or_else(|| ConfigError::MissingVar(var.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = settings_from(&[]).unwrap();
        assert_eq!(settings.drift_threshold, 5);
        assert_eq!(settings.ledger.version_table, "alembic_version");
        assert_eq!(settings.ledger.baseline_revision, DEFAULT_BASELINE_REVISION);
        assert_eq!(settings.auto_migrate, AutoMigrate::Unset);
        assert_eq!(settings.timeout, Duration::from_secs(10));
        assert!(settings.dev_url.is_none());
        assert!(settings.require_url(Role::Prod).is_err());
    }

    #[test]
    fn test_dev_url_falls_back_to_database_url() {
        let settings = settings_from(&[("DATABASE_URL", "postgres://u:p@h/db")]).unwrap();
        assert_eq!(settings.require_url(Role::Dev).unwrap(), "postgres://u:p@h/db");

        let settings = settings_from(&[
            ("DATABASE_URL", "postgres://u:p@h/db"),
            ("DEV_DATABASE_URL", "postgres://u:p@dev/db"),
        ])
        .unwrap();
        assert_eq!(settings.dev_url.as_deref(), Some("postgres://u:p@dev/db"));
    }

    #[test]
    fn test_blank_prod_url_counts_as_unset() {
        let settings = settings_from(&[("PROD_DATABASE_URL", "  ")]).unwrap();
        assert!(settings.prod_url.is_none());
    }

    #[test]
    fn test_threshold_override_and_rejection() {
        let settings = settings_from(&[("DRIFT_THRESHOLD", "12")]).unwrap();
        assert_eq!(settings.drift_threshold, 12);

        assert!(settings_from(&[("DRIFT_THRESHOLD", "-1")]).is_err());
        assert!(settings_from(&[("DRIFT_THRESHOLD", "many")]).is_err());
    }

    #[test]
    fn test_auto_migrate_flag() {
        let on = settings_from(&[("SKIP_AUTO_MIGRATE", "true")]).unwrap();
        assert_eq!(on.auto_migrate, AutoMigrate::Disabled);
        let off = settings_from(&[("SKIP_AUTO_MIGRATE", "0")]).unwrap();
        assert_eq!(off.auto_migrate, AutoMigrate::Enabled);
    }

    #[test]
    fn test_blank_auto_migrate_flag_is_unset() {
        let blank = settings_from(&[("SKIP_AUTO_MIGRATE", "   ")]).unwrap();
        assert_eq!(blank.auto_migrate, AutoMigrate::Unset);
        let empty = settings_from(&[("SKIP_AUTO_MIGRATE", "")]).unwrap();
        assert_eq!(empty.auto_migrate, AutoMigrate::Unset);
    }

    #[test]
    fn test_version_table_is_case_folded() {
        let settings = settings_from(&[("LEDGER_VERSION_TABLE", "Ledger.Version_Log")]).unwrap();
        assert_eq!(settings.ledger.version_table, "ledger.version_log");
    }

    #[test]
    fn test_version_table_must_be_identifier() {
        assert!(settings_from(&[("LEDGER_VERSION_TABLE", "ledger.versions")]).is_ok());
        assert!(settings_from(&[("LEDGER_VERSION_TABLE", "v; DROP TABLE x")]).is_err());
    }

    #[test]
    fn test_stamp_command_needs_placeholder() {
        assert!(settings_from(&[("LEDGER_STAMP_COMMAND", "alembic stamp head")]).is_err());
    }
}
