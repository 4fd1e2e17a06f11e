//! Error handling module
//!
//! Provides the unified error type for every command. Each variant maps to a
//! distinct exit status and carries an operator-facing remediation hint.

use crate::snapshot::Role;
use std::process::ExitCode;
use thiserror::Error;
use tokio_postgres::error::SqlState;
use tracing::error;

/// Exit status used when the deploy guard decides FAILED.
pub const GUARD_FAILED_EXIT: u8 = 1;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Connection error ({role}): {message}")]
    Connection { role: Role, message: String },

    #[error("Permission error ({role}): {message}")]
    Permission { role: Role, message: String },

    #[error("Conflict: production ledger at revision {found}, expected baseline {expected}")]
    Conflict { found: String, expected: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Ledger error: {0}")]
    Ledger(String),
}

impl GuardError {
    /// Classify a driver error raised while talking to `role`.
    ///
    /// Privilege failures on catalog reads become `Permission`. A version table
    /// that exists but lacks the expected shape is a `Ledger` problem. Everything
    /// else (refused sockets, bad credentials, dropped sessions) is a `Connection` error.
    pub fn from_postgres(role: Role, err: tokio_postgres::Error) -> Self {
        Self::classify(role, err.code(), err.to_string())
    }

    fn classify(role: Role, code: Option<&SqlState>, message: String) -> Self {
        match code {
            Some(code) if *code == SqlState::INSUFFICIENT_PRIVILEGE => {
                GuardError::Permission { role, message }
            }
            Some(code) if *code == SqlState::UNDEFINED_TABLE || *code == SqlState::UNDEFINED_COLUMN => {
                GuardError::Ledger(format!("{} ledger version table has an unexpected shape: {}", role, message))
            }
            _ => GuardError::Connection { role, message },
        }
    }

    pub fn from_pool(role: Role, err: deadpool_postgres::PoolError) -> Self {
        match err {
            deadpool_postgres::PoolError::Backend(e) => Self::from_postgres(role, e),
            other => GuardError::Connection {
                role,
                message: other.to_string(),
            },
        }
    }

    pub fn timeout(role: Role, what: &str) -> Self {
        GuardError::Connection {
            role,
            message: format!("timed out while {}", what),
        }
    }

    /// One-line hint telling the operator what to do next
    pub fn remediation(&self) -> String {
        match self {
            GuardError::Connection { role, .. } => format!(
                "check that the {} database is reachable and its credentials are valid, then re-run",
                role
            ),
            GuardError::Permission { role, .. } => format!(
                "grant the {} audit user read access to pg_catalog and the ledger version table",
                role
            ),
            GuardError::Conflict { found, expected } => format!(
                "production ledger at revision {}, expected baseline {} - investigate before stamping",
                found, expected
            ),
            GuardError::Configuration(_) => {
                "set the missing variable in the environment or .env file".to_string()
            }
            GuardError::Ledger(_) => {
                "inspect the ledger command output and the ledger version table by hand".to_string()
            }
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        let code: u8 = match self {
            GuardError::Configuration(_) => 2,
            GuardError::Connection { .. } => 3,
            GuardError::Permission { .. } => 4,
            GuardError::Conflict { .. } => 5,
            GuardError::Ledger(_) => 6,
        };
        ExitCode::from(code)
    }

    /// Print the single-line failure and its hint to stderr
    pub fn report(&self) {
        error!("{}", self);
        eprintln!("error: {}", self);
        eprintln!("hint: {}", self.remediation());
    }
}

/// Result type alias used across the crate
pub type GuardResult<T> = Result<T, GuardError>;

/// Helper function to create a configuration error
pub fn config_error(msg: impl Into<String>) -> GuardError {
    GuardError::Configuration(msg.into())
}
