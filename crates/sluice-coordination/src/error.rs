//! Error types for partition coordination

use sluice_common::SluiceError;
use thiserror::Error;

/// Result type alias for coordination operations
pub type Result<T> = std::result::Result<T, CoordinationError>;

/// Result type alias for partition store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by the coordinator.
///
/// Version conflicts, vanished records and lost ownership are not errors; they
/// are logged, counted and retried on the next pass.
#[derive(Error, Debug)]
pub enum CoordinationError {
    /// Configuration is malformed; raised only while constructing a coordinator
    #[error("Coordinator configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Common(#[from] SluiceError),

    /// Store call failed after the retry budget was exhausted
    #[error("Partition store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid transition for partition '{key}': {reason}")]
    InvalidTransition { key: String, reason: String },

    #[error("Invalid partition record '{key}': {reason}")]
    InvalidRecord { key: String, reason: String },

    #[error("Progress state serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Duration out of range: {0}")]
    Duration(String),
}

impl CoordinationError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn invalid_transition(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTransition {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_record(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Partition store failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Database configuration error: {0}. Check DATABASE_URL and connection settings.")]
    Config(String),

    /// Store is throttling or temporarily unreachable
    #[error("Partition store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt partition record '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

/// Postgres error codes worth retrying: serialization failure, deadlock,
/// too many connections, admin shutdown, crash shutdown, cannot connect now
/// and connection exceptions.
const TRANSIENT_SQLSTATES: &[&str] = &[
    "40001", "40P01", "53300", "57P01", "57P02", "57P03", "08000", "08001", "08003", "08004",
    "08006",
];

impl StoreError {
    pub fn corrupt(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Whether the failed call may succeed if retried
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Database(err) => match err {
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => {
                    true
                }
                sqlx::Error::Database(db_err) => db_err
                    .code()
                    .map(|code| TRANSIENT_SQLSTATES.iter().any(|state| *state == code))
                    .unwrap_or(false),
                _ => false,
            },
            StoreError::Migration(_) | StoreError::Config(_) | StoreError::Corrupt { .. } => false,
        }
    }
}
