//! Error types for the sluice CLI
//!
//! Messages are user-facing and say what to check next.

use thiserror::Error;

use sluice_coordination::{CoordinationError, StoreError};

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    /// Coordinator setup or operation failed
    #[error("Coordination error: {0}")]
    Coordination(#[from] CoordinationError),

    /// Partition store could not be reached or migrated
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Arguments or configuration are inconsistent
    #[error("Configuration error: {0}. Check your arguments, config file and SLUICE_* environment variables.")]
    Config(String),

    /// A simulation run ended without converging or broke an invariant
    #[error("Simulation failed: {0}")]
    Simulation(String),

    #[error("Failed to render JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn simulation(msg: impl Into<String>) -> Self {
        Self::Simulation(msg.into())
    }
}
