//! Error types shared across Sluice crates

use thiserror::Error;

/// Result type alias for shared Sluice operations
pub type Result<T> = std::result::Result<T, SluiceError>;

/// Main error type for shared Sluice functionality
#[derive(Error, Debug)]
pub enum SluiceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid identity '{value}': {reason}")]
    Identity { value: String, reason: String },
}

impl SluiceError {
    /// Create an identity validation error
    pub fn identity(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Identity {
            value: value.into(),
            reason: reason.into(),
        }
    }
}
