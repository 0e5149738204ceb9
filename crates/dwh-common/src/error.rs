//! Error types for the shared DWH utilities

use thiserror::Error;

/// Result type alias for DWH operations
pub type Result<T> = std::result::Result<T, DwhError>;

/// Main error type for the shared utilities
#[derive(Error, Debug)]
pub enum DwhError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid UTF-8 data: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Invalid datetime '{input}': {reason}")]
    InvalidDatetime { input: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl DwhError {
    pub fn invalid_datetime(input: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::InvalidDatetime {
            input: input.into(),
            reason: reason.to_string(),
        }
    }
}
