//! Error types for DMP

use thiserror::Error;

/// Result type alias for DMP operations
pub type Result<T> = std::result::Result<T, DmpError>;

/// Main error type for cross-cutting DMP failures.
///
/// Component-specific failures (DBF format errors, transform errors,
/// write errors) have their own enums next to the component; this type
/// covers the shared infrastructure.
#[derive(Error, Debug)]
pub enum DmpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}
