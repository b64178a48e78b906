//! Error types for flowstate-core

use thiserror::Error;

/// Main error type for the flowstate-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown period key, or a period that resolves to an empty range
    #[error("invalid period: {0}")]
    InvalidPeriod(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed row in a row source
    #[error("parse error in {source_name} at line {line}: {message}")]
    Parse {
        source_name: String,
        line: usize,
        message: String,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Value cannot be flattened into a table
    #[error("export error: {0}")]
    Export(String),
}

/// Result type alias for flowstate-core
pub type Result<T> = std::result::Result<T, Error>;
