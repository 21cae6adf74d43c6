//! Error types for diarist

use thiserror::Error;

/// The main error type for diarist operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Input records that cannot be tied to a valid date or lack content
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Generation backend unreachable, timed out, or returned an unusable result
    #[error("Generation backend error: {0}")]
    Generation(String),

    /// Progress ledger exists but cannot be read back
    #[error("Ledger corruption: {0}")]
    LedgerCorruption(String),

    /// An artifact or the ledger could not be written
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Run was interrupted from outside
    #[error("Interrupted: {0}")]
    Interrupted(String),
}

/// A specialized Result type for diarist operations
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    /// Whether the failure is worth another attempt against the backend
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Generation(_))
    }
}
