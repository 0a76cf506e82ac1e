//! Error types for schema_apply

use std::path::PathBuf;

use thiserror::Error;

/// Result type for schema_apply operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for schema_apply
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    /// The database could not be reached at all. Fatal to the whole run.
    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    #[error("Migration file not found: {}", .0.display())]
    FileMissing(PathBuf),

    #[error("Failed to read migration file {}: {source}", path.display())]
    ReadFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl Error {
    /// Whether this error means the target database is unreachable
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Error::ConnectionFailure(_))
    }
}

/// Convert Serde JSON errors to schema_apply errors
impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::SerializationError(error.to_string())
    }
}

/// Convert TOML deserialization errors to schema_apply errors
impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::ConfigError(error.to_string())
    }
}

impl From<regex::Error> for Error {
    fn from(error: regex::Error) -> Self {
        Error::ValidationError(format!("invalid pattern: {}", error))
    }
}

impl From<glob::PatternError> for Error {
    fn from(error: glob::PatternError) -> Self {
        Error::ConfigError(format!("invalid migration glob: {}", error))
    }
}
