//! Error types for keyword-memory.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias using keyword-memory's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during memory operations.
///
/// Absence of an entry is not an error: lookups return `Option` and deletes
/// return `bool`.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input parameters
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    /// Store not opened, or service not in the Ready state
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Storage engine failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// A single file could not be imported
    #[error("Import failed for {}: {message}", path.display())]
    ImportFile { path: PathBuf, message: String },

    /// Remote sync transfer failed
    #[error("Sync error: {0}")]
    Sync(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error for a named field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an import error for a file.
    pub fn import_file(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::ImportFile {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    /// Create a sync error.
    pub fn sync(message: impl Into<String>) -> Self {
        Self::Sync(message.into())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
