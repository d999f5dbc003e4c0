//! Error types for packrat-core.
//!
//! Most failure modes in this crate are degradations rather than errors:
//! a missing archive materializes as `Ok(None)`, an unscannable file yields
//! `NotPossible`, a failed media probe leaves the optional columns empty.
//! The variants here cover the remainder that callers can act on.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the packrat library.
#[derive(Debug, Error)]
pub enum PackratError {
    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Path is not a directory: {0}")]
    NotADirectory(PathBuf),

    // Archive errors
    #[error("Extraction failed for {archive}: {message}")]
    ExtractionFailed { archive: PathBuf, message: String },

    // Record lookup errors
    #[error("Package not found: {0}")]
    PackageNotFound(i64),

    #[error("Package file not found: {0}")]
    PackageFileNotFound(i64),

    #[error("Tag not found: {0}")]
    TagNotFound(String),

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Remote catalog errors
    #[error("Catalog error: {message}")]
    Catalog { message: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid search filter: {message}")]
    InvalidFilter { message: String },

    #[error("Indexing cancelled")]
    IndexingCancelled,

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for packrat operations.
pub type Result<T> = std::result::Result<T, PackratError>;

// Conversion implementations for common error types

impl From<std::io::Error> for PackratError {
    fn from(err: std::io::Error) -> Self {
        PackratError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for PackratError {
    fn from(err: rusqlite::Error) -> Self {
        PackratError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for PackratError {
    fn from(err: serde_json::Error) -> Self {
        PackratError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl PackratError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        PackratError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Whether this error should surface to the operator rather than be
    /// logged and degraded (missing scan roots, locked database at startup).
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            PackratError::NotADirectory(_)
                | PackratError::Config { .. }
                | PackratError::Database { .. }
        )
    }
}
