//! Storage error handling
//!
//! Provides typed errors for table storage with descriptive messages
//! and recovery suggestions.

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::table::Table;

/// A single rejected field, reported back to API callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Permission denied accessing path
    #[error("Permission denied: cannot access '{path}'. Check file permissions.")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Disk is full or quota exceeded
    #[error(
        "Disk full or quota exceeded while writing to '{path}'. Free up disk space and try again."
    )]
    DiskFull {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to read file
    #[error("Failed to read '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to write file
    #[error("Failed to write '{path}': {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Table file holds JSON of the wrong shape or no JSON at all
    #[error("Invalid table format in '{path}': {details}")]
    InvalidFormat { path: PathBuf, details: String },

    /// No record with the given id in the table
    #[error("Record not found: no '{id}' in table '{table}'")]
    RecordNotFound { table: Table, id: String },

    /// Entity failed validation before being written
    #[error("Validation failed: {}", summarize(.0))]
    Validation(Vec<FieldError>),

    /// JSON encoding error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Atomic write failed during rename
    #[error("Atomic write failed: could not rename '{from}' to '{to}': {source}")]
    AtomicWriteFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    /// Create a read error from an I/O error with path context
    pub fn from_read(error: io::Error, path: PathBuf) -> Self {
        match classify(&error) {
            Some(kind) => kind.into_error(path, error),
            None => StorageError::ReadError {
                path,
                source: error,
            },
        }
    }

    /// Create a write error from an I/O error with path context
    ///
    /// Classifies the error based on its kind (permission, disk full, etc.)
    pub fn from_write(error: io::Error, path: PathBuf) -> Self {
        match classify(&error) {
            Some(kind) => kind.into_error(path, error),
            None => StorageError::WriteError {
                path,
                source: error,
            },
        }
    }

    /// Whether this error is a missing record rather than a storage fault
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::RecordNotFound { .. })
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            StorageError::DiskFull { .. } => Some("Free up disk space and try again."),
            StorageError::PermissionDenied { .. } => {
                Some("Check file and directory permissions. You may need to run with different permissions or change ownership.")
            }
            StorageError::InvalidFormat { .. } => {
                Some("Fix or remove the table file; a missing file is recreated empty on next start.")
            }
            _ => None,
        }
    }
}

enum IoClass {
    PermissionDenied,
    DiskFull,
}

impl IoClass {
    fn into_error(self, path: PathBuf, source: io::Error) -> StorageError {
        match self {
            IoClass::PermissionDenied => StorageError::PermissionDenied { path, source },
            IoClass::DiskFull => StorageError::DiskFull { path, source },
        }
    }
}

fn classify(error: &io::Error) -> Option<IoClass> {
    match error.kind() {
        io::ErrorKind::PermissionDenied => Some(IoClass::PermissionDenied),
        _ if is_disk_full_error(error) => Some(IoClass::DiskFull),
        _ => None,
    }
}

/// Check if an I/O error indicates disk full condition
fn is_disk_full_error(error: &io::Error) -> bool {
    let msg = error.to_string().to_lowercase();
    msg.contains("no space left")
        || msg.contains("disk full")
        || msg.contains("quota exceeded")
        || msg.contains("not enough space")
}

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
