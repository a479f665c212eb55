//! Table file persistence
//!
//! Handles reading and writing table files in the data directory.
//! Uses atomic writes (write to temp file, then rename) so a table file is
//! never left half-written, although every write still replaces the whole
//! table.
//!
//! Files:
//! - `<table>.json` - pretty-printed JSON array (or object for settings)

use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use super::error::{StorageError, StorageResult};
use super::table::Table;

/// Persistence layer for table files
#[derive(Debug, Clone)]
pub struct TablePersistence {
    data_dir: PathBuf,
}

impl TablePersistence {
    /// Create a new persistence handler rooted at `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path of the file backing `table`
    pub fn path(&self, table: Table) -> PathBuf {
        self.data_dir.join(table.file_name())
    }

    /// Check if a table file exists on disk
    pub fn exists(&self, table: Table) -> bool {
        self.path(table).exists()
    }

    /// Read the raw file content
    ///
    /// Returns `None` if the file doesn't exist. Any other I/O error is
    /// returned to the caller.
    pub async fn read_raw(&self, table: Table) -> StorageResult<Option<String>> {
        let path = self.path(table);
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::from_read(e, path)),
        }
    }

    /// Read and parse the file content
    ///
    /// A missing or whitespace-only file reads as `None`.
    pub async fn read_value(&self, table: Table) -> StorageResult<Option<Value>> {
        let Some(content) = self.read_raw(table).await? else {
            return Ok(None);
        };
        if content.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StorageError::InvalidFormat {
                path: self.path(table),
                details: e.to_string(),
            })
    }

    /// Whether the table has nothing worth keeping: missing, empty, `[]` or `{}`
    pub async fn is_blank(&self, table: Table) -> StorageResult<bool> {
        let Some(content) = self.read_raw(table).await? else {
            return Ok(true);
        };
        let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
        Ok(compact.is_empty() || compact == "[]" || compact == "{}")
    }

    /// Serialize `value` pretty-printed and replace the table file
    pub async fn write_value(&self, table: Table, value: &Value) -> StorageResult<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        atomic_write(&self.path(table), &bytes).await
    }
}

/// Write data to a file atomically
///
/// 1. Write to a temporary file in the same directory
/// 2. Sync the file to disk
/// 3. Rename the temp file to the target path
///
/// The temp file is removed if any step fails.
pub(crate) async fn atomic_write(path: &Path, data: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::from_write(e, parent.to_path_buf()))?;
    }

    // Unique per write so two writers never share a temp file
    let suffix = &uuid::Uuid::new_v4().simple().to_string()[..8];
    let temp_path = path.with_extension(format!("{}.tmp", suffix));

    let result = write_and_rename(&temp_path, path, data).await;
    if result.is_err() {
        if let Err(e) = fs::remove_file(&temp_path).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %temp_path.display(), error = %e, "could not remove temp file");
            }
        }
    }
    result
}

async fn write_and_rename(temp_path: &Path, path: &Path, data: &[u8]) -> StorageResult<()> {
    let mut file = fs::File::create(temp_path)
        .await
        .map_err(|e| StorageError::from_write(e, temp_path.to_path_buf()))?;

    file.write_all(data)
        .await
        .map_err(|e| StorageError::from_write(e, temp_path.to_path_buf()))?;

    // Sync to disk before rename
    file.sync_all()
        .await
        .map_err(|e| StorageError::from_write(e, temp_path.to_path_buf()))?;
    drop(file);

    fs::rename(temp_path, path)
        .await
        .map_err(|source| StorageError::AtomicWriteFailed {
            from: temp_path.to_path_buf(),
            to: path.to_path_buf(),
            source,
        })
}
