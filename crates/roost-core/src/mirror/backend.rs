//! Remote backend abstraction for the cloud mirror.

use async_trait::async_trait;
use thiserror::Error;

use crate::storage::{Record, Table};

/// Errors from a remote backend
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The relation has not been provisioned on the backend yet
    #[error("relation '{0}' does not exist on the remote backend")]
    RelationMissing(String),

    #[error("request failed: {0}")]
    Http(reqwest::Error),

    #[error("request timed out")]
    Timeout,

    #[error("remote returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("cloud mirror is not connected")]
    NotConnected,
}

impl RemoteError {
    pub fn is_relation_missing(&self) -> bool {
        matches!(self, RemoteError::RelationMissing(_))
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            RemoteError::Timeout
        } else if error.is_decode() {
            RemoteError::Decode(error.to_string())
        } else {
            RemoteError::Http(error)
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// A hosted store holding one relation per mirrored table
#[async_trait]
pub trait CloudBackend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// One cheap query proving the backend is reachable and provisioned
    async fn probe(&self) -> RemoteResult<()>;

    /// Every row of `table`
    async fn fetch_all(&self, table: Table) -> RemoteResult<Vec<Record>>;

    /// Insert or replace rows by `id`
    async fn upsert(&self, table: Table, rows: &[Record]) -> RemoteResult<()>;

    /// Remove rows by `id`; unknown ids are ignored
    async fn delete(&self, table: Table, ids: &[String]) -> RemoteResult<()>;
}
