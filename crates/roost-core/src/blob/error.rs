//! Blob store errors

use std::io;
use std::path::PathBuf;

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum BlobError {
    /// Nothing configured, or every configured provider failed
    #[error("No storage provider available")]
    NoProviderAvailable,

    /// The provider is configured but this build has no client for it
    #[error("Storage provider '{provider}' is not supported by this build (enable the `s3` feature)")]
    ProviderUnsupported { provider: String },

    /// The provider configuration is incomplete or malformed
    #[error("Invalid configuration for provider '{provider}': {details}")]
    InvalidConfig { provider: String, details: String },

    /// A local upload source could not be read
    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid object key '{0}'")]
    InvalidKey(String),

    /// The provider rejected the request
    #[error("Provider '{provider}' failed: {source}")]
    Provider {
        provider: String,
        #[source]
        source: BoxError,
    },
}

impl BlobError {
    pub fn provider(provider: impl Into<String>, source: impl Into<BoxError>) -> Self {
        BlobError::Provider {
            provider: provider.into(),
            source: source.into(),
        }
    }
}

pub type BlobResult<T> = Result<T, BlobError>;
