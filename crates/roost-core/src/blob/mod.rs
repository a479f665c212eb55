//! Attachment storage
//!
//! Binary files (pigeon photos, pedigree scans, race sheets) go to one of
//! several object-storage providers. The providers found at startup are kept
//! in priority order; the first is active. When the active provider fails an
//! upload, the others are tried in order and the first to succeed becomes
//! active.
//!
//! This path is independent of the JSON table files.

mod detect;
mod error;
mod provider;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::BlobConfig;

pub use detect::{ProviderDescriptor, ProviderKind, ProviderSettings, S3Settings};
pub use error::{BlobError, BlobResult};
pub use provider::{BlobProvider, ObjectStoreProvider};

/// What to upload
#[derive(Debug, Clone)]
pub enum BlobContent {
    Bytes(Bytes),
    /// A local file, read before upload
    Path(PathBuf),
}

impl From<Vec<u8>> for BlobContent {
    fn from(data: Vec<u8>) -> Self {
        BlobContent::Bytes(Bytes::from(data))
    }
}

/// A stored attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedFile {
    pub url: String,
    pub key: String,
    pub provider: String,
}

pub struct BlobStore {
    providers: Vec<Arc<dyn BlobProvider>>,
    active: AtomicUsize,
}

impl BlobStore {
    /// Store over already-built providers, highest priority first
    pub fn new(providers: Vec<Arc<dyn BlobProvider>>) -> Self {
        Self {
            providers,
            active: AtomicUsize::new(0),
        }
    }

    /// Build every detected provider; ones that fail to build are skipped
    pub fn from_descriptors(descriptors: &[ProviderDescriptor]) -> Self {
        let mut providers = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            match descriptor.build() {
                Ok(provider) => providers.push(provider),
                Err(e) => warn!(provider = %descriptor.kind, error = %e, "skipping storage provider"),
            }
        }

        let store = Self::new(providers);
        match store.active_name() {
            Some(name) => info!(
                active = name,
                available = store.providers.len(),
                "attachment storage ready"
            ),
            None => debug!("no attachment storage configured"),
        }
        store
    }

    /// Detect providers from the environment and config
    pub fn from_config(config: &BlobConfig) -> Self {
        Self::from_descriptors(&ProviderDescriptor::from_env(config))
    }

    /// Name of the provider uploads go to first
    pub fn active_name(&self) -> Option<&str> {
        self.active_provider().map(|p| p.name())
    }

    /// Names of every usable provider, in priority order
    pub fn available(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Upload a file, failing over across providers
    ///
    /// The object key is derived from `name`, see [`generate_key`].
    pub async fn upload_file(
        &self,
        content: BlobContent,
        name: &str,
        folder: Option<&str>,
    ) -> BlobResult<UploadedFile> {
        if self.providers.is_empty() {
            return Err(BlobError::NoProviderAvailable);
        }

        let data = match content {
            BlobContent::Bytes(data) => data,
            BlobContent::Path(path) => tokio::fs::read(&path)
                .await
                .map(Bytes::from)
                .map_err(|source| BlobError::Read { path, source })?,
        };
        let key = generate_key(name, folder, Utc::now().timestamp_millis());
        // A bad key fails the same way everywhere; no point failing over
        provider::object_path(&key)?;
        let content_type = mime_guess::from_path(name)
            .first_or_octet_stream()
            .to_string();

        let active = self.active.load(Ordering::SeqCst);
        let order = std::iter::once(active).chain((0..self.providers.len()).filter(|&i| i != active));

        for index in order {
            let Some(provider) = self.providers.get(index) else {
                continue;
            };
            match provider.upload(&key, data.clone(), &content_type).await {
                Ok(url) => {
                    if index != active {
                        info!(provider = provider.name(), "switched active storage provider");
                        self.active.store(index, Ordering::SeqCst);
                    }
                    return Ok(UploadedFile {
                        url,
                        key,
                        provider: provider.name().to_string(),
                    });
                }
                Err(e @ BlobError::InvalidKey(_)) => return Err(e),
                Err(e) => warn!(provider = provider.name(), error = %e, "upload failed"),
            }
        }

        Err(BlobError::NoProviderAvailable)
    }

    /// Remove an object from the active provider
    pub async fn delete_file(&self, key: &str) -> BlobResult<()> {
        let provider = self.active_provider().ok_or(BlobError::NoProviderAvailable)?;
        provider.delete(key).await
    }

    /// Public URL of an object on the active provider
    pub fn get_file_url(&self, key: &str) -> BlobResult<String> {
        let provider = self.active_provider().ok_or(BlobError::NoProviderAvailable)?;
        provider::object_path(key)?;
        Ok(provider.url(key))
    }

    fn active_provider(&self) -> Option<&Arc<dyn BlobProvider>> {
        self.providers.get(self.active.load(Ordering::SeqCst))
    }
}

/// Object key for an upload: `[folder/]<basename>_<millis>.<ext>`
///
/// Characters other than ASCII letters, digits, `-` and `_` in the base
/// name become `_`.
pub fn generate_key(name: &str, folder: Option<&str>, millis: i64) -> String {
    let path = Path::new(name);
    let stem: String = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let stem = if stem.is_empty() { "file".to_string() } else { stem };

    let file = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}_{}.{}", stem, millis, ext.to_ascii_lowercase()),
        None => format!("{}_{}", stem, millis),
    };

    match folder.map(|f| f.trim_matches('/')).filter(|f| !f.is_empty()) {
        Some(folder) => format!("{}/{}", folder, file),
        None => file,
    }
}
