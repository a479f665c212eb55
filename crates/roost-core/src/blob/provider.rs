//! Blob providers
//!
//! Every provider is an [`ObjectStore`] behind a public base URL. S3-style
//! services differ only in endpoint, region and addressing style, so one
//! wrapper covers all of them plus the local disk.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, AttributeValue, Attributes, ObjectStore, PutOptions, PutPayload};
use tracing::debug;

use super::error::{BlobError, BlobResult};

/// A place attachments can be written to
#[async_trait]
pub trait BlobProvider: Send + Sync {
    /// Provider name for logs and responses
    fn name(&self) -> &str;

    /// Store `data` under `key` and return its public URL
    async fn upload(&self, key: &str, data: Bytes, content_type: &str) -> BlobResult<String>;

    async fn delete(&self, key: &str) -> BlobResult<()>;

    /// Public URL for `key`; does not check that the object exists
    fn url(&self, key: &str) -> String;
}

/// [`BlobProvider`] over any `object_store` backend
#[derive(Debug)]
pub struct ObjectStoreProvider {
    name: String,
    store: Arc<dyn ObjectStore>,
    public_base: String,
    /// Whether the backend accepts object attributes such as content type
    content_type_attrs: bool,
}

impl ObjectStoreProvider {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn ObjectStore>,
        public_base: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            public_base: public_base.into().trim_end_matches('/').to_string(),
            content_type_attrs: false,
        }
    }

    /// Send the content type with every upload
    pub fn with_content_type(mut self) -> Self {
        self.content_type_attrs = true;
        self
    }

    /// Files under a local directory, created if missing
    pub fn local(dir: &Path, public_base: Option<String>) -> BlobResult<Self> {
        std::fs::create_dir_all(dir).map_err(|source| BlobError::Read {
            path: dir.to_path_buf(),
            source,
        })?;
        let store = LocalFileSystem::new_with_prefix(dir)
            .map_err(|e| BlobError::provider("local", e))?;
        let base = public_base.unwrap_or_else(|| format!("file://{}", dir.display()));
        Ok(Self::new("local", Arc::new(store), base))
    }

    /// Objects held in memory, gone when the process exits
    pub fn memory(name: impl Into<String>) -> Self {
        let name = name.into();
        let base = format!("memory://{}", name);
        Self::new(name, Arc::new(InMemory::new()), base)
    }

}

/// Parse an object key; empty, `.` and `..` segments are rejected
pub(crate) fn object_path(key: &str) -> BlobResult<ObjectPath> {
    ObjectPath::parse(key).map_err(|_| BlobError::InvalidKey(key.to_string()))
}

#[async_trait]
impl BlobProvider for ObjectStoreProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upload(&self, key: &str, data: Bytes, content_type: &str) -> BlobResult<String> {
        let path = object_path(key)?;
        let size = data.len();

        let mut opts = PutOptions::default();
        if self.content_type_attrs {
            let mut attributes = Attributes::new();
            attributes.insert(
                Attribute::ContentType,
                AttributeValue::from(content_type.to_string()),
            );
            opts.attributes = attributes;
        }

        self.store
            .put_opts(&path, PutPayload::from(data), opts)
            .await
            .map_err(|e| BlobError::provider(self.name.clone(), e))?;

        debug!(provider = %self.name, key, size, "object uploaded");
        Ok(self.url(key))
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        let path = object_path(key)?;
        self.store
            .delete(&path)
            .await
            .map_err(|e| BlobError::provider(self.name.clone(), e))?;
        debug!(provider = %self.name, key, "object deleted");
        Ok(())
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_provider_writes_files() {
        let temp = TempDir::new().unwrap();
        let provider =
            ObjectStoreProvider::local(temp.path(), Some("https://cdn.example/".to_string()))
                .unwrap();

        let url = provider
            .upload("photos/bird_1.jpg", Bytes::from_static(b"jpeg"), "image/jpeg")
            .await
            .unwrap();

        assert_eq!(url, "https://cdn.example/photos/bird_1.jpg");
        assert_eq!(
            std::fs::read(temp.path().join("photos/bird_1.jpg")).unwrap(),
            b"jpeg"
        );

        provider.delete("photos/bird_1.jpg").await.unwrap();
        assert!(!temp.path().join("photos/bird_1.jpg").exists());
    }

    #[tokio::test]
    async fn test_memory_provider_accepts_content_type() {
        let provider = ObjectStoreProvider::memory("mem").with_content_type();
        let url = provider
            .upload("a.txt", Bytes::from_static(b"hi"), "text/plain")
            .await
            .unwrap();
        assert_eq!(url, "memory://mem/a.txt");
    }

    #[tokio::test]
    async fn test_rejects_invalid_key() {
        let provider = ObjectStoreProvider::memory("mem");
        let err = provider
            .upload("a//b", Bytes::new(), "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::InvalidKey(_)));
    }
}
