//! Object storage for uploaded videos
//! Uses Apache Arrow object_store crate

use bytes::Bytes;
use chrono::Utc;
use object_store::{ObjectStore, local::LocalFileSystem, memory::InMemory, path::Path as StoragePath};
use std::sync::Arc;
use thiserror::Error;

use crate::config::{StorageConfig, StorageProvider};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Object store error: {0}")]
    ObjectStoreError(#[from] object_store::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

/// Metadata returned after upload
#[derive(Debug, Clone, PartialEq)]
pub struct StoredVideo {
    pub key: String,
    /// Reference handed to the pipeline as the video file URL
    pub url: String,
    pub etag: Option<String>,
    pub size: usize,
}

/// Video storage wrapping object_store
#[derive(Clone)]
pub struct VideoStorage {
    store: Arc<dyn ObjectStore>,
    public_base_url: String,
}

impl VideoStorage {
    /// Create storage with any object_store backend
    pub fn new(store: Arc<dyn ObjectStore>, public_base_url: impl Into<String>) -> Self {
        Self {
            store,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Create in-memory storage for testing/development
    pub fn in_memory(public_base_url: impl Into<String>) -> Self {
        Self::new(Arc::new(InMemory::new()), public_base_url)
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = match config.provider {
            StorageProvider::Memory => Arc::new(InMemory::new()),
            StorageProvider::Local => {
                std::fs::create_dir_all(&config.root)?;
                Arc::new(LocalFileSystem::new_with_prefix(&config.root)?)
            }
        };

        tracing::info!(provider = ?config.provider, "Video storage ready");
        Ok(Self::new(store, config.public_base_url.clone()))
    }

    /// `videos/{account}/{millis}-{filename}` with both parts sanitized
    pub fn object_key(account_id: &str, filename: &str) -> String {
        format!(
            "videos/{}/{}-{}",
            sanitize(account_id),
            Utc::now().timestamp_millis(),
            sanitize(filename)
        )
    }

    pub fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }

    /// The object key behind a URL produced by [`Self::url_for`], if any
    pub fn key_for_url<'a>(&self, url: &'a str) -> Option<&'a str> {
        url.strip_prefix(self.public_base_url.as_str())?
            .strip_prefix('/')
            .filter(|key| !key.is_empty())
    }

    /// Store an uploaded video
    pub async fn upload(&self, account_id: &str, filename: &str, data: Bytes) -> Result<StoredVideo> {
        let key = Self::object_key(account_id, filename);
        let path = StoragePath::from(key.as_str());
        let size = data.len();

        let put_result = self.store.put(&path, data.into()).await?;

        tracing::info!(key, size, "Uploaded video to storage");

        Ok(StoredVideo {
            url: self.url_for(&key),
            key,
            etag: put_result.e_tag,
            size,
        })
    }

    /// Download from storage
    pub async fn download(&self, key: &str) -> Result<Bytes> {
        let path = parse_key(key)?;

        let result = match self.store.get(&path).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(StorageError::NotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let bytes = result.bytes().await?;

        tracing::debug!(key, size = bytes.len(), "Downloaded from storage");

        Ok(bytes)
    }

    /// Check if key exists
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let path = parse_key(key)?;

        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn parse_key(key: &str) -> Result<StoragePath> {
    StoragePath::parse(key).map_err(|e| StorageError::InvalidKey(e.to_string()))
}

fn sanitize(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '@') {
                c
            } else {
                '_'
            }
        })
        .collect();

    // Leading dots would allow "." and ".." segments
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_is_sanitized() {
        let key = VideoStorage::object_key("ana@example.com", "../my clip?.mp4");
        assert!(key.starts_with("videos/ana@example.com/"));
        assert!(key.ends_with("-_my_clip_.mp4"));
        assert!(!key.contains(".."));
    }

    #[test]
    fn test_sanitize_empty_name() {
        assert_eq!(sanitize(".."), "unnamed");
        assert_eq!(sanitize(""), "unnamed");
    }

    #[test]
    fn test_key_for_url() {
        let storage = VideoStorage::in_memory("https://files.example.com/");
        let url = storage.url_for("videos/a/1-clip.mp4");

        assert_eq!(url, "https://files.example.com/videos/a/1-clip.mp4");
        assert_eq!(storage.key_for_url(&url), Some("videos/a/1-clip.mp4"));
        assert_eq!(storage.key_for_url("https://elsewhere.example.com/x.mp4"), None);
        assert_eq!(storage.key_for_url("https://files.example.com/"), None);
    }

    #[tokio::test]
    async fn test_upload_then_download() {
        let storage = VideoStorage::in_memory("https://files.example.com");
        let stored = storage
            .upload("ana", "clip.mp4", Bytes::from_static(b"not really a video"))
            .await
            .unwrap();

        assert_eq!(stored.size, 18);
        assert!(storage.exists(&stored.key).await.unwrap());
        assert_eq!(
            storage.download(&stored.key).await.unwrap(),
            Bytes::from_static(b"not really a video")
        );
    }

    #[tokio::test]
    async fn test_missing_object() {
        let storage = VideoStorage::in_memory("https://files.example.com");

        assert!(!storage.exists("videos/ana/1-none.mp4").await.unwrap());
        assert!(matches!(
            storage.download("videos/ana/1-none.mp4").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_local_provider_writes_under_root() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let storage = VideoStorage::from_config(&StorageConfig {
            provider: StorageProvider::Local,
            root: temp_dir.path().join("uploads"),
            public_base_url: "http://localhost:8080/files".to_string(),
        })
        .unwrap();

        let stored = storage
            .upload("ana", "clip.mp4", Bytes::from_static(b"abc"))
            .await
            .unwrap();
        assert!(temp_dir.path().join("uploads").join(&stored.key).exists());
    }
}
