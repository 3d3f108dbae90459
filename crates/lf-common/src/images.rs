use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

const MAX_NAME_ATTEMPTS: u32 = 16;

#[derive(Debug, Error)]
pub enum ImageStoreError {
    #[error("image store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("empty image upload")]
    Empty,
}

/// An image received with a post or search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Persists uploaded bytes and resolves references back to bytes.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Stores the bytes and returns a reference usable with [`ImageStore::fetch`].
    async fn put(&self, file_name: &str, bytes: &[u8]) -> Result<String, ImageStoreError>;

    /// `Ok(None)` when the reference does not resolve to retrievable bytes.
    async fn fetch(&self, reference: &str) -> Result<Option<Vec<u8>>, ImageStoreError>;

    /// Removes bytes written by [`ImageStore::put`]. Unknown references are a no-op.
    async fn delete(&self, reference: &str) -> Result<(), ImageStoreError>;
}

/// Files under one directory, named `<millis>_<name>`.
#[derive(Debug, Clone)]
pub struct LocalImageStore {
    root: PathBuf,
}

impl LocalImageStore {
    /// Creates the directory if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, ImageStoreError> {
        std::fs::create_dir_all(dir.as_ref())?;
        let root = std::fs::canonicalize(dir.as_ref())?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical path for a local reference inside the upload directory.
    async fn resolve(&self, reference: &str) -> Option<PathBuf> {
        let reference = reference.trim();
        if reference.is_empty() || is_remote(reference) {
            return None;
        }

        let path = tokio::fs::canonicalize(reference).await.ok()?;
        if !path.starts_with(&self.root) {
            debug!(reference, "image reference outside upload dir");
            return None;
        }
        Some(path)
    }
}

fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "image".into()
    } else {
        trimmed.to_string()
    }
}

fn is_remote(reference: &str) -> bool {
    let lower = reference.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

#[async_trait]
impl ImageStore for LocalImageStore {
    #[instrument(skip(self, bytes), fields(len = bytes.len()))]
    async fn put(&self, file_name: &str, bytes: &[u8]) -> Result<String, ImageStoreError> {
        if bytes.is_empty() {
            return Err(ImageStoreError::Empty);
        }

        let name = sanitize_file_name(file_name);
        let millis = Utc::now().timestamp_millis();

        let mut attempt = 0;
        loop {
            let candidate = if attempt == 0 {
                format!("{millis}_{name}")
            } else {
                format!("{millis}_{attempt}_{name}")
            };
            let path = self.root.join(candidate);

            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(bytes).await?;
                    file.flush().await?;
                    debug!(path = %path.display(), "stored image");
                    return Ok(path.to_string_lossy().into_owned());
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists && attempt < MAX_NAME_ATTEMPTS => {
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn fetch(&self, reference: &str) -> Result<Option<Vec<u8>>, ImageStoreError> {
        let Some(path) = self.resolve(reference).await else {
            return Ok(None);
        };

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, reference: &str) -> Result<(), ImageStoreError> {
        let Some(path) = self.resolve(reference).await else {
            return Ok(());
        };

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "removed image");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_path_components_and_odd_characters() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("my photo (1).jpg"), "my_photo__1_.jpg");
        assert_eq!(sanitize_file_name(".hidden"), "hidden");
        assert_eq!(sanitize_file_name(""), "image");
    }

    #[tokio::test]
    async fn put_then_fetch_returns_same_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalImageStore::new(dir.path()).unwrap();

        let reference = store.put("wallet.jpg", b"jpeg-bytes").await.unwrap();
        let fetched = store.fetch(&reference).await.unwrap();

        assert!(reference.ends_with("_wallet.jpg"));
        assert_eq!(fetched.as_deref(), Some(&b"jpeg-bytes"[..]));
    }

    #[tokio::test]
    async fn same_name_twice_gets_distinct_references() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalImageStore::new(dir.path()).unwrap();

        let a = store.put("a.png", b"one").await.unwrap();
        let b = store.put("a.png", b"two").await.unwrap();

        assert_ne!(a, b);
        assert_eq!(store.fetch(&a).await.unwrap().as_deref(), Some(&b"one"[..]));
    }

    #[tokio::test]
    async fn unresolvable_references_yield_none() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::NamedTempFile::new().unwrap();
        let store = LocalImageStore::new(dir.path().join("uploads")).unwrap();

        assert!(store.fetch("https://cdn.example.com/a.jpg").await.unwrap().is_none());
        assert!(store.fetch("/definitely/missing.jpg").await.unwrap().is_none());
        assert!(store.fetch("   ").await.unwrap().is_none());
        assert!(
            store
                .fetch(outside.path().to_str().unwrap())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn delete_removes_only_files_inside_upload_dir() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::NamedTempFile::new().unwrap();
        let store = LocalImageStore::new(dir.path().join("uploads")).unwrap();
        let reference = store.put("a.png", b"one").await.unwrap();

        store.delete(&reference).await.unwrap();
        store.delete(&reference).await.unwrap();
        store.delete(outside.path().to_str().unwrap()).await.unwrap();

        assert!(store.fetch(&reference).await.unwrap().is_none());
        assert_eq!(std::fs::read_dir(store.root()).unwrap().count(), 0);
        assert!(outside.path().exists());
    }

    #[tokio::test]
    async fn rejects_empty_upload() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalImageStore::new(dir.path()).unwrap();

        assert!(matches!(store.put("x.jpg", b"").await, Err(ImageStoreError::Empty)));
    }
}
