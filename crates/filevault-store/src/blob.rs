//! Ciphertext blob storage.
//!
//! Blobs are opaque byte strings addressed by a [`BlobLocator`] the store
//! chooses. Two implementations: [`MemoryBlobStore`] for tests and
//! [`FsBlobStore`], one file per blob under a root directory.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, StoreError};

/// Opaque reference to a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobLocator(String);

impl BlobLocator {
    /// A fresh random locator.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage for ciphertext blobs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` and return where they went.
    async fn put(&self, bytes: Bytes) -> Result<BlobLocator>;

    /// Read a blob. Missing blobs are [`StoreError::NotFound`].
    async fn get(&self, locator: &BlobLocator) -> Result<Bytes>;

    /// Delete a blob. Returns `false` if it did not exist.
    async fn delete(&self, locator: &BlobLocator) -> Result<bool>;
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory blob store.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<BlobLocator, Bytes>>,
    fail_puts: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put` fail until switched back.
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite a stored blob in place.
    pub fn replace(&self, locator: &BlobLocator, bytes: Bytes) -> Result<()> {
        let mut blobs = self.blobs.write().map_err(lock_poisoned)?;
        match blobs.get_mut(locator) {
            Some(slot) => {
                *slot = bytes;
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("blob {}", locator))),
        }
    }
}

fn lock_poisoned<E: fmt::Display>(e: E) -> StoreError {
    StoreError::Unavailable(format!("lock poisoned: {}", e))
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bytes: Bytes) -> Result<BlobLocator> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("blob writes disabled".into()));
        }

        let locator = BlobLocator::generate();
        self.blobs
            .write()
            .map_err(lock_poisoned)?
            .insert(locator.clone(), bytes);
        Ok(locator)
    }

    async fn get(&self, locator: &BlobLocator) -> Result<Bytes> {
        self.blobs
            .read()
            .map_err(lock_poisoned)?
            .get(locator)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("blob {}", locator)))
    }

    async fn delete(&self, locator: &BlobLocator) -> Result<bool> {
        Ok(self
            .blobs
            .write()
            .map_err(lock_poisoned)?
            .remove(locator)
            .is_some())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Filesystem
// ─────────────────────────────────────────────────────────────────────────────

/// One file per blob under `root`.
///
/// Writes go to a temporary file that is synced and renamed into place.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Use `root` as the blob directory, creating it if needed.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn path_for(&self, locator: &BlobLocator) -> Result<PathBuf> {
        // Locators are generated by us; anything else could escape the root.
        if locator.as_str().is_empty()
            || !locator.as_str().bytes().all(|b| b.is_ascii_alphanumeric())
        {
            return Err(StoreError::InvalidData(format!(
                "invalid blob locator: {}",
                locator
            )));
        }
        Ok(self.root.join(locator.as_str()))
    }

    /// Write through a synced temporary file. The temporary file never
    /// outlives a failed write.
    async fn write_blob(&self, locator: &BlobLocator, bytes: &[u8]) -> Result<()> {
        use tokio::io::AsyncWriteExt;

        let path = self.path_for(locator)?;
        let tmp = path.with_extension("tmp");

        let written = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, &path).await
        }
        .await;

        if let Err(e) = written {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(blob = %locator, error = %cleanup, "failed to remove temporary blob");
                }
            }
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, bytes: Bytes) -> Result<BlobLocator> {
        let locator = BlobLocator::generate();
        self.write_blob(&locator, &bytes).await?;
        tracing::debug!(blob = %locator, size = bytes.len(), "wrote blob");
        Ok(locator)
    }

    async fn get(&self, locator: &BlobLocator) -> Result<Bytes> {
        let path = self.path_for(locator)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(format!("blob {}", locator)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, locator: &BlobLocator) -> Result<bool> {
        let path = self.path_for(locator)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(blob = %locator, "deleted blob");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_blob_store() {
        let store = MemoryBlobStore::new();
        let locator = store.put(Bytes::from_static(b"blob")).await.unwrap();

        assert_eq!(store.get(&locator).await.unwrap(), Bytes::from_static(b"blob"));
        assert_eq!(store.len(), 1);

        assert!(store.delete(&locator).await.unwrap());
        assert!(!store.delete(&locator).await.unwrap());
        assert!(matches!(store.get(&locator).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_memory_put_failure_switch() {
        let store = MemoryBlobStore::new();
        store.fail_puts(true);
        assert!(store.put(Bytes::from_static(b"x")).await.is_err());
        assert!(store.is_empty());

        store.fail_puts(false);
        assert!(store.put(Bytes::from_static(b"x")).await.is_ok());
    }

    #[tokio::test]
    async fn test_fs_blob_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(dir.path().join("blobs")).await.unwrap();

        let locator = store.put(Bytes::from_static(b"on disk")).await.unwrap();
        assert_eq!(
            store.get(&locator).await.unwrap(),
            Bytes::from_static(b"on disk")
        );
        assert!(dir.path().join("blobs").join(locator.as_str()).exists());

        assert!(store.delete(&locator).await.unwrap());
        assert!(matches!(store.get(&locator).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_fs_failed_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(dir.path()).await.unwrap();

        // A non-empty directory where the blob should land makes the rename fail.
        let locator = BlobLocator::generate();
        let target = dir.path().join(locator.as_str());
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("occupant"), b"x").unwrap();

        assert!(store.write_blob(&locator, b"payload").await.is_err());
        assert!(!target.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_fs_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(dir.path()).await.unwrap();

        let evil = BlobLocator::from_string("../etc/passwd");
        assert!(matches!(store.get(&evil).await, Err(StoreError::InvalidData(_))));
    }
}
