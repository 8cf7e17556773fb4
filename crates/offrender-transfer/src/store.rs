//! Worker-local small-object store.
//!
//! The quality flag, the completion sentinel and the render outcome are the
//! only state the server and executor share. Both reach it through
//! [`BlobStore`]; the contract is last writer wins, readers poll for
//! existence.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::TransferResult;
use crate::protocol::WorkerPaths;

/// Well-known objects in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    Quality,
    Sentinel,
    RenderStatus,
}

impl StoreKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKey::Quality => "quality",
            StoreKey::Sentinel => "sentinel",
            StoreKey::RenderStatus => "render_status",
        }
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Create or replace the object.
    async fn put(&self, key: StoreKey, bytes: &[u8]) -> TransferResult<()>;

    /// Read the object; `None` if it does not exist.
    async fn try_get(&self, key: StoreKey) -> TransferResult<Option<Vec<u8>>>;

    /// Remove the object; removing a missing object is not an error.
    async fn remove(&self, key: StoreKey) -> TransferResult<()>;
}

/// Filesystem store mapping keys to [`WorkerPaths`].
#[derive(Debug, Clone)]
pub struct FsStore {
    paths: WorkerPaths,
}

impl FsStore {
    pub fn new(paths: WorkerPaths) -> Self {
        Self { paths }
    }

    pub fn path(&self, key: StoreKey) -> PathBuf {
        match key {
            StoreKey::Quality => self.paths.quality_file.clone(),
            StoreKey::Sentinel => self.paths.sentinel_path(),
            StoreKey::RenderStatus => self.paths.status_file.clone(),
        }
    }
}

#[async_trait]
impl BlobStore for FsStore {
    async fn put(&self, key: StoreKey, bytes: &[u8]) -> TransferResult<()> {
        let path = self.path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        debug!(key = key.as_str(), path = %path.display(), "Stored object");
        Ok(())
    }

    async fn try_get(&self, key: StoreKey) -> TransferResult<Option<Vec<u8>>> {
        match tokio::fs::read(self.path(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, key: StoreKey) -> TransferResult<()> {
        match tokio::fs::remove_file(self.path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<StoreKey, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn put(&self, key: StoreKey, bytes: &[u8]) -> TransferResult<()> {
        self.objects.write().await.insert(key, bytes.to_vec());
        Ok(())
    }

    async fn try_get(&self, key: StoreKey) -> TransferResult<Option<Vec<u8>>> {
        Ok(self.objects.read().await.get(&key).cloned())
    }

    async fn remove(&self, key: StoreKey) -> TransferResult<()> {
        self.objects.write().await.remove(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn exercise(store: &dyn BlobStore) {
        assert!(store.try_get(StoreKey::Sentinel).await.unwrap().is_none());

        store.put(StoreKey::Sentinel, b"").await.unwrap();
        assert_eq!(
            store.try_get(StoreKey::Sentinel).await.unwrap(),
            Some(Vec::new())
        );

        store.put(StoreKey::Quality, b"low").await.unwrap();
        store.put(StoreKey::Quality, b"high").await.unwrap();
        assert_eq!(
            store.try_get(StoreKey::Quality).await.unwrap().as_deref(),
            Some(&b"high"[..])
        );

        store.remove(StoreKey::Sentinel).await.unwrap();
        store.remove(StoreKey::Sentinel).await.unwrap();
        assert!(store.try_get(StoreKey::Sentinel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store() {
        exercise(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_fs_store() {
        let dir = TempDir::new().unwrap();
        let paths = WorkerPaths::under(dir.path());
        let store = FsStore::new(paths.clone());

        exercise(&store).await;

        assert_eq!(store.path(StoreKey::Sentinel), paths.sentinel_path());
        assert_eq!(
            std::fs::read_to_string(&paths.quality_file).unwrap(),
            "high"
        );
    }
}
