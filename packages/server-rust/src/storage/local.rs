//! Local filesystem blob storage, claimed through a lock file in its root.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::lock::{LockError, LockFile};
use crate::traits::BlobStorage;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("storage root {path}: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid storage key {0:?}")]
    InvalidKey(String),
    #[error("storage is closed")]
    Closed,
}

/// Blobs stored as files under `root`.
///
/// Opening creates the root and acquires `root/<lock name>`; closing removes
/// the lock file. Every operation fails after close.
#[derive(Debug)]
pub struct LocalStorage {
    root: PathBuf,
    lock: Mutex<Option<LockFile>>,
}

impl LocalStorage {
    /// # Errors
    ///
    /// [`StorageError::Root`] if the root cannot be created, or
    /// [`StorageError::Lock`] if the lock cannot be acquired in time.
    pub async fn open(
        root: &Path,
        lock_name: &str,
        lock_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|source| StorageError::Root {
                path: root.to_path_buf(),
                source,
            })?;
        let lock = LockFile::acquire(root, lock_name, lock_timeout, cancel).await?;
        info!(root = %root.display(), lock = %lock.path().display(), "local storage opened");
        Ok(Self {
            root: root.to_path_buf(),
            lock: Mutex::new(Some(lock)),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the held lock file, `None` once closed.
    #[must_use]
    pub fn lock_path(&self) -> Option<PathBuf> {
        self.lock.lock().as_ref().map(|l| l.path().to_path_buf())
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        if self.lock.lock().is_none() {
            return Err(StorageError::Closed);
        }
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && !key.ends_with(".lock")
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStorage for LocalStorage {
    async fn put(&self, key: &str, data: Bytes) -> anyhow::Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<Bytes>> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn close(&self) -> anyhow::Result<()> {
        let lock = self.lock.lock().take();
        if let Some(mut lock) = lock {
            lock.release()?;
            info!(root = %self.root.display(), "local storage closed");
        }
        Ok(())
    }
}
