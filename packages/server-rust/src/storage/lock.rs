//! Exclusive lock files guarding a storage root.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::distr::{Alphanumeric, SampleString};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::service::config::LockNaming;

/// Poll interval while another holder owns the lock.
const RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// Shortest random token accepted for [`LockNaming::RandomToken`].
pub const MIN_LOCK_TOKEN_LEN: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock {path} still held after {waited:?}")]
    Timeout { path: PathBuf, waited: Duration },
    #[error("lock acquisition cancelled")]
    Cancelled,
    #[error("lock token length {len} is below the minimum of {min}")]
    TokenTooShort { len: usize, min: usize },
    #[error("lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Produces the lock file name for a context.
///
/// # Errors
///
/// [`LockError::TokenTooShort`] when a random token would be shorter than
/// [`MIN_LOCK_TOKEN_LEN`]; such names collide between live contexts.
pub fn lock_file_name(naming: LockNaming, invocation_id: &str) -> Result<String, LockError> {
    let token = match naming {
        LockNaming::InvocationId => invocation_id.to_string(),
        LockNaming::RandomToken { len } if len < MIN_LOCK_TOKEN_LEN => {
            return Err(LockError::TokenTooShort {
                len,
                min: MIN_LOCK_TOKEN_LEN,
            });
        }
        LockNaming::RandomToken { len } => Alphanumeric.sample_string(&mut rand::rng(), len),
    };
    Ok(format!("{token}.lock"))
}

/// A held lock file. Removed on [`release`](Self::release) or drop.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    released: bool,
}

impl LockFile {
    /// Creates `root/name` exclusively, retrying while another holder owns
    /// it until `timeout` elapses or `cancel` fires.
    ///
    /// # Errors
    ///
    /// [`LockError::Timeout`], [`LockError::Cancelled`], or
    /// [`LockError::Io`] for anything other than the file already existing.
    pub async fn acquire(
        root: &Path,
        name: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Self, LockError> {
        let path = root.join(name);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if cancel.is_cancelled() {
                return Err(LockError::Cancelled);
            }
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    let lock = Self {
                        path: path.clone(),
                        released: false,
                    };
                    let stamp = format!("pid={}\n", std::process::id());
                    if let Err(source) = file.write_all(stamp.as_bytes()).await {
                        return Err(LockError::Io { path, source });
                    }
                    debug!(path = %path.display(), "lock acquired");
                    return Ok(lock);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(source) => return Err(LockError::Io { path, source }),
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(LockError::Timeout { path, waited: timeout });
            }
            tokio::select! {
                () = cancel.cancelled() => return Err(LockError::Cancelled),
                () = tokio::time::sleep(RETRY_INTERVAL) => {}
            }
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Removes the lock file. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Io`] if the file cannot be removed.
    pub fn release(&mut self) -> Result<(), LockError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "lock released");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(LockError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(error = %e, "failed to release lock on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_naming_mode() {
        assert_eq!(lock_file_name(LockNaming::InvocationId, "abc").unwrap(), "abc.lock");
        let random = lock_file_name(LockNaming::RandomToken { len: 5 }, "ignored").unwrap();
        assert_eq!(random.len(), "xxxxx.lock".len());
        assert!(random[..5].bytes().all(|b| b.is_ascii_alphanumeric()));
    }

    #[test]
    fn short_random_tokens_are_rejected() {
        for len in [0, 1, MIN_LOCK_TOKEN_LEN - 1] {
            assert!(matches!(
                lock_file_name(LockNaming::RandomToken { len }, "ignored"),
                Err(LockError::TokenTooShort { min: MIN_LOCK_TOKEN_LEN, .. })
            ));
        }
    }

    #[tokio::test]
    async fn cancelled_token_creates_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = LockFile::acquire(dir.path(), "c.lock", Duration::from_secs(1), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Cancelled));
        assert!(!dir.path().join("c.lock").exists());
    }

    #[tokio::test]
    async fn acquire_and_release_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let mut lock = LockFile::acquire(dir.path(), "a.lock", Duration::from_millis(100), &cancel)
            .await
            .unwrap();
        assert!(lock.path().exists());
        lock.release().unwrap();
        assert!(!dir.path().join("a.lock").exists());
        lock.release().unwrap();
    }

    #[tokio::test]
    async fn second_holder_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let _held = LockFile::acquire(dir.path(), "x.lock", Duration::from_millis(50), &cancel)
            .await
            .unwrap();
        let err = LockFile::acquire(dir.path(), "x.lock", Duration::from_millis(60), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));
    }

    #[tokio::test]
    async fn waiter_gets_lock_once_released() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let held = LockFile::acquire(dir.path(), "w.lock", Duration::from_millis(50), &cancel)
            .await
            .unwrap();
        let root = dir.path().to_path_buf();
        let waiter = tokio::spawn(async move {
            LockFile::acquire(&root, "w.lock", Duration::from_secs(2), &CancellationToken::new()).await
        });
        tokio::time::sleep(Duration::from_millis(60)).await;
        drop(held);
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn cancel_stops_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let _held = LockFile::acquire(dir.path(), "c.lock", Duration::from_millis(50), &cancel)
            .await
            .unwrap();
        let waiting = CancellationToken::new();
        waiting.cancel();
        let err = LockFile::acquire(dir.path(), "c.lock", Duration::from_secs(5), &waiting)
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Cancelled));
    }

    #[tokio::test]
    async fn distinct_names_do_not_contend() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let a = LockFile::acquire(dir.path(), "one.lock", Duration::from_millis(10), &cancel).await;
        let b = LockFile::acquire(dir.path(), "two.lock", Duration::from_millis(10), &cancel).await;
        assert!(a.is_ok() && b.is_ok());
    }
}
