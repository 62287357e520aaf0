//! Single-writer advisory lock over the plugin directory.
//!
//! A sentinel file's presence means "a writer owns the store". Acquisition
//! polls for up to `lock_wait` before giving up, and treats a sentinel older
//! than `lock_stale` as abandoned by a crashed owner and steals it.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::error::{PluginError, PluginResult};

const SENTINEL_FILE: &str = ".pluginvault.lock";
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Holds the store's sentinel-file lock for the duration of its lifetime.
/// Dropping it releases the lock by removing the sentinel file.
#[derive(Debug)]
pub struct StoreLock {
    sentinel: PathBuf,
}

impl StoreLock {
    /// Attempts to acquire the lock over `plugins_path`, polling until
    /// `lock_wait` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::LockBusy`] if the sentinel is held by a live
    /// owner for the entire `lock_wait` budget.
    pub async fn acquire(
        plugins_path: &Path,
        lock_wait: Duration,
        lock_stale: Duration,
    ) -> PluginResult<Self> {
        let sentinel = plugins_path.join(SENTINEL_FILE);
        tokio::fs::create_dir_all(plugins_path).await?;

        let deadline = SystemTime::now() + lock_wait;
        loop {
            match create_sentinel(&sentinel).await {
                Ok(()) => {
                    log::debug!("acquired store lock at {}", sentinel.display());
                    return Ok(Self { sentinel });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if is_stale(&sentinel, lock_stale).await {
                        log::warn!(
                            "store lock at {} is stale (> {:?}), stealing it",
                            sentinel.display(),
                            lock_stale
                        );
                        let _ = tokio::fs::remove_file(&sentinel).await;
                        continue;
                    }
                    if SystemTime::now() >= deadline {
                        return Err(PluginError::LockBusy {
                            path: sentinel,
                            wait_ms: lock_wait.as_millis() as u64,
                        });
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Releases the lock early. Equivalent to dropping the guard, but
    /// surfaces I/O errors instead of swallowing them.
    pub async fn release(self) -> PluginResult<()> {
        let sentinel = self.sentinel.clone();
        std::mem::forget(self);
        match tokio::fs::remove_file(&sentinel).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.sentinel);
    }
}

async fn create_sentinel(sentinel: &Path) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;
    let mut file = tokio::fs::OpenOptions::new().write(true).create_new(true).open(sentinel).await?;
    file.write_all(std::process::id().to_string().as_bytes()).await?;
    Ok(())
}

async fn is_stale(sentinel: &Path, lock_stale: Duration) -> bool {
    match tokio::fs::metadata(sentinel).await.and_then(|m| m.modified()) {
        Ok(modified) => match SystemTime::now().duration_since(modified) {
            Ok(age) => age >= lock_stale,
            Err(_) => false,
        },
        Err(_) => false,
    }
}
