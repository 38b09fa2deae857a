//! Cross-process advisory locking for the shared artifact store.
//!
//! Readers take a shared lock, writers an exclusive one, on a sentinel
//! file next to the store. Acquisition polls with a deadline so a wedged
//! process cannot hang every pantry invocation forever.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::PantryError;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A held advisory lock. Released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Acquire a shared (reader) lock within `timeout`.
    pub fn shared(path: &Path, timeout: Duration) -> Result<Self, PantryError> {
        Self::acquire(path, timeout, false)
    }

    /// Acquire an exclusive (writer) lock within `timeout`.
    pub fn exclusive(path: &Path, timeout: Duration) -> Result<Self, PantryError> {
        Self::acquire(path, timeout, true)
    }

    fn acquire(path: &Path, timeout: Duration, exclusive: bool) -> Result<Self, PantryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PantryError::Permission {
                path: format!("{}: {e}", parent.display()),
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| PantryError::Permission {
                path: format!("{}: {e}", path.display()),
            })?;

        let deadline = Instant::now() + timeout;

        loop {
            let acquired = if exclusive {
                file.try_lock_exclusive().is_ok()
            } else {
                file.try_lock_shared().is_ok()
            };

            if acquired {
                return Ok(FileLock { file });
            }

            if Instant::now() >= deadline {
                return Err(PantryError::Timeout {
                    operation: format!(
                        "waiting for {} lock on {}",
                        if exclusive { "exclusive" } else { "shared" },
                        path.display()
                    ),
                });
            }

            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_shared_locks_coexist() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".lock");

        let a = FileLock::shared(&path, Duration::from_secs(1)).unwrap();
        let b = FileLock::shared(&path, Duration::from_secs(1)).unwrap();
        drop(a);
        drop(b);
    }

    #[test]
    fn test_exclusive_blocks_until_timeout() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".lock");

        let _writer = FileLock::exclusive(&path, Duration::from_secs(1)).unwrap();

        let result = FileLock::exclusive(&path, Duration::from_millis(50));
        assert!(matches!(result, Err(PantryError::Timeout { .. })));
    }

    #[test]
    fn test_released_on_drop() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".lock");

        {
            let _writer = FileLock::exclusive(&path, Duration::from_secs(1)).unwrap();
        }

        // Re-acquisition succeeds immediately after the guard drops
        let _again = FileLock::exclusive(&path, Duration::from_millis(50)).unwrap();
    }
}
