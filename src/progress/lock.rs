//! Advisory lock around the progress index.
//!
//! The lock is a sentinel file created with `create_new`, so acquisition is a
//! single atomic filesystem operation shared by every process that follows the
//! same protocol. The holder's pid and acquisition time are written into it for
//! diagnostics. Dropping the guard removes the file.

use crate::errors::StoreError;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Default number of acquisition attempts before giving up.
pub const DEFAULT_LOCK_RETRIES: u32 = 50;
/// Default pause between attempts.
pub const DEFAULT_LOCK_BACKOFF: Duration = Duration::from_millis(100);

/// Retry settings for lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    pub retries: u32,
    pub backoff: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            retries: DEFAULT_LOCK_RETRIES,
            backoff: DEFAULT_LOCK_BACKOFF,
        }
    }
}

/// Held lock. Released on drop.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    /// Acquire the lock at `path`, retrying with a fixed backoff.
    pub fn acquire(path: &Path, settings: LockSettings) -> Result<Self, StoreError> {
        let attempts = settings.retries.max(1);
        for attempt in 1..=attempts {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    let stamp = format!(
                        "{} {}\n",
                        std::process::id(),
                        chrono::Utc::now().to_rfc3339()
                    );
                    // The holder stamp is informational only.
                    if let Err(e) = file.write_all(stamp.as_bytes()) {
                        debug!(path = %path.display(), error = %e, "could not stamp lock file");
                    }
                    debug!(path = %path.display(), attempt, "lock acquired");
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if attempt < attempts {
                        thread::sleep(settings.backoff);
                    }
                }
                Err(e) => {
                    return Err(StoreError::LockFailed {
                        path: path.to_path_buf(),
                        source: e,
                    });
                }
            }
        }

        warn!(path = %path.display(), attempts, "lock acquisition timed out");
        Err(StoreError::LockTimeout {
            path: path.to_path_buf(),
            attempts,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to release lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fast() -> LockSettings {
        LockSettings {
            retries: 3,
            backoff: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_acquire_and_release() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("progress.json.lock");

        let guard = LockGuard::acquire(&path, fast()).unwrap();
        assert!(path.exists());
        let stamp = std::fs::read_to_string(&path).unwrap();
        assert!(stamp.starts_with(&std::process::id().to_string()));

        drop(guard);
        assert!(!path.exists());
    }

    #[test]
    fn test_contended_lock_times_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("progress.json.lock");

        let _held = LockGuard::acquire(&path, fast()).unwrap();
        let err = LockGuard::acquire(&path, fast()).unwrap_err();
        assert!(err.is_lock_timeout());
        assert!(matches!(err, StoreError::LockTimeout { attempts: 3, .. }));
    }

    #[test]
    fn test_waiter_gets_lock_after_release() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("progress.json.lock");

        let held = LockGuard::acquire(&path, fast()).unwrap();
        let waiter_path = path.clone();
        let waiter = thread::spawn(move || {
            LockGuard::acquire(
                &waiter_path,
                LockSettings {
                    retries: 200,
                    backoff: Duration::from_millis(5),
                },
            )
            .map(|_| ())
        });

        thread::sleep(Duration::from_millis(20));
        drop(held);
        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn test_missing_directory_is_a_hard_failure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("progress.json.lock");
        assert!(matches!(
            LockGuard::acquire(&path, fast()),
            Err(StoreError::LockFailed { .. })
        ));
    }
}
