//! Durable progress store.
//!
//! The index lives in a single JSON file. Every write replaces the whole file
//! through a temporary sibling and an atomic rename, and every write happens
//! while holding the sentinel lock from [`super::lock`].

use crate::errors::StoreError;
use crate::progress::document::IndexDocument;
use crate::progress::index::{IssuesPolicy, ProgressIndex};
use crate::progress::lock::{LockGuard, LockSettings};
use chrono::Utc;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Result of a conditional save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The index was written with this new version.
    Saved { version: u64 },
    /// The on-disk version did not match; nothing was written.
    Conflict { current: u64 },
}

impl SaveOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved { .. })
    }
}

/// Handle to `progress.json` and its lock file.
#[derive(Debug, Clone)]
pub struct ProgressStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock: LockSettings,
    policy: IssuesPolicy,
}

impl ProgressStore {
    /// Create a store for the index at `path`. The lock is `<path>.lock`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path.as_os_str().to_owned();
        lock_name.push(".lock");
        Self {
            path,
            lock_path: PathBuf::from(lock_name),
            lock: LockSettings::default(),
            policy: IssuesPolicy::default(),
        }
    }

    pub fn with_lock_settings(mut self, settings: LockSettings) -> Self {
        self.lock = settings;
        self
    }

    pub fn with_policy(mut self, policy: IssuesPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Read the index without taking the lock. A missing file is an empty index.
    pub fn load(&self) -> Result<ProgressIndex, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ProgressIndex::new().with_policy(self.policy));
            }
            Err(e) => {
                return Err(StoreError::ReadFailed {
                    path: self.path.clone(),
                    source: e,
                });
            }
        };

        let document: IndexDocument =
            serde_json::from_str(&content).map_err(|e| StoreError::Malformed {
                path: self.path.clone(),
                source: e,
            })?;

        let mut index = document.into_index();
        index.policy = self.policy;
        index.refresh();
        Ok(index)
    }

    /// Write `index` only if the on-disk version still equals `expected_version`.
    pub fn try_save(
        &self,
        index: &ProgressIndex,
        expected_version: u64,
    ) -> Result<SaveOutcome, StoreError> {
        let _guard = self.acquire()?;
        let current = self.load()?.version;
        if current != expected_version {
            debug!(current, expected_version, "conditional save rejected");
            return Ok(SaveOutcome::Conflict { current });
        }

        let mut next = index.clone();
        self.stamp(&mut next, current);
        self.write(&next)?;
        Ok(SaveOutcome::Saved {
            version: next.version,
        })
    }

    /// Run `f` against the freshly loaded index while holding the lock, then
    /// persist the result.
    ///
    /// When `f` fails, nothing is written and the error is returned. The lock
    /// is released on every path.
    pub fn with_lock<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut ProgressIndex) -> Result<T, StoreError>,
    {
        let _guard = self.acquire()?;
        let mut index = self.load()?;
        let base = index.version;

        let value = f(&mut index)?;

        self.stamp(&mut index, base);
        self.write(&index)?;
        Ok(value)
    }

    fn acquire(&self) -> Result<LockGuard, StoreError> {
        if let Some(parent) = self.lock_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::LockFailed {
                    path: self.lock_path.clone(),
                    source: e,
                })?;
            }
        }
        LockGuard::acquire(&self.lock_path, self.lock)
    }

    fn stamp(&self, index: &mut ProgressIndex, base: u64) {
        index.version = base + 1;
        index.last_updated = Some(Utc::now());
        index.policy = self.policy;
        index.refresh();
    }

    fn write(&self, index: &ProgressIndex) -> Result<(), StoreError> {
        let write_err = |source| StoreError::WriteFailed {
            path: self.path.clone(),
            source,
        };

        let json = serde_json::to_string_pretty(&IndexDocument::from(index))
            .map_err(|e| StoreError::Other(e.into()))?;

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = NamedTempFile::new_in(&dir).map_err(write_err)?;
        tmp.write_all(json.as_bytes()).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&self.path).map_err(|e| write_err(e.error))?;

        debug!(path = %self.path.display(), version = index.version, "progress index written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::TaskKey;
    use crate::errors::IndexError;
    use crate::progress::index::{PlanRecord, TaskRecord, TaskStatus};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    fn seeded_store(dir: &Path) -> ProgressStore {
        let store = ProgressStore::new(dir.join("progress.json"));
        store
            .with_lock(|index| {
                index.insert_plan(
                    PlanRecord::new("p1", 1)
                        .with_task(TaskRecord::new("TASK-1"))
                        .with_task(TaskRecord::new("TASK-2")),
                );
                Ok(())
            })
            .unwrap();
        store
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = ProgressStore::new(dir.path().join("progress.json"));
        let index = store.load().unwrap();
        assert_eq!(index.version, 0);
        assert_eq!(index.task_count(), 0);
    }

    #[test]
    fn test_malformed_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            ProgressStore::new(&path).load(),
            Err(StoreError::Malformed { .. })
        ));
    }

    #[test]
    fn test_with_lock_persists_and_bumps_version() {
        let dir = tempdir().unwrap();
        let store = seeded_store(dir.path());

        let index = store.load().unwrap();
        assert_eq!(index.version, 1);
        assert!(index.last_updated.is_some());
        assert_eq!(index.task_count(), 2);
        assert!(!store.lock_path().exists());
    }

    #[test]
    fn test_failed_closure_writes_nothing() {
        let dir = tempdir().unwrap();
        let store = seeded_store(dir.path());
        let before = std::fs::read_to_string(store.path()).unwrap();

        let result: Result<(), StoreError> = store.with_lock(|index| {
            index.transition_task(&TaskKey::new("p1", "TASK-1"), TaskStatus::InProgress)?;
            Err(IndexError::UnknownPlan {
                plan: "nope".to_string(),
            }
            .into())
        });

        assert!(result.is_err());
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), before);
        assert!(!store.lock_path().exists());
    }

    #[test]
    fn test_try_save_detects_conflict() {
        let dir = tempdir().unwrap();
        let store = seeded_store(dir.path());

        let mut stale = store.load().unwrap();
        let mut fresh = store.load().unwrap();

        fresh
            .transition_task(&TaskKey::new("p1", "TASK-1"), TaskStatus::InProgress)
            .unwrap();
        assert_eq!(
            store.try_save(&fresh, 1).unwrap(),
            SaveOutcome::Saved { version: 2 }
        );

        stale
            .transition_task(&TaskKey::new("p1", "TASK-2"), TaskStatus::InProgress)
            .unwrap();
        assert_eq!(
            store.try_save(&stale, 1).unwrap(),
            SaveOutcome::Conflict { current: 2 }
        );

        let index = store.load().unwrap();
        let status = |t: &str| index.task(&TaskKey::new("p1", t)).unwrap().status;
        assert_eq!(status("TASK-1"), TaskStatus::InProgress);
        assert_eq!(status("TASK-2"), TaskStatus::NotStarted);
    }

    #[test]
    fn test_held_lock_times_out() {
        let dir = tempdir().unwrap();
        let store = seeded_store(dir.path()).with_lock_settings(LockSettings {
            retries: 2,
            backoff: Duration::from_millis(5),
        });
        std::fs::write(store.lock_path(), "999 stale").unwrap();

        let err = store.with_lock(|_| Ok(())).unwrap_err();
        assert!(err.is_lock_timeout());
    }

    #[test]
    fn test_concurrent_updates_are_serialized() {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            ProgressStore::new(dir.path().join("progress.json")).with_lock_settings(
                LockSettings {
                    retries: 1000,
                    backoff: Duration::from_millis(1),
                },
            ),
        );

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store
                        .with_lock(|index| {
                            index.insert_plan(
                                PlanRecord::new(format!("plan-{}", i), 1)
                                    .with_task(TaskRecord::new("TASK-1")),
                            );
                            Ok(())
                        })
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let index = store.load().unwrap();
        assert_eq!(index.version, 8);
        assert_eq!(index.plans().count(), 8);
    }
}
