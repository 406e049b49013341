//! Cooperative, file-based mutual exclusion between sync invocations.
//!
//! One lock file exists per (store, sheet) pair. The lock is advisory: the
//! store itself does not enforce it. A lock older than the staleness window
//! is treated as abandoned by a crashed holder and evicted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{LockConfig, StoreTarget};
use crate::constants::lock::{LOCK_FILE_EXTENSION, LOCK_FILE_PREFIX};
use crate::errors::SyncError;
use crate::types::HolderId;

/// Contents of a lock side file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Identity of the process holding the lock.
    pub holder: HolderId,
    /// When the lock was taken (RFC 3339 on disk).
    pub acquired_at: DateTime<Utc>,
    /// `store/sheet` label of the locked target.
    pub target: String,
}

impl LockRecord {
    /// Age of the lock at `now`; future timestamps count as zero.
    pub fn age_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.acquired_at).max(chrono::Duration::zero())
    }
}

/// Identity of one lockable (store, sheet) pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LockKey {
    label: String,
    file_name: String,
}

impl LockKey {
    /// Key for `target`.
    pub fn for_target(target: &StoreTarget) -> Self {
        Self {
            label: target.label(),
            file_name: format!(
                "{LOCK_FILE_PREFIX}{}--{}.{LOCK_FILE_EXTENSION}",
                escape_component(&target.store_id),
                escape_component(&target.sheet)
            ),
        }
    }

    /// `store/sheet` label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Lock file name inside the lock directory.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

/// Escape everything except ASCII alphanumerics as `_xx` hex so distinct
/// components never map to the same file name.
fn escape_component(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() {
            escaped.push(byte as char);
        } else {
            escaped.push_str(&format!("_{byte:02x}"));
        }
    }
    escaped
}

/// Acquires and releases lock side files in one directory.
#[derive(Clone, Debug)]
pub struct LockManager {
    dir: PathBuf,
    stale_after: Duration,
    holder: HolderId,
}

impl LockManager {
    /// Manager configured from `config`.
    pub fn new(config: LockConfig) -> Self {
        Self {
            dir: config.dir,
            stale_after: config.stale_after,
            holder: config.holder,
        }
    }

    /// Path of the lock file for `key`.
    pub fn lock_path(&self, key: &LockKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Read the current lock for `key`; `Ok(None)` when no lock exists.
    ///
    /// An unparseable lock file is still a lock: its age falls back to the
    /// file's modification time.
    pub fn read_lock(&self, key: &LockKey) -> Result<Option<LockRecord>, SyncError> {
        let path = self.lock_path(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(SyncError::Lock(format!(
                    "failed to read {}: {err}",
                    path.display()
                )));
            }
        };
        match serde_json::from_slice::<LockRecord>(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                warn!(
                    "[tabsync:lock] unreadable lock file {} ({err}); using its modified time",
                    path.display()
                );
                let acquired_at = file_mtime(&path).ok_or_else(|| {
                    SyncError::Lock(format!(
                        "cannot determine age of unreadable lock {}",
                        path.display()
                    ))
                })?;
                Ok(Some(LockRecord {
                    holder: "unknown".to_string(),
                    acquired_at,
                    target: key.label().to_string(),
                }))
            }
        }
    }

    /// Acquire the lock for `key`, evicting it first if it is stale.
    ///
    /// Fails with [`SyncError::LockContention`] while a fresh lock exists.
    pub fn acquire(&self, key: &LockKey) -> Result<LockGuard, SyncError> {
        if let Some(existing) = self.read_lock(key)? {
            self.evict_if_stale(key, &existing)?;
        }
        fs::create_dir_all(&self.dir).map_err(|err| {
            SyncError::Lock(format!(
                "failed to create lock directory {}: {err}",
                self.dir.display()
            ))
        })?;

        let path = self.lock_path(key);
        let record = LockRecord {
            holder: self.holder.clone(),
            acquired_at: Utc::now(),
            target: key.label().to_string(),
        };
        let payload = serde_json::to_vec_pretty(&record)?;
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                // Another process won the race between our check and create.
                return match self.read_lock(key)? {
                    Some(winner) => Err(self.contention(key, &winner)),
                    None => Err(SyncError::Lock(format!(
                        "lock {} appeared and vanished during acquisition",
                        path.display()
                    ))),
                };
            }
            Err(err) => {
                return Err(SyncError::Lock(format!(
                    "failed to create {}: {err}",
                    path.display()
                )));
            }
        };
        if let Err(err) = file.write_all(&payload).and_then(|_| file.sync_all()) {
            let _ = fs::remove_file(&path);
            return Err(SyncError::Lock(format!(
                "failed to write {}: {err}",
                path.display()
            )));
        }
        info!(
            "[tabsync:lock] acquired lock for '{}' as '{}'",
            key.label(),
            self.holder
        );
        Ok(LockGuard {
            path,
            label: key.label().to_string(),
            released: false,
        })
    }

    /// Best-effort removal of the lock for `key`; failures are logged only.
    pub fn release(&self, key: &LockKey) {
        remove_lock_file(&self.lock_path(key), key.label());
    }

    fn evict_if_stale(&self, key: &LockKey, existing: &LockRecord) -> Result<(), SyncError> {
        let age = existing.age_at(Utc::now());
        let stale_after = chrono::Duration::from_std(self.stale_after)
            .unwrap_or(chrono::Duration::MAX);
        if age <= stale_after {
            return Err(self.contention(key, existing));
        }
        warn!(
            "[tabsync:lock] evicting stale lock for '{}' held by '{}' ({}s old)",
            key.label(),
            existing.holder,
            age.num_seconds()
        );
        match fs::remove_file(self.lock_path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(SyncError::Lock(format!(
                "failed to evict stale lock for '{}': {err}",
                key.label()
            ))),
        }
    }

    fn contention(&self, key: &LockKey, existing: &LockRecord) -> SyncError {
        SyncError::LockContention {
            key: key.label().to_string(),
            holder: existing.holder.clone(),
            age_secs: existing.age_at(Utc::now()).num_seconds(),
        }
    }
}

/// Held lock; released explicitly or when dropped.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    label: String,
    released: bool,
}

impl LockGuard {
    /// Path of the held lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock now (best-effort).
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            remove_lock_file(&self.path, &self.label);
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

fn remove_lock_file(path: &Path, label: &str) {
    match fs::remove_file(path) {
        Ok(()) => debug!("[tabsync:lock] released lock for '{}'", label),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!("[tabsync:lock] lock for '{}' already removed", label)
        }
        Err(err) => warn!(
            "[tabsync:lock] failed to release lock {}: {err}",
            path.display()
        ),
    }
}

/// Best-effort file modified time.
fn file_mtime(path: &Path) -> Option<DateTime<Utc>> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager(dir: &Path) -> LockManager {
        LockManager::new(LockConfig {
            dir: dir.to_path_buf(),
            holder: "test-holder".to_string(),
            ..LockConfig::default()
        })
    }

    fn key() -> LockKey {
        LockKey::for_target(&StoreTarget {
            store_id: "sheet-123".into(),
            sheet: "Daily Metrics".into(),
        })
    }

    fn write_lock(manager: &LockManager, key: &LockKey, minutes_ago: i64) {
        let record = LockRecord {
            holder: "other-holder".into(),
            acquired_at: Utc::now() - chrono::Duration::minutes(minutes_ago),
            target: key.label().to_string(),
        };
        fs::write(
            manager.lock_path(key),
            serde_json::to_vec(&record).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn lock_file_names_escape_components_injectively() {
        let a = LockKey::for_target(&StoreTarget {
            store_id: "a_b".into(),
            sheet: "c".into(),
        });
        let b = LockKey::for_target(&StoreTarget {
            store_id: "a-b".into(),
            sheet: "c".into(),
        });
        assert_ne!(a.file_name(), b.file_name());
        assert_eq!(key().file_name(), "sync-sheet_2d123--Daily_20Metrics.lock");
        assert_eq!(key().label(), "sheet-123/Daily Metrics");
    }

    #[test]
    fn acquire_writes_record_and_release_removes_it() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());
        let key = key();
        assert_eq!(manager.read_lock(&key).unwrap(), None);

        let guard = manager.acquire(&key).unwrap();
        let record = manager.read_lock(&key).unwrap().unwrap();
        assert_eq!(record.holder, "test-holder");
        assert_eq!(record.target, "sheet-123/Daily Metrics");
        assert!(guard.path().exists());

        guard.release();
        assert_eq!(manager.read_lock(&key).unwrap(), None);
    }

    #[test]
    fn dropping_the_guard_releases_the_lock() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());
        let key = key();
        {
            let _guard = manager.acquire(&key).unwrap();
            assert!(manager.lock_path(&key).exists());
        }
        assert!(!manager.lock_path(&key).exists());
    }

    #[test]
    fn fresh_lock_causes_contention() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());
        let key = key();
        write_lock(&manager, &key, 10);

        match manager.acquire(&key) {
            Err(SyncError::LockContention {
                holder, age_secs, ..
            }) => {
                assert_eq!(holder, "other-holder");
                assert!((599..=601).contains(&age_secs), "{age_secs}");
            }
            other => panic!("expected contention, got {other:?}"),
        }
        assert_eq!(
            manager.read_lock(&key).unwrap().unwrap().holder,
            "other-holder"
        );
    }

    #[test]
    fn stale_lock_is_evicted() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());
        let key = key();
        write_lock(&manager, &key, 40);

        let guard = manager.acquire(&key).unwrap();
        assert_eq!(
            manager.read_lock(&key).unwrap().unwrap().holder,
            "test-holder"
        );
        drop(guard);
    }

    #[test]
    fn second_acquire_while_held_fails() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());
        let key = key();
        let _guard = manager.acquire(&key).unwrap();
        assert!(matches!(
            manager.acquire(&key),
            Err(SyncError::LockContention { .. })
        ));
    }

    #[test]
    fn unreadable_lock_uses_file_age() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());
        let key = key();
        fs::write(manager.lock_path(&key), b"garbage").unwrap();

        let record = manager.read_lock(&key).unwrap().unwrap();
        assert_eq!(record.holder, "unknown");
        assert!(matches!(
            manager.acquire(&key),
            Err(SyncError::LockContention { .. })
        ));
    }

    #[test]
    fn release_of_missing_lock_is_harmless() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());
        manager.release(&key());
        assert_eq!(manager.read_lock(&key()).unwrap(), None);
    }
}
