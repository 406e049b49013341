use std::fmt;
use std::sync::Mutex;

use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::data::{Record, WriteStats};
use crate::engine::Reconciler;
use crate::errors::SyncError;
use crate::lock::{LockGuard, LockKey, LockManager};
use crate::retry::RetryExecutor;
use crate::store::TabularStore;

/// States of one sync invocation.
///
/// `Idle → LockAcquired → BatchLoaded → {FullRefresh | IncrementalPlan →
/// RowsDeleted → ColumnsAdded → CapacityEnsured → RowsAppended} →
/// LockReleased → {Succeeded | Failed}`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncPhase {
    /// Nothing has happened yet.
    Idle,
    /// The cooperative lock is held (skipped in dry run).
    LockAcquired,
    /// The batch is in hand.
    BatchLoaded,
    /// Writing the whole batch over the store.
    FullRefresh,
    /// Computing deletions and schema changes.
    IncrementalPlan,
    /// Stale partitions removed.
    RowsDeleted,
    /// Header extended.
    ColumnsAdded,
    /// Row capacity checked (and grown if needed).
    CapacityEnsured,
    /// Batch appended.
    RowsAppended,
    /// The lock is gone, whatever happened before.
    LockReleased,
    /// Terminal success.
    Succeeded,
    /// Terminal failure.
    Failed,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::LockAcquired => "lock_acquired",
            SyncPhase::BatchLoaded => "batch_loaded",
            SyncPhase::FullRefresh => "full_refresh",
            SyncPhase::IncrementalPlan => "incremental_plan",
            SyncPhase::RowsDeleted => "rows_deleted",
            SyncPhase::ColumnsAdded => "columns_added",
            SyncPhase::CapacityEnsured => "capacity_ensured",
            SyncPhase::RowsAppended => "rows_appended",
            SyncPhase::LockReleased => "lock_released",
            SyncPhase::Succeeded => "succeeded",
            SyncPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Runs sync invocations for one configured target.
///
/// Each call to [`Synchronizer::run`] takes the target's lock (unless the
/// config is a dry run), applies the batch through a [`Reconciler`], and
/// releases the lock on every exit path.
pub struct Synchronizer {
    config: SyncConfig,
    locks: LockManager,
    retry: RetryExecutor,
    trace: Mutex<Vec<SyncPhase>>,
}

impl fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synchronizer")
            .field("config", &self.config)
            .field("retry", &self.retry)
            .finish()
    }
}

impl Synchronizer {
    /// Validate `config` and build a synchronizer for it.
    pub fn new(config: SyncConfig) -> Result<Self, SyncError> {
        let config = config.validated()?;
        Ok(Self {
            locks: LockManager::new(config.lock.clone()),
            retry: RetryExecutor::new(config.retry),
            config,
            trace: Mutex::new(Vec::new()),
        })
    }

    /// Replace the retry executor used for store calls.
    pub fn with_retry(mut self, retry: RetryExecutor) -> Self {
        self.retry = retry;
        self
    }

    /// Validated configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Lock manager for the configured lock directory.
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Coarse phases visited by the most recent run, in order.
    pub fn last_trace(&self) -> Vec<SyncPhase> {
        self.trace
            .lock()
            .map(|trace| trace.clone())
            .unwrap_or_default()
    }

    /// Apply `records` to `store` under the configured mode.
    pub fn run<S>(&self, store: &S, records: &[Record]) -> Result<WriteStats, SyncError>
    where
        S: TabularStore + ?Sized,
    {
        let mut trace = vec![SyncPhase::Idle];
        let target = self.config.target.label();
        let result = self.run_locked(store, records, &mut trace);
        trace.push(SyncPhase::LockReleased);

        match &result {
            Ok(stats) => {
                trace.push(SyncPhase::Succeeded);
                info!(
                    "[tabsync:sync] {} succeeded: total={} new={} deleted={} dry_run={}",
                    target,
                    stats.total_records,
                    stats.new_records,
                    stats.deleted_records,
                    stats.dry_run
                );
            }
            Err(err) => {
                trace.push(SyncPhase::Failed);
                warn!("[tabsync:sync] {} failed: {}", target, err);
            }
        }
        if let Ok(mut slot) = self.trace.lock() {
            *slot = trace;
        }
        result
    }

    fn run_locked<S>(
        &self,
        store: &S,
        records: &[Record],
        trace: &mut Vec<SyncPhase>,
    ) -> Result<WriteStats, SyncError>
    where
        S: TabularStore + ?Sized,
    {
        let _guard: Option<LockGuard> = if self.config.dry_run {
            None
        } else {
            let guard = self.locks.acquire(&LockKey::for_target(&self.config.target))?;
            trace.push(SyncPhase::LockAcquired);
            Some(guard)
        };

        trace.push(SyncPhase::BatchLoaded);
        info!(
            "[tabsync:sync] {} records for {} (mode={:?} dry_run={})",
            records.len(),
            self.config.target.label(),
            self.config.mode,
            self.config.dry_run
        );

        let engine = Reconciler::new(store, &self.config).with_retry(self.retry.clone());
        engine.run_traced(records, trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockConfig;
    use crate::errors::StoreError;
    use crate::store::{InMemoryStore, StoreOp};
    use serde_json::json;
    use tempfile::tempdir;

    fn config_in(dir: &std::path::Path) -> SyncConfig {
        SyncConfig {
            lock: LockConfig {
                dir: dir.to_path_buf(),
                ..LockConfig::default()
            },
            ..SyncConfig::default()
        }
    }

    fn batch() -> Vec<Record> {
        vec![json!({"date": "2024-01-01", "n": 1})]
            .into_iter()
            .filter_map(|value| value.as_object().cloned())
            .collect()
    }

    fn synchronizer(config: SyncConfig) -> Synchronizer {
        let retry = RetryExecutor::new(config.retry).with_sleeper(|_| {});
        Synchronizer::new(config).unwrap().with_retry(retry)
    }

    #[test]
    fn lock_is_released_after_success() {
        let dir = tempdir().unwrap();
        let sync = synchronizer(config_in(dir.path()));
        let store = InMemoryStore::with_rows(vec![
            vec!["date".to_string(), "n".to_string()],
            vec!["2024-01-01".to_string(), "0".to_string()],
        ]);
        sync.run(&store, &batch()).unwrap();

        let key = LockKey::for_target(&sync.config().target);
        assert!(!sync.locks().lock_path(&key).exists());
        assert_eq!(
            sync.last_trace(),
            vec![
                SyncPhase::Idle,
                SyncPhase::LockAcquired,
                SyncPhase::BatchLoaded,
                SyncPhase::IncrementalPlan,
                SyncPhase::RowsDeleted,
                SyncPhase::ColumnsAdded,
                SyncPhase::CapacityEnsured,
                SyncPhase::RowsAppended,
                SyncPhase::LockReleased,
                SyncPhase::Succeeded,
            ]
        );
    }

    #[test]
    fn empty_store_trace_shows_the_full_refresh_fallback() {
        let dir = tempdir().unwrap();
        let sync = synchronizer(config_in(dir.path()));
        let store = InMemoryStore::new();
        sync.run(&store, &batch()).unwrap();
        assert_eq!(
            sync.last_trace(),
            vec![
                SyncPhase::Idle,
                SyncPhase::LockAcquired,
                SyncPhase::BatchLoaded,
                SyncPhase::FullRefresh,
                SyncPhase::LockReleased,
                SyncPhase::Succeeded,
            ]
        );
    }

    #[test]
    fn lock_is_released_after_failure() {
        let dir = tempdir().unwrap();
        let sync = synchronizer(config_in(dir.path()));
        let store = InMemoryStore::new();
        store.fail_next(StoreOp::ReadSnapshot, StoreError::with_code(403, "forbidden"));

        assert!(sync.run(&store, &batch()).is_err());
        let key = LockKey::for_target(&sync.config().target);
        assert!(!sync.locks().lock_path(&key).exists());
        assert_eq!(
            sync.last_trace(),
            vec![
                SyncPhase::Idle,
                SyncPhase::LockAcquired,
                SyncPhase::BatchLoaded,
                SyncPhase::LockReleased,
                SyncPhase::Failed,
            ]
        );
    }

    #[test]
    fn held_lock_blocks_the_run_without_touching_the_store() {
        let dir = tempdir().unwrap();
        let sync = synchronizer(config_in(dir.path()));
        let key = LockKey::for_target(&sync.config().target);
        let _held = sync.locks().acquire(&key).unwrap();

        let store = InMemoryStore::new();
        let err = sync.run(&store, &batch()).unwrap_err();
        assert!(matches!(err, SyncError::LockContention { .. }), "{err}");
        assert!(store.calls().is_empty());
    }

    #[test]
    fn dry_run_takes_no_lock() {
        let dir = tempdir().unwrap();
        let sync = synchronizer(SyncConfig {
            dry_run: true,
            ..config_in(dir.path())
        });
        let key = LockKey::for_target(&sync.config().target);
        let _held = sync.locks().acquire(&key).unwrap();

        let store = InMemoryStore::new();
        let stats = sync.run(&store, &batch()).unwrap();
        assert!(stats.dry_run);
        assert!(store.mutating_calls().is_empty());
        assert!(!sync.last_trace().contains(&SyncPhase::LockAcquired));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = Synchronizer::new(SyncConfig {
            capacity_increment: 0,
            ..SyncConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
    }

    #[test]
    fn phases_display_in_snake_case() {
        assert_eq!(SyncPhase::CapacityEnsured.to_string(), "capacity_ensured");
        assert_eq!(SyncPhase::LockReleased.to_string(), "lock_released");
    }
}
