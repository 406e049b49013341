use std::path::PathBuf;
use std::time::Duration;

use crate::constants::lock::{DEFAULT_LOCK_DIR, DEFAULT_STALE_AFTER};
use crate::constants::retry::{DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES};
use crate::constants::store::{DEFAULT_CAPACITY_INCREMENT, DEFAULT_SHEET, DEFAULT_STORE_ID};
use crate::dates::DateFieldSet;
use crate::errors::SyncError;
use crate::types::{HolderId, SheetName, StoreId};

/// Identity of the store partition a sync writes to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreTarget {
    /// Store identifier (for example a spreadsheet id).
    pub store_id: StoreId,
    /// Partition (sheet) name inside the store.
    pub sheet: SheetName,
}

impl Default for StoreTarget {
    fn default() -> Self {
        Self {
            store_id: DEFAULT_STORE_ID.to_string(),
            sheet: DEFAULT_SHEET.to_string(),
        }
    }
}

impl StoreTarget {
    /// Human-readable `store/sheet` label used in logs and lock records.
    pub fn label(&self) -> String {
        format!("{}/{}", self.store_id, self.sheet)
    }
}

/// How a batch is written into the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace rows whose date partition appears in the batch, then append.
    #[default]
    Incremental,
    /// Replace the whole store with the batch.
    FullRefresh,
}

/// What the engine does when a row-range deletion fails after retries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeletionFailurePolicy {
    /// Stop before appending anything and surface the failure.
    #[default]
    Abort,
    /// Log the failure, keep deleting the remaining ranges, and still append.
    ///
    /// Stale rows for the failed range survive next to the new rows; the
    /// failed ranges are listed in the returned statistics.
    Continue,
}

/// Bounded exponential backoff settings for store calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; also the floor for every delay.
    pub base_delay: Duration,
    /// Ceiling for every delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Validate that the delay bounds are ordered.
    pub fn validated(self) -> Result<Self, SyncError> {
        if self.base_delay > self.max_delay {
            return Err(SyncError::Configuration(
                "retry base delay must not exceed max delay".to_string(),
            ));
        }
        Ok(self)
    }

    /// Total attempts, counting the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Cooperative lock settings.
#[derive(Clone, Debug)]
pub struct LockConfig {
    /// Directory holding lock side files.
    pub dir: PathBuf,
    /// Age after which an existing lock is evicted.
    pub stale_after: Duration,
    /// Identity recorded in lock files written by this process.
    pub holder: HolderId,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_LOCK_DIR),
            stale_after: DEFAULT_STALE_AFTER,
            holder: format!("tabsync-pid-{}", std::process::id()),
        }
    }
}

/// Top-level sync configuration, built once by the caller and passed down.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Store partition to write.
    pub target: StoreTarget,
    /// Full refresh or incremental update.
    pub mode: WriteMode,
    /// Compute and report the plan without mutating the store or the lock.
    pub dry_run: bool,
    /// Field names treated as dates.
    pub date_fields: DateFieldSet,
    /// Backoff used for every store call.
    pub retry: RetryPolicy,
    /// Cooperative lock settings.
    pub lock: LockConfig,
    /// Rows added whenever capacity runs short.
    pub capacity_increment: usize,
    /// Behavior when a row-range deletion fails.
    pub deletion_failure: DeletionFailurePolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            target: StoreTarget::default(),
            mode: WriteMode::default(),
            dry_run: false,
            date_fields: DateFieldSet::default(),
            retry: RetryPolicy::default(),
            lock: LockConfig::default(),
            capacity_increment: DEFAULT_CAPACITY_INCREMENT,
            deletion_failure: DeletionFailurePolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Validate cross-field constraints.
    pub fn validated(self) -> Result<Self, SyncError> {
        self.retry.validated()?;
        if self.capacity_increment == 0 {
            return Err(SyncError::Configuration(
                "capacity increment must be positive".to_string(),
            ));
        }
        if self.target.sheet.trim().is_empty() {
            return Err(SyncError::Configuration(
                "target sheet name must not be empty".to_string(),
            ));
        }
        Ok(self)
    }
}
