#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Command-line front end over the file-backed store.
pub mod cli;
/// Sync configuration types.
pub mod config;
/// Centralized constants for retry, locking, stores, and schema handling.
pub mod constants;
/// Cells, snapshots, row ranges, and write statistics.
pub mod data;
/// Date field detection and normalization.
pub mod dates;
/// Reconciliation of record batches against a store partition.
pub mod engine;
/// Cooperative per-target locking.
pub mod lock;
/// Retry classification and bounded exponential backoff.
pub mod retry;
/// Column evolution and record/row value mapping.
pub mod schema;
/// Tabular store contract and local implementations.
pub mod store;
/// Invocation orchestration.
pub mod sync;
/// Shared type aliases.
pub mod types;

mod errors;

pub use config::{
    DeletionFailurePolicy, LockConfig, RetryPolicy, StoreTarget, SyncConfig, WriteMode,
};
pub use data::{Cell, DeletionPlan, InputMode, Record, RowRange, Snapshot, SnapshotId, WriteStats};
pub use dates::{DateFieldSet, normalize_date};
pub use engine::{IncrementalPlan, Reconciler};
pub use errors::{StoreError, SyncError};
pub use lock::{LockGuard, LockKey, LockManager, LockRecord};
pub use retry::RetryExecutor;
pub use schema::ValueMapper;
pub use store::{FileGridStore, InMemoryStore, TabularStore, column_label};
pub use sync::{SyncPhase, Synchronizer};
pub use types::{FieldName, NormalizedDate, SheetName, StoreId};
