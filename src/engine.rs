//! Reconciliation of a record batch against a store partition.
//!
//! Two write paths:
//! - Full refresh replaces the partition with the batch.
//! - Incremental update deletes rows whose date partition appears in the
//!   batch, grows the header and capacity as needed, then appends the batch.
//!
//! Store calls go through the retry executor on one of two channels. Core
//! reads and writes are fatal: a failure aborts the run. Capacity lookups,
//! capacity growth, and date formatting are advisory: a failure is logged
//! and the run continues.

use tracing::{debug, info, warn};

use crate::config::{DeletionFailurePolicy, SyncConfig, WriteMode};
use crate::constants::store::EMPTY_BATCH_MESSAGE;
use crate::data::{
    Cell, DeletionPlan, Grid, InputMode, Record, RowRange, Snapshot, WriteStats,
};
use crate::errors::{StoreError, SyncError};
use crate::retry::RetryExecutor;
use crate::schema::{
    DatePartitions, ValueMapper, collect_all_fields, column_delta, group_consecutive_ranges,
    merge_columns, rows_to_records,
};
use crate::store::TabularStore;
use crate::sync::SyncPhase;
use crate::types::{FieldName, OperationName};

/// Everything an incremental update will do, computed from one snapshot.
#[derive(Clone, Debug)]
pub struct IncrementalPlan {
    /// Stale row ranges, descending, tagged with the snapshot.
    pub deletions: DeletionPlan,
    /// Header as read from the store.
    pub existing_columns: Vec<FieldName>,
    /// Header after schema evolution.
    pub final_columns: Vec<FieldName>,
    /// Columns to append to the header, in order.
    pub new_columns: Vec<FieldName>,
    /// Rows below the header at snapshot time.
    pub existing_row_count: usize,
    /// Row capacity needed after deletion and append, header included.
    pub required_rows: usize,
    /// Date partitions of the incoming batch.
    pub partitions: DatePartitions,
}

impl IncrementalPlan {
    /// Rows the plan deletes.
    pub fn deleted_row_count(&self) -> usize {
        self.deletions.row_count()
    }
}

/// Applies record batches to one store partition.
pub struct Reconciler<'a, S: TabularStore + ?Sized> {
    store: &'a S,
    mapper: ValueMapper,
    retry: RetryExecutor,
    mode: WriteMode,
    dry_run: bool,
    capacity_increment: usize,
    deletion_failure: DeletionFailurePolicy,
}

impl<'a, S: TabularStore + ?Sized> Reconciler<'a, S> {
    /// Reconciler for `store` configured from `config`.
    pub fn new(store: &'a S, config: &SyncConfig) -> Self {
        Self {
            store,
            mapper: ValueMapper::new(config.date_fields.clone()),
            retry: RetryExecutor::new(config.retry),
            mode: config.mode,
            dry_run: config.dry_run,
            capacity_increment: config.capacity_increment,
            deletion_failure: config.deletion_failure,
        }
    }

    /// Replace the retry executor.
    pub fn with_retry(mut self, retry: RetryExecutor) -> Self {
        self.retry = retry;
        self
    }

    /// Value mapper in use.
    pub fn mapper(&self) -> &ValueMapper {
        &self.mapper
    }

    /// Write `records` using the configured mode.
    pub fn run(&self, records: &[Record]) -> Result<WriteStats, SyncError> {
        self.run_traced(records, &mut Vec::new())
    }

    /// Like [`Reconciler::run`], pushing each phase onto `trace` as it is entered.
    ///
    /// On failure `trace` ends with the last phase that was reached.
    pub fn run_traced(
        &self,
        records: &[Record],
        trace: &mut Vec<SyncPhase>,
    ) -> Result<WriteStats, SyncError> {
        match self.mode {
            WriteMode::FullRefresh => self.full_refresh_traced(records, trace),
            WriteMode::Incremental => self.incremental_update_traced(records, trace),
        }
    }

    /// Replace the partition's contents with `records`.
    pub fn full_refresh(&self, records: &[Record]) -> Result<WriteStats, SyncError> {
        self.full_refresh_traced(records, &mut Vec::new())
    }

    /// Replace the batch's date partitions in the store and append the batch.
    pub fn incremental_update(&self, records: &[Record]) -> Result<WriteStats, SyncError> {
        self.incremental_update_traced(records, &mut Vec::new())
    }

    fn full_refresh_traced(
        &self,
        records: &[Record],
        trace: &mut Vec<SyncPhase>,
    ) -> Result<WriteStats, SyncError> {
        enter(trace, SyncPhase::FullRefresh);
        let columns = collect_all_fields(records);
        let stats = WriteStats {
            total_records: records.len(),
            new_records: records.len(),
            new_columns: columns.clone(),
            dry_run: self.dry_run,
            ..WriteStats::default()
        };
        if self.dry_run {
            info!(
                "[tabsync:engine] dry run: full refresh would write {} records across {} columns",
                records.len(),
                columns.len()
            );
            return Ok(stats);
        }

        if records.is_empty() {
            self.fatal("replace_all", || self.store.replace_all(&Vec::new()))?;
            self.advisory("write_single_cell", || {
                self.store.write_single_cell(EMPTY_BATCH_MESSAGE)
            });
            info!("[tabsync:engine] full refresh cleared the store (empty batch)");
            return Ok(stats);
        }

        let mut grid: Grid = Vec::with_capacity(records.len() + 1);
        grid.push(header_row(&columns));
        grid.extend(self.mapper.records_to_rows(records, &columns));
        self.fatal("replace_all", || self.store.replace_all(&grid))?;
        self.format_date_columns(&columns);
        info!(
            "[tabsync:engine] full refresh wrote {} records across {} columns",
            records.len(),
            columns.len()
        );
        Ok(stats)
    }

    fn incremental_update_traced(
        &self,
        records: &[Record],
        trace: &mut Vec<SyncPhase>,
    ) -> Result<WriteStats, SyncError> {
        let snapshot = Snapshot::new(self.fatal("read_snapshot", || self.store.read_snapshot())?);
        if records.is_empty() {
            info!("[tabsync:engine] empty batch; store left unchanged");
            return Ok(WriteStats {
                total_records: snapshot.data_row_count(),
                dry_run: self.dry_run,
                ..WriteStats::default()
            });
        }
        if snapshot.headers().is_empty() {
            info!("[tabsync:engine] store is empty; falling back to full refresh");
            return self.full_refresh_traced(records, trace);
        }

        enter(trace, SyncPhase::IncrementalPlan);
        debug!("[tabsync:engine] planning against {}", snapshot.id);
        let plan = self.plan_incremental(&snapshot, records);
        info!(
            "[tabsync:engine] plan: partitions={} delete_rows={} ranges={} new_columns={:?} append={}",
            plan.partitions.keys.len(),
            plan.deleted_row_count(),
            plan.deletions.ranges().len(),
            plan.new_columns,
            records.len()
        );

        if self.dry_run {
            return Ok(self.dry_run_stats(&plan, records));
        }

        let IncrementalPlan {
            deletions,
            existing_columns,
            final_columns,
            new_columns,
            existing_row_count,
            ..
        } = plan;

        let (deleted, failed_deletions) = self.execute_deletions(deletions)?;
        enter(trace, SyncPhase::RowsDeleted);

        if !new_columns.is_empty() {
            self.fatal("append_columns", || {
                self.store
                    .append_columns(&new_columns, existing_columns.len())
            })?;
        }
        enter(trace, SyncPhase::ColumnsAdded);

        let remaining = existing_row_count.saturating_sub(deleted);
        self.ensure_capacity(remaining + records.len() + 1);
        enter(trace, SyncPhase::CapacityEnsured);

        let rows = self.mapper.records_to_rows(records, &final_columns);
        self.fatal("append_rows", || {
            self.store.append_rows(&rows, InputMode::UserEntered)
        })?;
        self.format_date_columns(&final_columns);
        enter(trace, SyncPhase::RowsAppended);

        let stats = WriteStats {
            total_records: remaining + records.len(),
            new_records: records.len(),
            updated_records: 0,
            deleted_records: deleted,
            new_columns,
            dry_run: false,
            failed_deletions,
        };
        info!(
            "[tabsync:engine] incremental update done: total={} new={} deleted={} new_columns={}",
            stats.total_records,
            stats.new_records,
            stats.deleted_records,
            stats.new_columns.len()
        );
        Ok(stats)
    }

    /// Compute the incremental plan for `records` against `snapshot` (no I/O).
    pub fn plan_incremental(&self, snapshot: &Snapshot, records: &[Record]) -> IncrementalPlan {
        let existing_columns = snapshot.headers();
        let stored = rows_to_records(snapshot, &existing_columns);
        let partitions = self.mapper.extract_date_partitions(records);
        if partitions.is_unresolved() {
            warn!(
                "[tabsync:engine] none of the {} incoming records has a resolvable date field ({:?}); existing rows will not be replaced, only appended to",
                records.len(),
                self.mapper.date_fields().names()
            );
        } else if partitions.undated_records > 0 {
            debug!(
                "[tabsync:engine] {} incoming records have no resolvable date",
                partitions.undated_records
            );
        }

        let stale_positions: Vec<usize> = stored
            .iter()
            .filter(|row| {
                self.mapper
                    .date_partition_key(&row.record)
                    .is_some_and(|key| partitions.contains(&key))
            })
            .map(|row| row.position)
            .collect();
        let deletions = DeletionPlan::new(snapshot.id, group_consecutive_ranges(&stale_positions));

        let final_columns = merge_columns(&existing_columns, &collect_all_fields(records));
        let new_columns = column_delta(&existing_columns, &final_columns);
        let existing_row_count = snapshot.data_row_count();
        let required_rows =
            existing_row_count.saturating_sub(deletions.row_count()) + records.len() + 1;

        IncrementalPlan {
            deletions,
            existing_columns,
            final_columns,
            new_columns,
            existing_row_count,
            required_rows,
            partitions,
        }
    }

    fn dry_run_stats(&self, plan: &IncrementalPlan, records: &[Record]) -> WriteStats {
        let available = self.advisory("available_row_count", || {
            self.store.available_row_count()
        });
        if let Some(available) = available.filter(|&rows| needs_growth(rows, plan.required_rows)) {
            info!(
                "[tabsync:engine] dry run: capacity {} < required {}; would grow",
                available, plan.required_rows
            );
        }
        let deleted = plan.deleted_row_count();
        WriteStats {
            total_records: plan.existing_row_count.saturating_sub(deleted) + records.len(),
            new_records: records.len(),
            updated_records: 0,
            deleted_records: deleted,
            new_columns: plan.new_columns.clone(),
            dry_run: true,
            failed_deletions: Vec::new(),
        }
    }

    /// Delete plan ranges one at a time, highest rows first.
    ///
    /// Returns the rows deleted and the ranges that failed under
    /// [`DeletionFailurePolicy::Continue`].
    fn execute_deletions(
        &self,
        plan: DeletionPlan,
    ) -> Result<(usize, Vec<RowRange>), SyncError> {
        let snapshot = plan.snapshot();
        let mut deleted = 0usize;
        let mut failed = Vec::new();
        for range in plan.into_ranges() {
            match self.fatal("delete_row_range", || self.store.delete_row_range(range)) {
                Ok(()) => {
                    debug!(
                        "[tabsync:engine] deleted rows {} from {}",
                        range, snapshot
                    );
                    deleted += range.len();
                }
                Err(err) => match self.deletion_failure {
                    DeletionFailurePolicy::Abort => {
                        warn!(
                            "[tabsync:engine] deleting rows {} failed; aborting before append ({} rows already deleted)",
                            range, deleted
                        );
                        return Err(err);
                    }
                    DeletionFailurePolicy::Continue => {
                        warn!(
                            "[tabsync:engine] deleting rows {} failed: {}; continuing, stale rows remain",
                            range, err
                        );
                        failed.push(range);
                    }
                },
            }
        }
        Ok((deleted, failed))
    }

    fn ensure_capacity(&self, required_rows: usize) {
        let Some(available) =
            self.advisory("available_row_count", || self.store.available_row_count())
        else {
            return;
        };
        if !needs_growth(available, required_rows) {
            return;
        }
        let extra = self
            .capacity_increment
            .max(required_rows.saturating_sub(available));
        info!(
            "[tabsync:engine] growing capacity by {} rows (available={} required={})",
            extra, available, required_rows
        );
        self.advisory("grow_capacity", || self.store.grow_capacity(extra));
    }

    fn format_date_columns(&self, columns: &[FieldName]) {
        let indices = self.mapper.date_column_indices(columns);
        if indices.is_empty() {
            return;
        }
        self.advisory("format_as_date", || self.store.format_as_date(&indices));
    }

    fn fatal<T>(
        &self,
        operation: OperationName,
        call: impl FnMut() -> Result<T, StoreError>,
    ) -> Result<T, SyncError> {
        self.retry.run(operation, call)
    }

    fn advisory<T>(
        &self,
        operation: OperationName,
        call: impl FnMut() -> Result<T, StoreError>,
    ) -> Option<T> {
        match self.retry.run(operation, call) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!("[tabsync:engine] advisory {} failed: {}", operation, err);
                None
            }
        }
    }
}

fn enter(trace: &mut Vec<SyncPhase>, phase: SyncPhase) {
    debug!("[tabsync:engine] phase={}", phase);
    trace.push(phase);
}

fn header_row(columns: &[FieldName]) -> Vec<Cell> {
    columns
        .iter()
        .map(|column| Cell::Text(column.clone()))
        .collect()
}

/// True when `available` rows cannot hold `required` (or the store reports none).
fn needs_growth(available: usize, required: usize) -> bool {
    available == 0 || available < required
}
