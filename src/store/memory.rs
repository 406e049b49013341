use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use crate::data::{Grid, InputMode, RowRange, TextGrid};
use crate::errors::StoreError;
use crate::store::TabularStore;
use crate::store::grid::GridState;
use crate::types::FieldName;

/// Store operation kinds, used to script failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// Snapshot read.
    ReadSnapshot,
    /// Whole-partition replacement.
    ReplaceAll,
    /// Row range deletion.
    DeleteRowRange,
    /// Header extension.
    AppendColumns,
    /// Row append.
    AppendRows,
    /// Capacity growth.
    GrowCapacity,
    /// Capacity lookup.
    AvailableRowCount,
    /// Date formatting.
    FormatAsDate,
    /// Status message write.
    WriteSingleCell,
}

impl StoreOp {
    /// True for operations that change store contents or metadata.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, StoreOp::ReadSnapshot | StoreOp::AvailableRowCount)
    }
}

/// One recorded store call, including calls that failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreCall {
    /// Snapshot read.
    ReadSnapshot,
    /// Whole-partition replacement.
    ReplaceAll {
        /// Rows in the replacement grid, header included.
        rows: usize,
    },
    /// Row range deletion.
    DeleteRowRange(RowRange),
    /// Header extension.
    AppendColumns {
        /// Header names written.
        names: Vec<FieldName>,
        /// 0-based column the names start at.
        after_index: usize,
    },
    /// Row append.
    AppendRows {
        /// Rows appended.
        rows: usize,
        /// Interpretation mode requested.
        mode: InputMode,
    },
    /// Capacity growth.
    GrowCapacity(usize),
    /// Capacity lookup.
    AvailableRowCount,
    /// Date formatting.
    FormatAsDate(Vec<usize>),
    /// Status message write.
    WriteSingleCell(String),
}

impl StoreCall {
    /// Operation kind of this call.
    pub fn op(&self) -> StoreOp {
        match self {
            StoreCall::ReadSnapshot => StoreOp::ReadSnapshot,
            StoreCall::ReplaceAll { .. } => StoreOp::ReplaceAll,
            StoreCall::DeleteRowRange(_) => StoreOp::DeleteRowRange,
            StoreCall::AppendColumns { .. } => StoreOp::AppendColumns,
            StoreCall::AppendRows { .. } => StoreOp::AppendRows,
            StoreCall::GrowCapacity(_) => StoreOp::GrowCapacity,
            StoreCall::AvailableRowCount => StoreOp::AvailableRowCount,
            StoreCall::FormatAsDate(_) => StoreOp::FormatAsDate,
            StoreCall::WriteSingleCell(_) => StoreOp::WriteSingleCell,
        }
    }

    /// True if the call changes store state.
    pub fn is_mutating(&self) -> bool {
        self.op().is_mutating()
    }
}

/// Store held in memory.
///
/// Records every call and can be scripted to fail specific operations, which
/// makes it the reference fixture for engine tests.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<GridState>,
    calls: Mutex<Vec<StoreCall>>,
    failures: Mutex<HashMap<StoreOp, VecDeque<StoreError>>>,
}

impl InMemoryStore {
    /// Empty store with default capacity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `rows` (header first).
    pub fn with_rows(rows: TextGrid) -> Self {
        let mut state = GridState {
            rows,
            ..GridState::default()
        };
        state.row_capacity = state.row_capacity.max(state.rows.len());
        Self::with_state(state)
    }

    /// Store wrapping an explicit grid state.
    pub fn with_state(state: GridState) -> Self {
        Self {
            state: Mutex::new(state),
            ..Self::default()
        }
    }

    /// Queue `err` to be returned by the next call of `op`.
    ///
    /// Queued errors are consumed one per call, in order.
    pub fn fail_next(&self, op: StoreOp, err: StoreError) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(op)
            .or_default()
            .push_back(err);
    }

    /// Copy of the current grid state.
    pub fn state(&self) -> GridState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Calls that changed (or attempted to change) store state.
    pub fn mutating_calls(&self) -> Vec<StoreCall> {
        self.calls()
            .into_iter()
            .filter(StoreCall::is_mutating)
            .collect()
    }

    fn record(&self, call: StoreCall) -> Result<(), StoreError> {
        let op = call.op();
        self.calls
            .lock()
            .map_err(|_| StoreError::new("call log poisoned"))?
            .push(call);
        let scripted = self
            .failures
            .lock()
            .map_err(|_| StoreError::new("failure script poisoned"))?
            .get_mut(&op)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn with_grid<T>(&self, apply: impl FnOnce(&mut GridState) -> T) -> Result<T, StoreError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| StoreError::new("grid state poisoned"))?;
        Ok(apply(&mut state))
    }
}

impl TabularStore for InMemoryStore {
    fn read_snapshot(&self) -> Result<TextGrid, StoreError> {
        self.record(StoreCall::ReadSnapshot)?;
        self.with_grid(|state| state.snapshot())
    }

    fn replace_all(&self, grid: &Grid) -> Result<(), StoreError> {
        self.record(StoreCall::ReplaceAll { rows: grid.len() })?;
        self.with_grid(|state| state.replace_all(grid))
    }

    fn delete_row_range(&self, range: RowRange) -> Result<(), StoreError> {
        self.record(StoreCall::DeleteRowRange(range))?;
        self.with_grid(|state| {
            state.delete_rows(range);
        })
    }

    fn append_columns(&self, names: &[FieldName], after_index: usize) -> Result<(), StoreError> {
        self.record(StoreCall::AppendColumns {
            names: names.to_vec(),
            after_index,
        })?;
        self.with_grid(|state| state.append_columns(names, after_index))
    }

    fn append_rows(&self, grid: &Grid, mode: InputMode) -> Result<(), StoreError> {
        self.record(StoreCall::AppendRows {
            rows: grid.len(),
            mode,
        })?;
        self.with_grid(|state| state.append_rows(grid, mode))
    }

    fn grow_capacity(&self, extra_rows: usize) -> Result<(), StoreError> {
        self.record(StoreCall::GrowCapacity(extra_rows))?;
        self.with_grid(|state| state.grow(extra_rows))
    }

    fn available_row_count(&self) -> Result<usize, StoreError> {
        self.record(StoreCall::AvailableRowCount)?;
        self.with_grid(|state| state.row_capacity)
    }

    fn format_as_date(&self, columns: &[usize]) -> Result<(), StoreError> {
        self.record(StoreCall::FormatAsDate(columns.to_vec()))?;
        self.with_grid(|state| state.format_as_date(columns))
    }

    fn write_single_cell(&self, text: &str) -> Result<(), StoreError> {
        self.record(StoreCall::WriteSingleCell(text.to_string()))?;
        self.with_grid(|state| state.write_message(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Cell;

    #[test]
    fn scripted_failures_are_consumed_in_order() {
        let store = InMemoryStore::new();
        store.fail_next(StoreOp::ReadSnapshot, StoreError::with_code(503, "first"));
        store.fail_next(StoreOp::ReadSnapshot, StoreError::with_code(500, "second"));

        assert_eq!(store.read_snapshot().unwrap_err().message, "first");
        assert_eq!(store.read_snapshot().unwrap_err().message, "second");
        assert!(store.read_snapshot().unwrap().is_empty());
        assert_eq!(store.calls().len(), 3);
    }

    #[test]
    fn failed_calls_do_not_mutate_state() {
        let store = InMemoryStore::new();
        store.fail_next(StoreOp::ReplaceAll, StoreError::new("denied"));
        let grid = vec![vec![Cell::Text("a".into())]];
        assert!(store.replace_all(&grid).is_err());
        assert!(store.state().rows.is_empty());
        store.replace_all(&grid).unwrap();
        assert_eq!(store.state().rows, vec![vec!["a".to_string()]]);
    }

    #[test]
    fn poisoned_locks_surface_as_store_errors() {
        let store = std::sync::Arc::new(InMemoryStore::new());
        let poisoner = std::sync::Arc::clone(&store);
        let _ = std::thread::spawn(move || {
            let _held = poisoner.calls.lock().unwrap();
            panic!("poison the call log");
        })
        .join();

        let err = store.read_snapshot().unwrap_err();
        assert!(err.message.contains("poisoned"), "{err}");
        assert!(store.calls().is_empty());
        assert!(store.state().rows.is_empty());
    }

    #[test]
    fn mutating_calls_exclude_reads() {
        let store = InMemoryStore::with_rows(vec![vec!["h".into()]]);
        store.read_snapshot().unwrap();
        store.available_row_count().unwrap();
        store.grow_capacity(5).unwrap();
        assert_eq!(store.mutating_calls(), vec![StoreCall::GrowCapacity(5)]);
    }
}
