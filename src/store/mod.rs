//! Tabular store contract consumed by the reconciliation engine.
//!
//! Ownership model:
//! - `TabularStore` is the engine-facing interface over one store partition.
//! - `GridState` holds the pure grid semantics shared by local stores.
//! - `InMemoryStore` and `FileGridStore` wrap `GridState` in memory or on disk.
//!
//! Row positions are 1-based with the header in row 1. Every call is scoped
//! narrowly enough that retrying it after an ambiguous failure cannot corrupt
//! state beyond what one successful call would have done.

use crate::data::{Grid, InputMode, RowRange, TextGrid};
use crate::errors::StoreError;
use crate::types::FieldName;

/// Pure grid semantics shared by the local store implementations.
pub mod grid;
/// In-memory store with call logging and failure injection.
pub mod memory;
/// Store persisted to a local JSON file.
pub mod file;

pub use file::FileGridStore;
pub use grid::GridState;
pub use memory::{InMemoryStore, StoreCall, StoreOp};

/// Engine-facing interface over one store partition.
pub trait TabularStore: Send + Sync {
    /// Read every row within the partition's dimensions as formatted text.
    fn read_snapshot(&self) -> Result<TextGrid, StoreError>;
    /// Replace the partition's entire contents with `grid`.
    fn replace_all(&self, grid: &Grid) -> Result<(), StoreError>;
    /// Delete the rows in `range`.
    ///
    /// Every row below the range moves up by `range.len()`; positions read
    /// from the same snapshot below `range.start` are stale afterwards.
    fn delete_row_range(&self, range: RowRange) -> Result<(), StoreError>;
    /// Write `names` into the header row starting at 0-based column `after_index`.
    fn append_columns(&self, names: &[FieldName], after_index: usize) -> Result<(), StoreError>;
    /// Append `grid` after the last row, inserting rows as needed.
    fn append_rows(&self, grid: &Grid, mode: InputMode) -> Result<(), StoreError>;
    /// Add `extra_rows` empty rows of capacity.
    fn grow_capacity(&self, extra_rows: usize) -> Result<(), StoreError>;
    /// Row capacity currently available in the partition.
    fn available_row_count(&self) -> Result<usize, StoreError>;
    /// Apply calendar-date formatting to the 0-based `columns`.
    fn format_as_date(&self, columns: &[usize]) -> Result<(), StoreError>;
    /// Write a single status message outside the data region.
    fn write_single_cell(&self, text: &str) -> Result<(), StoreError>;
}

/// Column label for a 1-based column index: 1 → `A`, 26 → `Z`, 27 → `AA`.
///
/// Index 0 has no label and yields an empty string.
pub fn column_label(index: usize) -> String {
    let mut remaining = index;
    let mut label = Vec::new();
    while remaining > 0 {
        let offset = (remaining - 1) % 26;
        label.push(b'A' + offset as u8);
        remaining = (remaining - 1) / 26;
    }
    label.reverse();
    String::from_utf8(label).unwrap_or_default()
}

/// A1-style notation for a 1-based row and column.
pub fn cell_reference(row: usize, column: usize) -> String {
    format!("{}{}", column_label(column), row)
}
