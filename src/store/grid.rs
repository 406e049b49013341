use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::constants::store::{DEFAULT_INITIAL_ROW_CAPACITY, TEXT_FORCING_MARKER};
use crate::data::{Cell, Grid, InputMode, RowRange, TextGrid};
use crate::types::{CellText, FieldName};

/// Contents of one store partition: formatted rows plus grid metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridState {
    /// Rows as displayed, header first.
    pub rows: TextGrid,
    /// Rows the partition can hold before it must grow.
    pub row_capacity: usize,
    /// 0-based columns carrying date formatting.
    #[serde(default)]
    pub date_columns: BTreeSet<usize>,
    /// Status message written outside the data region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Default for GridState {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            row_capacity: DEFAULT_INITIAL_ROW_CAPACITY,
            date_columns: BTreeSet::new(),
            message: None,
        }
    }
}

impl GridState {
    /// Rows as displayed.
    pub fn snapshot(&self) -> TextGrid {
        self.rows.clone()
    }

    /// Replace all rows, keeping formatting.
    pub fn replace_all(&mut self, grid: &Grid) {
        self.rows = grid
            .iter()
            .map(|row| render_row(row, InputMode::UserEntered))
            .collect();
        self.message = None;
        self.fit_capacity();
    }

    /// Delete `range`; positions past the last row are ignored.
    ///
    /// Returns the number of rows actually removed.
    pub fn delete_rows(&mut self, range: RowRange) -> usize {
        if range.start == 0 || range.start > self.rows.len() {
            return 0;
        }
        let end = range.end.min(self.rows.len());
        let removed = self.rows.drain(range.start - 1..end).count();
        self.row_capacity = self.row_capacity.saturating_sub(removed);
        self.fit_capacity();
        removed
    }

    /// Write `names` into the header row from 0-based column `after_index`.
    pub fn append_columns(&mut self, names: &[FieldName], after_index: usize) {
        if names.is_empty() {
            return;
        }
        if self.rows.is_empty() {
            self.rows.push(Vec::new());
            self.fit_capacity();
        }
        let header = &mut self.rows[0];
        let width = after_index + names.len();
        if header.len() < width {
            header.resize(width, String::new());
        }
        for (offset, name) in names.iter().enumerate() {
            header[after_index + offset] = name.clone();
        }
    }

    /// Append rows after the last non-blank row.
    pub fn append_rows(&mut self, grid: &Grid, mode: InputMode) {
        while self
            .rows
            .last()
            .is_some_and(|row| row.iter().all(|cell| cell.trim().is_empty()))
        {
            self.rows.pop();
        }
        self.rows
            .extend(grid.iter().map(|row| render_row(row, mode)));
        self.fit_capacity();
    }

    /// Add `extra_rows` of capacity.
    pub fn grow(&mut self, extra_rows: usize) {
        self.row_capacity = self.row_capacity.saturating_add(extra_rows);
    }

    /// Mark `columns` as date-formatted.
    pub fn format_as_date(&mut self, columns: &[usize]) {
        self.date_columns.extend(columns.iter().copied());
    }

    /// Set the status message.
    pub fn write_message(&mut self, text: &str) {
        self.message = Some(text.to_string());
    }

    fn fit_capacity(&mut self) {
        self.row_capacity = self.row_capacity.max(self.rows.len());
    }
}

fn render_row(row: &[Cell], mode: InputMode) -> Vec<CellText> {
    row.iter().map(|cell| render_cell(cell, mode)).collect()
}

/// Display text the store keeps for `cell` under `mode`.
///
/// User-entered text loses one leading text-forcing marker, as a spreadsheet
/// would; raw text is kept verbatim.
fn render_cell(cell: &Cell, mode: InputMode) -> CellText {
    match (cell, mode) {
        (Cell::Text(text), InputMode::UserEntered) => text
            .strip_prefix(TEXT_FORCING_MARKER)
            .unwrap_or(text)
            .to_string(),
        _ => cell.display_text(),
    }
}
