use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub use crate::types::{CellText, FieldName, NormalizedDate};

/// Open mapping from field name to a dynamically-typed value.
///
/// `Value` is the tagged variant {Null, Bool, Number, String, Array, Object};
/// field order follows the input document.
pub type Record = serde_json::Map<FieldName, Value>;

/// Grid of typed cells prepared for writing.
pub type Grid = Vec<Vec<Cell>>;

/// Grid of formatted cell text as read back from a store.
pub type TextGrid = Vec<Vec<CellText>>;

/// Store-safe representation of one cell.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    /// Blank cell.
    #[default]
    Empty,
    /// Boolean cell.
    Bool(bool),
    /// Numeric cell.
    Number(Number),
    /// Text cell (may still be interpreted as a date by the store).
    Text(String),
}

impl Cell {
    /// Text the store would display for this cell.
    pub fn display_text(&self) -> CellText {
        match self {
            Cell::Empty => String::new(),
            Cell::Bool(true) => "TRUE".to_string(),
            Cell::Bool(false) => "FALSE".to_string(),
            Cell::Number(number) => number.to_string(),
            Cell::Text(text) => text.clone(),
        }
    }

    /// True for blank cells and whitespace-only text.
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(text) => text.trim().is_empty(),
            Cell::Bool(_) | Cell::Number(_) => false,
        }
    }
}

/// How the store should interpret appended text cells.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputMode {
    /// Store text literally.
    Raw,
    /// Let the store parse date-shaped and numeric text as it would typed input.
    #[default]
    UserEntered,
}

/// Identity of one point-in-time read of the store.
///
/// Row positions are only meaningful inside the snapshot they were read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SnapshotId(u64);

static NEXT_SNAPSHOT_ID: AtomicU64 = AtomicU64::new(1);

impl SnapshotId {
    /// Allocate a fresh, process-unique snapshot id.
    pub fn next() -> Self {
        Self(NEXT_SNAPSHOT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "snapshot#{}", self.0)
    }
}

/// Formatted store grid tagged with the snapshot it was read as.
#[derive(Clone, Debug)]
pub struct Snapshot {
    /// Snapshot identity.
    pub id: SnapshotId,
    /// Rows as read, header row first.
    pub rows: TextGrid,
}

impl Snapshot {
    /// Tag a freshly read grid with a new snapshot id.
    pub fn new(rows: TextGrid) -> Self {
        Self {
            id: SnapshotId::next(),
            rows,
        }
    }

    /// True when the store holds no rows at all.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Header row with trailing blank cells removed.
    pub fn headers(&self) -> Vec<FieldName> {
        let mut headers: Vec<FieldName> = self
            .rows
            .first()
            .map(|row| row.iter().map(|cell| cell.trim().to_string()).collect())
            .unwrap_or_default();
        while headers.last().is_some_and(|header| header.is_empty()) {
            headers.pop();
        }
        headers
    }

    /// Number of rows below the header.
    pub fn data_row_count(&self) -> usize {
        self.rows.len().saturating_sub(1)
    }
}

/// A record read back from the store with its 1-based row position.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredRow {
    /// Snapshot the position belongs to.
    pub snapshot: SnapshotId,
    /// 1-based row position (the header is row 1).
    pub position: usize,
    /// Cell text keyed by header.
    pub record: Record,
}

/// Inclusive interval of 1-based row positions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowRange {
    /// First row (inclusive).
    pub start: usize,
    /// Last row (inclusive).
    pub end: usize,
}

impl RowRange {
    /// Range covering `start..=end`.
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Number of rows covered.
    pub fn len(&self) -> usize {
        self.end + 1 - self.start
    }

    /// Always false; a range covers at least one row.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// True if `position` falls inside the range.
    pub fn contains(&self, position: usize) -> bool {
        (self.start..=self.end).contains(&position)
    }

    /// 0-based half-open `(start_index, end_index)` used at the transport boundary.
    pub fn to_dimension_span(&self) -> (usize, usize) {
        (self.start - 1, self.end)
    }

    /// Inverse of [`RowRange::to_dimension_span`]; `None` for empty spans.
    pub fn from_dimension_span(start_index: usize, end_index: usize) -> Option<Self> {
        (end_index > start_index).then(|| Self::new(start_index + 1, end_index))
    }
}

impl fmt::Display for RowRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Row ranges to delete, all computed from one snapshot, in descending order.
///
/// Each deletion shifts every row below it, so the plan is consumed when it
/// is executed and its positions are never reused afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeletionPlan {
    snapshot: SnapshotId,
    ranges: Vec<RowRange>,
}

impl DeletionPlan {
    /// Plan for `ranges`, which must already be disjoint and descending.
    pub fn new(snapshot: SnapshotId, ranges: Vec<RowRange>) -> Self {
        debug_assert!(
            ranges.windows(2).all(|pair| pair[0].start > pair[1].end),
            "deletion ranges must be disjoint and descending"
        );
        Self { snapshot, ranges }
    }

    /// Snapshot the ranges were computed against.
    pub fn snapshot(&self) -> SnapshotId {
        self.snapshot
    }

    /// Ranges in execution order (descending).
    pub fn ranges(&self) -> &[RowRange] {
        &self.ranges
    }

    /// Total rows covered.
    pub fn row_count(&self) -> usize {
        self.ranges.iter().map(RowRange::len).sum()
    }

    /// True when nothing needs deleting.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Consume the plan, yielding ranges in execution order.
    pub fn into_ranges(self) -> Vec<RowRange> {
        self.ranges
    }
}

/// Outcome statistics of a (possibly dry) sync.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WriteStats {
    /// Data rows in the store after the operation.
    pub total_records: usize,
    /// Records appended from the batch.
    pub new_records: usize,
    /// Always zero; rows are replaced by delete-and-append, never edited.
    pub updated_records: usize,
    /// Stale rows removed.
    pub deleted_records: usize,
    /// Columns introduced by this batch, in header order.
    pub new_columns: Vec<FieldName>,
    /// True when nothing was written.
    pub dry_run: bool,
    /// Ranges whose deletion failed under the `Continue` policy.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_deletions: Vec<RowRange>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_display_text_matches_store_rendering() {
        assert_eq!(Cell::Empty.display_text(), "");
        assert_eq!(Cell::Bool(true).display_text(), "TRUE");
        assert_eq!(Cell::Number(Number::from(42)).display_text(), "42");
        assert_eq!(Cell::Text("x".into()).display_text(), "x");
        assert!(Cell::Text("  ".into()).is_blank());
        assert!(!Cell::Bool(false).is_blank());
    }

    #[test]
    fn cells_serialize_untagged() {
        let row = vec![
            Cell::Empty,
            Cell::Bool(false),
            Cell::Number(Number::from(7)),
            Cell::Text("a".into()),
        ];
        let encoded = serde_json::to_string(&row).unwrap();
        assert_eq!(encoded, r#"[null,false,7,"a"]"#);
        let decoded: Vec<Cell> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, row);
    }

    #[test]
    fn row_range_translates_to_zero_based_half_open_span() {
        let range = RowRange::new(5, 7);
        assert_eq!(range.len(), 3);
        assert_eq!(range.to_dimension_span(), (4, 7));
        assert_eq!(RowRange::from_dimension_span(4, 7), Some(range));
        assert_eq!(RowRange::from_dimension_span(4, 4), None);
        assert!(range.contains(6));
        assert!(!range.contains(8));
    }

    #[test]
    fn snapshot_headers_drop_trailing_blanks() {
        let snapshot = Snapshot::new(vec![
            vec!["date".into(), " name ".into(), "".into(), " ".into()],
            vec!["2024-01-01".into(), "a".into()],
        ]);
        assert_eq!(snapshot.headers(), vec!["date", "name"]);
        assert_eq!(snapshot.data_row_count(), 1);
        assert!(!snapshot.is_empty());
    }

    #[test]
    fn snapshot_ids_are_unique() {
        let a = Snapshot::new(Vec::new());
        let b = Snapshot::new(Vec::new());
        assert_ne!(a.id, b.id);
        assert!(a.is_empty());
    }

    #[test]
    fn deletion_plan_counts_rows_and_consumes() {
        let plan = DeletionPlan::new(
            SnapshotId::next(),
            vec![RowRange::new(10, 10), RowRange::new(5, 7)],
        );
        assert_eq!(plan.row_count(), 4);
        assert!(!plan.is_empty());
        assert_eq!(plan.into_ranges().len(), 2);
    }
}
