//! Schema inference and value mapping between records and store rows.
//!
//! Column sets only ever grow: existing columns keep their position and new
//! fields are appended at the end. Cell coercion is a single match over the
//! JSON value variant.

use indexmap::IndexSet;
use serde_json::Value;
use std::collections::BTreeSet;

use crate::constants::schema::BOOKKEEPING_FIELDS;
use crate::constants::store::TEXT_FORCING_MARKER;
use crate::data::{Cell, Grid, Record, RowRange, Snapshot, StoredRow};
use crate::dates::{DateFieldSet, normalize_date, normalize_epoch_millis};
use crate::types::{FieldName, NormalizedDate};

/// Union of field names across `records`, first-seen order, bookkeeping keys excluded.
pub fn collect_all_fields(records: &[Record]) -> Vec<FieldName> {
    let mut fields: IndexSet<&str> = IndexSet::new();
    for record in records {
        for key in record.keys() {
            if !is_bookkeeping_field(key) {
                fields.insert(key.as_str());
            }
        }
    }
    fields.into_iter().map(str::to_string).collect()
}

/// Keep `existing` in place and append every unseen `incoming` field.
pub fn merge_columns(existing: &[FieldName], incoming: &[FieldName]) -> Vec<FieldName> {
    let mut merged = existing.to_vec();
    let mut seen: IndexSet<&str> = existing.iter().map(String::as_str).collect();
    for field in incoming {
        if seen.insert(field.as_str()) {
            merged.push(field.clone());
        }
    }
    merged
}

/// Columns of `merged` that are not in `existing`, in order.
pub fn column_delta(existing: &[FieldName], merged: &[FieldName]) -> Vec<FieldName> {
    merged
        .iter()
        .filter(|column| !existing.contains(column))
        .cloned()
        .collect()
}

/// Coalesce row positions into the fewest descending, disjoint ranges.
///
/// Duplicates are ignored. `[5, 6, 7, 10]` yields `[10..=10, 5..=7]`.
pub fn group_consecutive_ranges(positions: &[usize]) -> Vec<RowRange> {
    let mut sorted = positions.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    sorted.dedup();

    let mut ranges: Vec<RowRange> = Vec::new();
    for position in sorted {
        match ranges.last_mut() {
            Some(current) if current.start == position + 1 => current.start = position,
            _ => ranges.push(RowRange::new(position, position)),
        }
    }
    ranges
}

/// Reconstruct stored rows from a snapshot using `headers` as the column set.
///
/// Skips the header row and rows whose cells are all blank. Missing cells
/// become empty strings and one leading text-forcing marker is stripped.
pub fn rows_to_records(snapshot: &Snapshot, headers: &[FieldName]) -> Vec<StoredRow> {
    snapshot
        .rows
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(_, row)| row.iter().any(|cell| !cell.trim().is_empty()))
        .map(|(idx, row)| {
            let record = headers
                .iter()
                .enumerate()
                .map(|(col, header)| {
                    let raw = row.get(col).map(String::as_str).unwrap_or("");
                    let text = raw.strip_prefix(TEXT_FORCING_MARKER).unwrap_or(raw);
                    (header.clone(), Value::String(text.to_string()))
                })
                .collect::<Record>();
            StoredRow {
                snapshot: snapshot.id,
                position: idx + 1,
                record,
            }
        })
        .collect()
}

fn is_bookkeeping_field(name: &str) -> bool {
    BOOKKEEPING_FIELDS.contains(&name)
}

/// Date partitions found in a batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DatePartitions {
    /// Distinct normalized partition keys, ascending.
    pub keys: BTreeSet<NormalizedDate>,
    /// Records without a resolvable partition key.
    pub undated_records: usize,
    /// Records inspected.
    pub total_records: usize,
}

impl DatePartitions {
    /// True when a non-empty batch has no resolvable date at all.
    ///
    /// Incremental updates then cannot find superseded rows and only append.
    pub fn is_unresolved(&self) -> bool {
        self.total_records > 0 && self.keys.is_empty()
    }

    /// True if `key` is one of the batch partitions.
    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }
}

/// Value coercion and date-partition logic bound to one date-field configuration.
#[derive(Clone, Debug, Default)]
pub struct ValueMapper {
    date_fields: DateFieldSet,
}

impl ValueMapper {
    /// Create a mapper recognizing `date_fields` as dates.
    pub fn new(date_fields: DateFieldSet) -> Self {
        Self { date_fields }
    }

    /// Configured date fields.
    pub fn date_fields(&self) -> &DateFieldSet {
        &self.date_fields
    }

    /// True if `name` is a recognized date field.
    pub fn is_date_field(&self, name: &str) -> bool {
        self.date_fields.is_date_field(name)
    }

    /// Coerce one field value into a store-safe cell.
    ///
    /// Precedence: null/empty, date field, array/object, number, boolean, text.
    pub fn process_field_value(&self, value: &Value, column: &str) -> Cell {
        match value {
            Value::Null => Cell::Empty,
            Value::String(text) if text.is_empty() => Cell::Empty,
            _ if self.is_date_field(column) => date_cell(value),
            Value::Array(_) | Value::Object(_) => Cell::Text(value.to_string()),
            Value::Number(number) => Cell::Number(number.clone()),
            Value::Bool(flag) => Cell::Bool(*flag),
            Value::String(text) => Cell::Text(text.clone()),
        }
    }

    /// Project each record onto `columns`, coercing values; missing fields are blank.
    pub fn records_to_rows(&self, records: &[Record], columns: &[FieldName]) -> Grid {
        records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|column| match record.get(column) {
                        Some(value) => self.process_field_value(value, column),
                        None => Cell::Empty,
                    })
                    .collect()
            })
            .collect()
    }

    /// Indices (0-based) of `columns` that are date fields.
    pub fn date_column_indices(&self, columns: &[FieldName]) -> Vec<usize> {
        columns
            .iter()
            .enumerate()
            .filter(|(_, column)| self.is_date_field(column))
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Normalized partition key of `record`.
    ///
    /// Date fields are tried in configured priority order; the first one with
    /// a resolvable value wins.
    pub fn date_partition_key(&self, record: &Record) -> Option<NormalizedDate> {
        let mut candidates: Vec<(usize, &Value)> = record
            .iter()
            .filter_map(|(name, value)| self.date_fields.rank(name).map(|rank| (rank, value)))
            .collect();
        candidates.sort_by_key(|(rank, _)| *rank);
        candidates
            .into_iter()
            .find_map(|(_, value)| partition_value(value))
    }

    /// Collect the distinct partition keys of a batch.
    pub fn extract_date_partitions(&self, records: &[Record]) -> DatePartitions {
        let mut partitions = DatePartitions {
            total_records: records.len(),
            ..DatePartitions::default()
        };
        for record in records {
            match self.date_partition_key(record) {
                Some(key) => {
                    partitions.keys.insert(key);
                }
                None => partitions.undated_records += 1,
            }
        }
        partitions
    }
}

fn date_cell(value: &Value) -> Cell {
    match partition_value(value) {
        Some(date) => Cell::Text(date),
        None => Cell::Text(raw_text(value)),
    }
}

fn partition_value(value: &Value) -> Option<NormalizedDate> {
    match value {
        Value::String(text) => normalize_date(text),
        Value::Number(number) => number.as_i64().and_then(normalize_epoch_millis),
        Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_) => None,
    }
}

fn raw_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
