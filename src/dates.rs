//! Date-field recognition and calendar-day normalization.
//!
//! Normalized dates are the partition keys of incremental updates, so
//! `normalize_date` must be deterministic and idempotent: anything it returns
//! is already canonical and maps to itself.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};

use crate::constants::schema::{CANONICAL_DATE_FORMAT, DEFAULT_DATE_FIELDS};
use crate::types::{FieldName, NormalizedDate};

/// Date-time layouts without an offset; interpreted on the local calendar.
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%y %H:%M:%S",
    "%m/%d/%y %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Calendar-day layouts accepted by the general parse.
///
/// Two-digit `%y` layouts come before their `%Y` counterparts.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y.%m.%d",
    "%m/%d/%y",
    "%m/%d/%Y",
    "%b %d, %Y",
    "%b %d %Y",
    "%b. %d, %Y",
    "%B %d, %Y",
    "%B %d %Y",
    "%d %b %Y",
    "%d %B %Y",
    "%a, %d %b %Y",
    "%a %b %d %Y",
];

/// Case-insensitive set of field names treated as dates.
///
/// Order is significant: the first listed field present on a record (with a
/// resolvable value) is that record's date partition key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DateFieldSet {
    names: Vec<FieldName>,
}

impl Default for DateFieldSet {
    fn default() -> Self {
        Self::from_names(DEFAULT_DATE_FIELDS.iter().copied())
    }
}

impl DateFieldSet {
    /// Build a set from names (trimmed, lowercased, duplicates and blanks dropped).
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut collected: Vec<FieldName> = Vec::new();
        for name in names {
            let name = name.as_ref().trim().to_ascii_lowercase();
            if name.is_empty() || collected.contains(&name) {
                continue;
            }
            collected.push(name);
        }
        Self { names: collected }
    }

    /// True if `name` is a recognized date field (case-insensitive).
    pub fn is_date_field(&self, name: &str) -> bool {
        let name = name.trim();
        self.names
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(name))
    }

    /// Priority of `name` within the set (lower wins), if it is a date field.
    pub(crate) fn rank(&self, name: &str) -> Option<usize> {
        let name = name.trim();
        self.names
            .iter()
            .position(|candidate| candidate.eq_ignore_ascii_case(name))
    }

    /// Configured names in priority order.
    pub fn names(&self) -> &[FieldName] {
        &self.names
    }

    /// True when no date fields are configured.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Normalize a raw date string to canonical `YYYY-MM-DD`.
///
/// Canonically shaped input that is a valid calendar day is returned as-is;
/// canonically shaped input that is not a valid day is rejected. Anything
/// else goes through the general parse and is formatted from the parsed
/// local calendar day. Returns `None` when nothing parses.
pub fn normalize_date(raw: &str) -> Option<NormalizedDate> {
    if has_canonical_shape(raw) {
        return NaiveDate::parse_from_str(raw, CANONICAL_DATE_FORMAT)
            .ok()
            .map(|_| raw.to_string());
    }
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    parse_general_date(trimmed).map(format_date)
}

/// Normalize a Unix timestamp in milliseconds to its local calendar day.
pub fn normalize_epoch_millis(millis: i64) -> Option<NormalizedDate> {
    Local
        .timestamp_millis_opt(millis)
        .single()
        .map(|instant| format_date(instant.date_naive()))
}

/// Format a calendar day in canonical form.
pub fn format_date(date: NaiveDate) -> NormalizedDate {
    date.format(CANONICAL_DATE_FORMAT).to_string()
}

/// True for exactly four digits, `-`, two digits, `-`, two digits.
fn has_canonical_shape(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(idx, byte)| match idx {
            4 | 7 => *byte == b'-',
            _ => byte.is_ascii_digit(),
        })
}

/// Best-effort parse of common date and date-time layouts.
///
/// Offset-bearing timestamps are converted to the local timezone before the
/// calendar day is taken; naive timestamps are already local.
fn parse_general_date(value: &str) -> Option<NaiveDate> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Some(instant.with_timezone(&Local).date_naive());
    }
    if let Ok(instant) = DateTime::parse_from_rfc2822(value) {
        return Some(instant.with_timezone(&Local).date_naive());
    }
    if let Some(date) = NAIVE_DATETIME_FORMATS
        .iter()
        .filter(|format| year_text_is_full(format, value))
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|datetime| datetime.date())
    {
        return Some(date);
    }
    DATE_FORMATS
        .iter()
        .filter(|format| year_text_is_full(format, value))
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
}

/// `%Y` accepts any digit count; only let it match a value that spells out a
/// four-digit year, so `12/31/99` is never read as year 99.
fn year_text_is_full(format: &str, value: &str) -> bool {
    !format.contains("%Y")
        || value
            .split(|c: char| !c.is_ascii_digit())
            .any(|run| run.len() >= 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_dates_are_returned_unchanged() {
        assert_eq!(normalize_date("2024-01-01").as_deref(), Some("2024-01-01"));
        assert_eq!(normalize_date("2024-02-29").as_deref(), Some("2024-02-29"));
    }

    #[test]
    fn canonical_shape_with_invalid_day_is_rejected() {
        assert_eq!(normalize_date("2024-13-40"), None);
        assert_eq!(normalize_date("2023-02-29"), None);
        assert_eq!(normalize_date("0000-00-00"), None);
    }

    #[test]
    fn general_layouts_normalize_to_canonical_form() {
        assert_eq!(normalize_date("2024/03/05").as_deref(), Some("2024-03-05"));
        assert_eq!(normalize_date("03/05/2024").as_deref(), Some("2024-03-05"));
        assert_eq!(normalize_date("Mar 5, 2024").as_deref(), Some("2024-03-05"));
        assert_eq!(
            normalize_date("March 5, 2024").as_deref(),
            Some("2024-03-05")
        );
        assert_eq!(normalize_date("5 Mar 2024").as_deref(), Some("2024-03-05"));
        assert_eq!(normalize_date("2024-3-5").as_deref(), Some("2024-03-05"));
        assert_eq!(
            normalize_date(" 2024-03-05 ").as_deref(),
            Some("2024-03-05")
        );
    }

    #[test]
    fn naive_timestamps_keep_their_local_calendar_day() {
        assert_eq!(
            normalize_date("2024-03-05T23:59:59").as_deref(),
            Some("2024-03-05")
        );
        assert_eq!(
            normalize_date("2024-03-05 00:00:01.250").as_deref(),
            Some("2024-03-05")
        );
    }

    #[test]
    fn offset_timestamps_use_the_local_calendar_day() {
        let raw = "2024-03-05T12:00:00Z";
        let expected = DateTime::parse_from_rfc3339(raw)
            .unwrap()
            .with_timezone(&Local)
            .date_naive();
        assert_eq!(normalize_date(raw), Some(format_date(expected)));
    }

    #[test]
    fn two_digit_years_map_to_the_current_era() {
        assert_eq!(normalize_date("12/31/99").as_deref(), Some("1999-12-31"));
        assert_eq!(normalize_date("1/2/24").as_deref(), Some("2024-01-02"));
        assert_eq!(
            normalize_date("1/2/24 13:45").as_deref(),
            Some("2024-01-02")
        );
        assert_eq!(normalize_date("12/31/1999").as_deref(), Some("1999-12-31"));
        assert_eq!(normalize_date("Jan 2, 24"), None);
    }

    #[test]
    fn unparseable_values_are_rejected() {
        assert_eq!(normalize_date(""), None);
        assert_eq!(normalize_date("   "), None);
        assert_eq!(normalize_date("not a date"), None);
        assert_eq!(normalize_date("2024-03"), None);
    }

    #[test]
    fn normalization_is_idempotent() {
        let inputs = [
            "2024-01-01",
            "2024/12/31",
            "Feb 29, 2024",
            "2024-06-15T08:30:00",
            "07/04/2021",
            "2024-13-40",
            "garbage",
        ];
        for input in inputs {
            if let Some(first) = normalize_date(input) {
                assert_eq!(normalize_date(&first), Some(first.clone()), "{input}");
            }
        }
    }

    #[test]
    fn epoch_millis_map_to_local_day() {
        let millis = 1_709_640_000_000; // 2024-03-05T12:00:00Z
        let expected = Local.timestamp_millis_opt(millis).unwrap().date_naive();
        assert_eq!(normalize_epoch_millis(millis), Some(format_date(expected)));
    }

    #[test]
    fn date_field_set_is_case_insensitive_and_ordered() {
        let fields = DateFieldSet::from_names(["Report_Date", " date ", "DATE", ""]);
        assert_eq!(fields.names(), &["report_date".to_string(), "date".to_string()]);
        assert!(fields.is_date_field("REPORT_DATE"));
        assert!(fields.is_date_field("Date"));
        assert!(!fields.is_date_field("updated"));
        assert_eq!(fields.rank("date"), Some(1));
        assert!(DateFieldSet::from_names(Vec::<String>::new()).is_empty());
    }

    #[test]
    fn default_date_fields_cover_common_names() {
        let fields = DateFieldSet::default();
        assert!(fields.is_date_field("date"));
        assert!(fields.is_date_field("Created_At"));
        assert!(!fields.is_date_field("name"));
    }
}
