/// Name of a record field, and of the store column it maps to.
/// Examples: `date`, `campaign`, `spend_usd`
pub type FieldName = String;
/// Canonical calendar-day string produced by date normalization.
/// Example: `2024-01-01`
pub type NormalizedDate = String;
/// Display text of a single stored cell as read back from the store.
/// Examples: `2024-01-01`, `42`, `TRUE`, `{"a":1}`
pub type CellText = String;
/// Identifier of the target store (for example a spreadsheet id).
/// Examples: `local`, `1AbCdEfG`
pub type StoreId = String;
/// Name of the partition (sheet) inside the target store.
/// Examples: `Sheet1`, `daily_metrics`
pub type SheetName = String;
/// Identity recorded in a lock file for the process holding it.
/// Example: `tabsync-pid-4242`
pub type HolderId = String;
/// Short label naming a store operation in logs and errors.
/// Examples: `read_snapshot`, `delete_row_range`
pub type OperationName = &'static str;
