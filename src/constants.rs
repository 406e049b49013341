/// Constants used by the retry executor.
pub mod retry {
    use std::time::Duration;

    /// Default number of retries after the first attempt.
    pub const DEFAULT_MAX_RETRIES: u32 = 5;
    /// Default delay before the first retry.
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
    /// Default ceiling for any single retry delay.
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);
    /// Jitter applied to each delay, as a fraction of the un-jittered value.
    pub const JITTER_FRACTION: f64 = 0.25;

    /// Numeric status codes treated as transient (timeout, rate limit, 5xx).
    pub const RETRYABLE_STATUS_CODES: &[u16] = &[408, 429, 500, 502, 503, 504];

    /// Error names treated as transient when found (case-insensitively) in an
    /// error message.
    ///
    /// Covers rate limiting, quota, backend failures, and transport-level
    /// reset/timeout/DNS errors.
    pub const RETRYABLE_ERROR_NAMES: &[&str] = &[
        "RATE_LIMIT_EXCEEDED",
        "rateLimitExceeded",
        "userRateLimitExceeded",
        "quotaExceeded",
        "RESOURCE_EXHAUSTED",
        "INTERNAL",
        "backendError",
        "UNAVAILABLE",
        "DEADLINE_EXCEEDED",
        "ECONNRESET",
        "ETIMEDOUT",
        "ESOCKETTIMEDOUT",
        "ECONNREFUSED",
        "ENOTFOUND",
        "EAI_AGAIN",
        "socket hang up",
    ];
}

/// Constants used by the cooperative lock manager.
pub mod lock {
    use std::time::Duration;

    /// Age after which an existing lock is considered abandoned.
    pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(30 * 60);
    /// Default directory holding lock side files.
    pub const DEFAULT_LOCK_DIR: &str = ".tabsync_locks";
    /// Filename prefix for lock side files.
    pub const LOCK_FILE_PREFIX: &str = "sync-";
    /// Filename extension for lock side files.
    pub const LOCK_FILE_EXTENSION: &str = "lock";
}

/// Constants used by store adapters and the reconciliation engine.
pub mod store {
    /// Rows added whenever the store's capacity is insufficient.
    pub const DEFAULT_CAPACITY_INCREMENT: usize = 5000;
    /// Row capacity of a freshly created store.
    pub const DEFAULT_INITIAL_ROW_CAPACITY: usize = 1000;
    /// Leading character a store uses to force a value to be read as text.
    pub const TEXT_FORCING_MARKER: char = '\'';
    /// Status text written when a full refresh receives no records.
    pub const EMPTY_BATCH_MESSAGE: &str = "No records were supplied in the last full refresh.";
    /// Default path of the file-backed store used by the binary.
    pub const DEFAULT_STORE_PATH: &str = "tabsync_store.json";
    /// Default store identifier used when none is configured.
    pub const DEFAULT_STORE_ID: &str = "local";
    /// Default sheet (partition) name.
    pub const DEFAULT_SHEET: &str = "Sheet1";
}

/// Constants used by schema inference and value mapping.
pub mod schema {
    /// Bookkeeping keys never projected into the column set.
    pub const BOOKKEEPING_FIELDS: &[&str] = &["_rowIndex", "_row_index", "_snapshot"];
    /// Date-field names recognized when no override list is configured.
    pub const DEFAULT_DATE_FIELDS: &[&str] = &[
        "date",
        "day",
        "report_date",
        "event_date",
        "created_at",
        "updated_at",
        "timestamp",
    ];
    /// Canonical calendar-day format for normalized dates.
    pub const CANONICAL_DATE_FORMAT: &str = "%Y-%m-%d";
}
