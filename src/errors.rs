use std::io;

use thiserror::Error;

use crate::types::OperationName;

/// Failure reported by a store adapter call.
///
/// `code` carries a numeric transport status when one is known; `message`
/// carries the store's error text. The retry executor classifies on both.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{}", render_store_error(.code, .message))]
pub struct StoreError {
    /// Numeric status reported by the transport, if any.
    pub code: Option<u16>,
    /// Error text reported by the store or transport.
    pub message: String,
}

impl StoreError {
    /// Error with a message and no status code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// Error with a numeric status code and a message.
    pub fn with_code(code: u16, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }
}

fn render_store_error(code: &Option<u16>, message: &str) -> String {
    match code {
        Some(code) => format!("[{code}] {message}"),
        None => message.to_string(),
    }
}

/// Error type for reconciliation, locking, and batch loading failures.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A store call failed with a permanent error.
    #[error("store operation '{operation}' failed: {source}")]
    Store {
        /// Store operation that failed.
        operation: OperationName,
        /// Last store error.
        #[source]
        source: StoreError,
    },
    /// A store call kept failing transiently until attempts ran out.
    #[error("store operation '{operation}' failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Store operation that failed.
        operation: OperationName,
        /// Attempts made, the first one included.
        attempts: u32,
        /// Last store error.
        #[source]
        source: StoreError,
    },
    /// Another invocation holds a fresh lock for the target.
    #[error(
        "sync lock '{key}' is held by '{holder}' (acquired {age_secs}s ago); wait for it to finish or remove the lock file"
    )]
    LockContention {
        /// `store/sheet` label of the contended target.
        key: String,
        /// Holder recorded in the lock file.
        holder: String,
        /// Lock age in seconds.
        age_secs: i64,
    },
    /// Lock file could not be read, written, or removed.
    #[error("lock file failure: {0}")]
    Lock(String),
    /// Input batch is not an array of objects.
    #[error("invalid input batch: {0}")]
    InvalidBatch(String),
    /// Configuration failed validation.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Filesystem failure outside the store.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// JSON encoding or decoding failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Underlying store error, when this failure came from a store call.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::Store { source, .. } | Self::RetriesExhausted { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display_includes_code_when_present() {
        assert_eq!(
            StoreError::with_code(429, "rate limited").to_string(),
            "[429] rate limited"
        );
        assert_eq!(StoreError::new("boom").to_string(), "boom");
    }

    #[test]
    fn retries_exhausted_keeps_last_error_as_source() {
        let err = SyncError::RetriesExhausted {
            operation: "append_rows",
            attempts: 3,
            source: StoreError::with_code(503, "unavailable"),
        };
        let source = std::error::Error::source(&err).map(|cause| cause.to_string());
        assert_eq!(source.as_deref(), Some("[503] unavailable"));
        assert_eq!(err.store_error().and_then(|e| e.code), Some(503));
    }
}
