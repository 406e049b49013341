//! Bounded exponential backoff around store calls.

use rand::Rng;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::warn;

use crate::config::RetryPolicy;
use crate::constants::retry::{JITTER_FRACTION, RETRYABLE_ERROR_NAMES, RETRYABLE_STATUS_CODES};
use crate::errors::{StoreError, SyncError};
use crate::types::OperationName;

/// Blocking sleep hook; replaced in tests to record delays.
pub type Sleeper = Arc<dyn Fn(Duration) + Send + Sync>;

/// True if `err` is a transient failure worth retrying.
///
/// Matches either a known status code or, case-insensitively, one of the
/// transient error names anywhere in the message.
pub fn is_retryable(err: &StoreError) -> bool {
    if err
        .code
        .is_some_and(|code| RETRYABLE_STATUS_CODES.contains(&code))
    {
        return true;
    }
    let message = err.message.to_ascii_lowercase();
    RETRYABLE_ERROR_NAMES
        .iter()
        .any(|name| message.contains(&name.to_ascii_lowercase()))
}

/// Delay before retry `attempt` (0-based) for a jitter sample in `[-1.0, 1.0]`.
///
/// `min(base * 2^attempt, max)`, moved by up to ±25% of itself, then clamped
/// to `[base, max]`.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32, jitter_unit: f64) -> Duration {
    let base = policy.base_delay.as_nanos() as f64;
    let max = (policy.max_delay.as_nanos() as f64).max(base);
    let exponent = attempt.min(62) as i32;
    let raw = (base * 2f64.powi(exponent)).min(max);
    let jitter = raw * JITTER_FRACTION * jitter_unit.clamp(-1.0, 1.0);
    Duration::from_nanos((raw + jitter).clamp(base, max).round() as u64)
}

/// Jittered delay before retry `attempt` using `rng`.
pub fn jittered_delay<R: Rng + ?Sized>(policy: &RetryPolicy, attempt: u32, rng: &mut R) -> Duration {
    backoff_delay(policy, attempt, rng.random_range(-1.0..=1.0))
}

/// Runs store calls with retry and backoff.
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    sleeper: Sleeper,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .finish()
    }
}

impl RetryExecutor {
    /// Executor that blocks the current thread between attempts.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            sleeper: Arc::new(thread::sleep),
        }
    }

    /// Replace the sleep hook.
    pub fn with_sleeper(mut self, sleeper: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Active retry policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `call` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Permanent failures surface as [`SyncError::Store`] immediately;
    /// transient ones surface as [`SyncError::RetriesExhausted`] carrying the
    /// last error.
    pub fn run<T, F>(&self, operation: OperationName, mut call: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Result<T, StoreError>,
    {
        let max_attempts = self.policy.max_attempts();
        let mut rng = rand::rng();
        let mut attempt: u32 = 0;
        loop {
            let err = match call() {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !is_retryable(&err) {
                return Err(SyncError::Store {
                    operation,
                    source: err,
                });
            }
            attempt += 1;
            if attempt >= max_attempts {
                return Err(SyncError::RetriesExhausted {
                    operation,
                    attempts: attempt,
                    source: err,
                });
            }
            let delay = jittered_delay(&self.policy, attempt - 1, &mut rng);
            warn!(
                "[tabsync:retry] {} failed (attempt {}/{}): {}; retrying in {:.2}s",
                operation,
                attempt,
                max_attempts,
                err,
                delay.as_secs_f64()
            );
            (self.sleeper)(delay);
        }
    }
}
