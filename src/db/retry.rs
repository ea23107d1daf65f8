//! Contention policy for writes under concurrent sessions.
//!
//! SQLite reports `SQLITE_BUSY`/`SQLITE_LOCKED` when another connection holds
//! the write lock longer than `busy_timeout`. Those two codes are retried with
//! linear backoff plus jitter; every other failure is classified and returned
//! on the first attempt.

use std::time::Duration;

use log::{debug, warn};
use rand::Rng;
use rusqlite::{ffi, ErrorCode};

use crate::error::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`: `base * attempt`, capped, ±25% jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base_ms = (self.base_delay.as_millis() as u64)
            .saturating_mul(u64::from(attempt))
            .min(self.max_delay.as_millis() as u64);
        let jitter_range = base_ms / 4;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..=jitter_range * 2)
        } else {
            0
        };
        Duration::from_millis(base_ms.saturating_sub(jitter_range) + jitter)
    }
}

fn sqlite_failure(err: &anyhow::Error) -> Option<&ffi::Error> {
    err.chain().find_map(|cause| match cause.downcast_ref::<rusqlite::Error>() {
        Some(rusqlite::Error::SqliteFailure(code, _)) => Some(code),
        _ => None,
    })
}

pub fn is_busy_or_locked(err: &anyhow::Error) -> bool {
    matches!(
        sqlite_failure(err).map(|code| code.code),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// Maps an error chain produced inside a connection task to a storage error kind.
pub fn classify(err: anyhow::Error) -> StorageError {
    let err = match err.downcast::<StorageError>() {
        Ok(storage) => return storage,
        Err(other) => other,
    };

    if let Some(code) = sqlite_failure(&err) {
        if code.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE {
            return StorageError::ConstraintViolation(format!("{err:#}"));
        }
    }

    StorageError::Internal(err)
}

/// Runs `task` until it succeeds, fails with a non-contention error, or the
/// attempt budget is spent. Blocks the calling thread during backoff, so it
/// must run on a blocking worker.
pub fn run_with_retry<T>(
    policy: &RetryPolicy,
    operation: &str,
    mut task: impl FnMut() -> anyhow::Result<T>,
) -> Result<T, StorageError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match task() {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{operation} succeeded on attempt {attempt}");
                }
                return Ok(value);
            }
            Err(err) if is_busy_or_locked(&err) => {
                if attempt >= max_attempts {
                    warn!("{operation} gave up after {attempt} busy attempts: {err:#}");
                    return Err(StorageError::Contention {
                        attempts: attempt,
                        message: format!("{err:#}"),
                    });
                }
                let delay = policy.backoff(attempt);
                warn!(
                    "{operation} hit a busy database (attempt {attempt}/{max_attempts}); retrying in {}ms",
                    delay.as_millis()
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(classify(err)),
        }
    }
}

#[cfg(test)]
pub(crate) fn busy_error() -> anyhow::Error {
    rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_BUSY), None).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[test]
    fn busy_is_detected_through_context_layers() {
        let err = Err::<(), _>(busy_error())
            .context("failed to insert event")
            .unwrap_err();
        assert!(is_busy_or_locked(&err));
        assert!(!is_busy_or_locked(&anyhow::anyhow!("plain failure")));
    }

    #[test]
    fn retries_busy_until_success() {
        let mut calls = 0;
        let value = run_with_retry(&fast_policy(5), "test write", || {
            calls += 1;
            if calls < 3 {
                Err(busy_error())
            } else {
                Ok(calls)
            }
        })
        .unwrap();
        assert_eq!(value, 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn exhausting_budget_is_contention() {
        let mut calls = 0;
        let err = run_with_retry(&fast_policy(3), "test write", || {
            calls += 1;
            Err::<(), _>(busy_error())
        })
        .unwrap_err();
        assert_eq!(calls, 3);
        assert!(matches!(err, StorageError::Contention { attempts: 3, .. }));
    }

    #[test]
    fn other_errors_are_not_retried() {
        let mut calls = 0;
        let err = run_with_retry(&fast_policy(5), "test write", || {
            calls += 1;
            Err::<(), _>(anyhow::anyhow!("disk on fire"))
        })
        .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, StorageError::Internal(_)));
    }

    #[test]
    fn storage_errors_pass_through_classification() {
        let err = classify(
            StorageError::NotFound {
                entity: "context",
                id: 3,
            }
            .into(),
        );
        assert!(matches!(err, StorageError::NotFound { id: 3, .. }));
    }

    #[test]
    fn only_unique_failures_are_constraint_violations() {
        let failure = |code| -> anyhow::Error {
            rusqlite::Error::SqliteFailure(ffi::Error::new(code), None).into()
        };
        assert!(classify(failure(ffi::SQLITE_CONSTRAINT_UNIQUE)).is_constraint_violation());
        assert!(matches!(
            classify(failure(ffi::SQLITE_CONSTRAINT_CHECK)),
            StorageError::Internal(_)
        ));
        assert!(matches!(
            classify(failure(ffi::SQLITE_CONSTRAINT_FOREIGNKEY)),
            StorageError::Internal(_)
        ));
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
        };
        let first = policy.backoff(1);
        assert!(first >= Duration::from_millis(75) && first <= Duration::from_millis(125));
        let capped = policy.backoff(9);
        assert!(capped <= Duration::from_millis(375));
    }
}
