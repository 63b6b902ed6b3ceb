//! Conflict retry for the storage bridge.
//!
//! Optimistic-concurrency conflicts retry with a linearly increasing
//! delay up to a bounded attempt count; every other failure surfaces
//! immediately. Callers re-read inside the operation so each attempt
//! observes the latest version.

use std::future::Future;

use graindex_types::StorageRetryConfig;
use tracing::debug;

use crate::store::{StateStore, StoreError};

/// Runs `operation`, retrying on [`StoreError::Conflict`].
///
/// Delay after attempt `n` (1-based) is `base_delay * n`. After
/// `max_attempts` failed attempts the last conflict surfaces to the
/// caller.
///
/// # Errors
///
/// Returns the operation's error once it is non-retryable or the
/// attempt budget is exhausted.
pub async fn with_conflict_retry<T, F, Fut>(
    policy: &StorageRetryConfig,
    mut operation: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_conflict() && attempt < policy.max_attempts => {
                let delay = policy.base_delay * attempt;
                debug!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "storage conflict, retrying"
                );
                tokio::time::sleep(delay).await;
            },
            Err(err) => return Err(err),
        }
    }
}

/// Persists one versioned record, absorbing conflicts.
///
/// First attempt writes with the caller's cached `expected` version; on
/// conflict the current version is re-read and the write retried under
/// the same linear-backoff budget. Returns the new version. Actors are
/// their record's only writer, so a conflict here means a duplicate
/// activation raced us and last-writer-wins is the intended outcome.
///
/// # Errors
///
/// Returns the final [`StoreError`] once the budget is exhausted or the
/// failure is not a conflict.
pub async fn persist_versioned(
    store: &dyn StateStore,
    policy: &StorageRetryConfig,
    key: &str,
    data: Vec<u8>,
    expected: Option<u64>,
) -> Result<u64, StoreError> {
    let mut expected = expected;
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match store.write(key, data.clone(), expected).await {
            Ok(version) => return Ok(version),
            Err(err) if err.is_conflict() && attempt < policy.max_attempts => {
                let delay = policy.base_delay * attempt;
                debug!(key, attempt, delay_ms = delay.as_millis() as u64, "persist conflict, re-reading version");
                tokio::time::sleep(delay).await;
                expected = store.read(key).await?.map(|r| r.version);
            },
            Err(err) => return Err(err),
        }
    }
}
