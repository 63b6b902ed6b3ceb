//! Storage bridge.
//!
//! Bucket states, grain envelopes, and queue states persist through
//! this trait. Writes carry the version the writer last observed;
//! a mismatch is an optimistic-concurrency conflict and drives the
//! retry policy in [`retry`](crate::retry).

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use snafu::Snafu;

/// Errors returned by the storage bridge.
#[derive(Debug, Snafu)]
pub enum StoreError {
    /// Optimistic-concurrency conflict: the record changed underneath
    /// the writer. Retryable.
    #[snafu(display("version conflict on {key}: expected {expected:?}, found {found:?}"))]
    Conflict {
        /// Record key.
        key: String,
        /// Version the writer observed.
        expected: Option<u64>,
        /// Version currently stored.
        found: Option<u64>,
    },

    /// Provider-level failure. Not retryable.
    #[snafu(display("storage provider failure on {key}: {message}"))]
    Provider {
        /// Record key.
        key: String,
        /// Error description.
        message: String,
    },
}

impl StoreError {
    /// True for conflicts, which the bridge retries with backoff.
    #[inline]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// A stored record with its concurrency version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedState {
    /// Encoded record body.
    pub data: Vec<u8>,
    /// Monotonic version, bumped on every successful write.
    pub version: u64,
}

/// Persistence seam for durable actor state.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Reads a record, returning `None` when absent.
    async fn read(&self, key: &str) -> Result<Option<VersionedState>, StoreError>;

    /// Writes a record, enforcing optimistic concurrency.
    ///
    /// `expected_version` is the version the writer last read (`None`
    /// when it believes the record absent). Returns the new version.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the stored version differs
    /// from `expected_version`.
    async fn write(
        &self,
        key: &str,
        data: Vec<u8>,
        expected_version: Option<u64>,
    ) -> Result<u64, StoreError>;

    /// Removes a record. Removing an absent record is a no-op.
    async fn clear(&self, key: &str) -> Result<(), StoreError>;
}

/// In-memory store for tests and single-process hosts.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, VersionedState>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no records are stored.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn read(&self, key: &str) -> Result<Option<VersionedState>, StoreError> {
        Ok(self.records.get(key).map(|r| r.clone()))
    }

    async fn write(
        &self,
        key: &str,
        data: Vec<u8>,
        expected_version: Option<u64>,
    ) -> Result<u64, StoreError> {
        match self.records.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let found = occupied.get().version;
                if expected_version != Some(found) {
                    return Err(StoreError::Conflict {
                        key: key.to_string(),
                        expected: expected_version,
                        found: Some(found),
                    });
                }
                let version = found + 1;
                occupied.insert(VersionedState { data, version });
                Ok(version)
            },
            Entry::Vacant(vacant) => {
                if let Some(expected) = expected_version {
                    return Err(StoreError::Conflict {
                        key: key.to_string(),
                        expected: Some(expected),
                        found: None,
                    });
                }
                vacant.insert(VersionedState { data, version: 1 });
                Ok(1)
            },
        }
    }

    async fn clear(&self, key: &str) -> Result<(), StoreError> {
        self.records.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_and_read_back() {
        let store = MemoryStore::new();
        let version = store.write("k", vec![1, 2, 3], None).await.expect("write");
        assert_eq!(version, 1);

        let record = store.read("k").await.expect("read").expect("present");
        assert_eq!(record.data, vec![1, 2, 3]);
        assert_eq!(record.version, 1);
    }

    #[tokio::test]
    async fn test_stale_write_conflicts() {
        let store = MemoryStore::new();
        store.write("k", vec![1], None).await.expect("create");
        store.write("k", vec![2], Some(1)).await.expect("update");

        // A writer still holding version 1 must conflict.
        let err = store.write("k", vec![3], Some(1)).await.expect_err("stale");
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_create_conflicts_when_record_exists() {
        let store = MemoryStore::new();
        store.write("k", vec![1], None).await.expect("create");
        let err = store.write("k", vec![2], None).await.expect_err("blind create");
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let store = MemoryStore::new();
        store.write("k", vec![1], None).await.expect("create");
        store.clear("k").await.expect("clear");
        store.clear("k").await.expect("clear absent");
        assert!(store.read("k").await.expect("read").is_none());
    }
}
