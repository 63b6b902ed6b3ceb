//! Bucket activation directory.
//!
//! Buckets are virtual: the host activates one on first use (restoring
//! persisted state through the storage bridge) and hands out shared
//! references thereafter. Chain successors and routing targets resolve
//! through here by primary key.

use std::sync::Arc;

use dashmap::DashMap;

use graindex_runtime::StateStore;
use graindex_types::{BucketKey, Result, StorageRetryConfig};

use crate::actor::{BucketActor, BucketConfig};

/// On-demand activation directory for bucket actors.
pub struct BucketHost {
    store: Arc<dyn StateStore>,
    retry: StorageRetryConfig,
    buckets: DashMap<String, Arc<BucketActor>>,
}

impl BucketHost {
    /// Creates a host over the given storage bridge.
    pub fn new(store: Arc<dyn StateStore>, retry: StorageRetryConfig) -> Self {
        Self { store, retry, buckets: DashMap::new() }
    }

    /// Resolves a bucket by primary key, activating it on first use.
    pub async fn bucket(&self, key: BucketKey, config: BucketConfig) -> Result<Arc<BucketActor>> {
        let pk = key.to_string();
        if let Some(bucket) = self.buckets.get(&pk) {
            return Ok(Arc::clone(&bucket));
        }

        let actor = Arc::new(
            BucketActor::activate(key, config, Arc::clone(&self.store), self.retry.clone()).await?,
        );
        // Two concurrent activations can race here; the first insert wins
        // and both callers observe the same actor.
        let entry = self.buckets.entry(pk).or_insert(actor);
        Ok(Arc::clone(&entry))
    }

    /// Drops an activation from the directory. Persisted state remains;
    /// the next resolve re-activates from storage.
    pub fn deactivate(&self, key: &BucketKey) {
        self.buckets.remove(&key.to_string());
    }

    /// Number of live activations.
    pub fn active_count(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use graindex_runtime::MemoryStore;
    use graindex_types::{IndexName, InterfaceName};

    use super::*;
    use crate::state::MapKind;

    fn host() -> BucketHost {
        BucketHost::new(Arc::new(MemoryStore::new()), StorageRetryConfig::default())
    }

    fn config() -> BucketConfig {
        BucketConfig {
            kind: MapKind::Hashed,
            index: IndexName::from_property("Status"),
            unique: false,
            max_size: 0,
        }
    }

    fn key() -> BucketKey {
        BucketKey::partitioned(
            InterfaceName::new("app.IJobGrain"),
            &IndexName::from_property("Status"),
            "0",
        )
    }

    #[tokio::test]
    async fn test_resolve_returns_same_activation() {
        let host = host();
        let a = host.bucket(key(), config()).await.expect("activate");
        let b = host.bucket(key(), config()).await.expect("resolve");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(host.active_count(), 1);
    }

    #[tokio::test]
    async fn test_deactivate_then_reactivate() {
        let host = host();
        let a = host.bucket(key(), config()).await.expect("activate");
        host.deactivate(&key());
        assert_eq!(host.active_count(), 0);

        let b = host.bucket(key(), config()).await.expect("reactivate");
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
