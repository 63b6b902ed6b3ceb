//! Overflow-chaining scenarios across bucket actors.

use std::sync::Arc;

use graindex_bucket::{BucketConfig, BucketHost, BucketStatus, MapKind, PageSpec};
use graindex_runtime::{MemoryStore, StateStore};
use graindex_types::{
    BucketKey, GrainId, IndexName, IndexUpdate, IndexValue, InterfaceName, StorageRetryConfig,
    Visibility,
};

fn grain(key: &str) -> GrainId {
    GrainId::new("app.IJobGrain", key)
}

fn head_key() -> BucketKey {
    BucketKey::partitioned(
        InterfaceName::new("app.IJobGrain"),
        &IndexName::from_property("Level"),
        "0",
    )
}

fn config(kind: MapKind, max_size: usize) -> BucketConfig {
    BucketConfig {
        kind,
        index: IndexName::from_property("Level"),
        unique: false,
        max_size,
    }
}

fn insert(value: i64) -> IndexUpdate {
    IndexUpdate::from_images(None, Some(IndexValue::from(value)), Visibility::NonTentative)
}

fn delete(value: i64) -> IndexUpdate {
    IndexUpdate::from_images(Some(IndexValue::from(value)), None, Visibility::NonTentative)
}

#[tokio::test]
async fn test_overflow_allocates_chain_and_lookups_fall_through() {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let host = BucketHost::new(Arc::clone(&store), StorageRetryConfig::default());
    let cfg = config(MapKind::Hashed, 2);

    let head = host.bucket(head_key(), cfg.clone()).await.expect("activate head");
    for (i, v) in [10i64, 20, 30, 40, 50].iter().enumerate() {
        let outcome = head
            .update(&host, &grain(&format!("g{i}")), &insert(*v))
            .await
            .expect("insert routes through chain");
        assert!(outcome.applied);
    }

    // Head kept its two keys; the rest spilled down the chain.
    let (_, head_len) = head.stats().await;
    assert_eq!(head_len, 2);

    let tail = host.bucket(head_key().successor().successor(), cfg.clone()).await.expect("tail");
    let (_, tail_len) = tail.stats().await;
    assert_eq!(tail_len, 1);

    // Every key is findable from the head.
    for (i, v) in [10i64, 20, 30, 40, 50].iter().enumerate() {
        let hits = head
            .lookup_by_key(&host, &IndexValue::from(*v), PageSpec::all())
            .await
            .expect("lookup");
        assert_eq!(hits, vec![grain(&format!("g{i}"))], "key {v} reachable via chain");
    }
}

#[tokio::test]
async fn test_delete_falls_through_to_chain_tail() {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let host = BucketHost::new(Arc::clone(&store), StorageRetryConfig::default());
    let cfg = config(MapKind::Hashed, 1);

    let head = host.bucket(head_key(), cfg.clone()).await.expect("head");
    head.update(&host, &grain("g0"), &insert(1)).await.expect("fills head");
    head.update(&host, &grain("g1"), &insert(2)).await.expect("spills to successor");

    // Delete the spilled key starting from the head.
    let outcome = head.update(&host, &grain("g1"), &delete(2)).await.expect("chained delete");
    assert!(outcome.applied);
    assert!(head
        .lookup_by_key(&host, &IndexValue::from(2i64), PageSpec::all())
        .await
        .expect("lookup after delete")
        .is_empty());

    // Deleting a key nobody holds is idempotent at the tail.
    let outcome = head.update(&host, &grain("g9"), &delete(99)).await.expect("absent delete");
    assert!(outcome.applied);
}

#[tokio::test]
async fn test_chain_state_survives_reactivation() {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let cfg = config(MapKind::Hashed, 1);

    {
        let host = BucketHost::new(Arc::clone(&store), StorageRetryConfig::default());
        let head = host.bucket(head_key(), cfg.clone()).await.expect("head");
        head.update(&host, &grain("g0"), &insert(1)).await.expect("insert");
        head.update(&host, &grain("g1"), &insert(2)).await.expect("spill");
    }

    // A fresh host simulates process restart: same store, no activations.
    let host = BucketHost::new(Arc::clone(&store), StorageRetryConfig::default());
    let head = host.bucket(head_key(), cfg.clone()).await.expect("reactivate head");
    let hits = head
        .lookup_by_key(&host, &IndexValue::from(2i64), PageSpec::all())
        .await
        .expect("lookup restored chain");
    assert_eq!(hits, vec![grain("g1")]);
}

#[tokio::test]
async fn test_sorted_range_concatenates_across_chain() {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let host = BucketHost::new(Arc::clone(&store), StorageRetryConfig::default());
    let cfg = config(MapKind::Ordered, 2);

    let head = host.bucket(head_key(), cfg.clone()).await.expect("head");
    for (i, v) in [10i64, 20, 30, 40].iter().enumerate() {
        head.update(&host, &grain(&format!("g{i}")), &insert(*v)).await.expect("insert");
    }

    let hits = head
        .lookup_range(&host, &IndexValue::from(10i64), &IndexValue::from(40i64), PageSpec::all())
        .await
        .expect("range across chain");
    assert_eq!(hits.len(), 4);

    // Page size caps the result.
    let hits = head
        .lookup_range(&host, &IndexValue::from(10i64), &IndexValue::from(40i64), PageSpec::new(0, 3))
        .await
        .expect("paged range");
    assert_eq!(hits.len(), 3);
}

#[tokio::test]
async fn test_dispose_tombstones_bucket() {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let host = BucketHost::new(Arc::clone(&store), StorageRetryConfig::default());
    let cfg = config(MapKind::Hashed, 0);

    let bucket = host.bucket(head_key(), cfg.clone()).await.expect("activate");
    bucket.update(&host, &grain("g0"), &insert(1)).await.expect("insert");
    bucket.dispose().await.expect("dispose");

    assert_eq!(bucket.status().await, BucketStatus::Disposed);
    assert!(bucket
        .lookup_by_key(&host, &IndexValue::from(1i64), PageSpec::all())
        .await
        .expect("lookup on disposed")
        .is_empty());
    assert!(store.read(&head_key().to_string()).await.expect("read").is_none());
}
