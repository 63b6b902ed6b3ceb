//! Bucket actor.
//!
//! One activation per bucket primary key. Mutations take the write half
//! of the lock and persist before acknowledging; read-only lookups and
//! status queries take the read half and interleave. The chain
//! successor is derived from the primary key and resolved lazily
//! through the host on every call, never held as a reference.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use graindex_runtime::{StateStore, persist_versioned};
use graindex_types::error::{CodecSnafu, StorageSnafu};
use graindex_types::{
    BucketKey, GrainId, IndexName, IndexUpdate, IndexValue, Result, StorageRetryConfig, decode,
    encode,
};
use snafu::ResultExt;

use crate::host::BucketHost;
use crate::state::{
    ApplyMeta, ApplyOutcome, BucketState, BucketStats, BucketStatus, MapKind, PageSpec,
    RangeOverlap,
};

/// Immutable per-index configuration shared by every bucket of a chain.
#[derive(Debug, Clone)]
pub struct BucketConfig {
    /// Hashed or ordered entry map.
    pub kind: MapKind,
    /// Index the bucket belongs to.
    pub index: IndexName,
    /// Unique index: at most one confirmed grain per key.
    pub unique: bool,
    /// Chain threshold; 0 disables chaining.
    pub max_size: usize,
}

impl BucketConfig {
    fn apply_meta(&self) -> ApplyMeta {
        ApplyMeta { index: self.index.clone(), unique: self.unique, max_size: self.max_size }
    }
}

struct Persisted {
    bucket: BucketState,
    version: Option<u64>,
}

/// Addressable holder of one bucket's state.
pub struct BucketActor {
    key: BucketKey,
    pk: String,
    config: BucketConfig,
    store: Arc<dyn StateStore>,
    retry: StorageRetryConfig,
    state: RwLock<Persisted>,
}

impl BucketActor {
    /// Activates the bucket, loading persisted state when present.
    pub(crate) async fn activate(
        key: BucketKey,
        config: BucketConfig,
        store: Arc<dyn StateStore>,
        retry: StorageRetryConfig,
    ) -> Result<Self> {
        let pk = key.to_string();
        let record = store
            .read(&pk)
            .await
            .map_err(|e| StorageSnafu { message: e.to_string() }.build())?;

        let (bucket, version) = match record {
            Some(record) => {
                let bucket: BucketState = decode(&record.data).context(CodecSnafu)?;
                (bucket, Some(record.version))
            },
            None => (BucketState::new(config.kind), None),
        };

        debug!(bucket = %pk, chain = key.chain(), restored = version.is_some(), "bucket activated");
        Ok(Self { key, pk, config, store, retry, state: RwLock::new(Persisted { bucket, version }) })
    }

    /// This bucket's primary key.
    pub fn key(&self) -> &BucketKey {
        &self.key
    }

    /// Current lifecycle status.
    pub async fn status(&self) -> BucketStatus {
        self.state.read().await.bucket.status()
    }

    /// Counter snapshot plus stored key count.
    pub async fn stats(&self) -> (BucketStats, usize) {
        let guard = self.state.read().await;
        (guard.bucket.stats(), guard.bucket.len())
    }

    /// Sets the lifecycle status and persists.
    pub async fn set_status(&self, status: BucketStatus) -> Result<()> {
        let mut guard = self.state.write().await;
        guard.bucket.set_status(status);
        self.persist(&mut guard).await
    }

    /// Applies one update, forwarding along the overflow chain until a
    /// bucket accepts it. Successors are allocated on demand.
    pub async fn update(
        &self,
        host: &BucketHost,
        grain: &GrainId,
        update: &IndexUpdate,
    ) -> Result<ApplyOutcome> {
        let (outcome, mut next) = self.apply_local(grain, update).await?;
        if next.is_none() {
            return Ok(outcome);
        }
        while let Some(next_key) = next.take() {
            let bucket = host.bucket(next_key, self.config.clone()).await?;
            let (outcome, forwarded) = bucket.apply_local(grain, update).await?;
            match forwarded {
                Some(key) => next = Some(key),
                None => return Ok(outcome),
            }
        }
        Ok(outcome)
    }

    /// Applies the update here. On `applied = false`, records the
    /// successor link and returns its key for the caller to dispatch.
    async fn apply_local(
        &self,
        grain: &GrainId,
        update: &IndexUpdate,
    ) -> Result<(ApplyOutcome, Option<BucketKey>)> {
        let mut guard = self.state.write().await;
        let outcome = guard.bucket.apply(grain, update, &self.config.apply_meta())?;

        if outcome.applied {
            self.persist(&mut guard).await?;
            return Ok((outcome, None));
        }

        let next_key = match guard.bucket.next_bucket() {
            Some(key) => key.clone(),
            None => {
                let key = self.key.successor();
                debug!(bucket = %self.pk, successor = %key, "bucket full, allocating chain successor");
                guard.bucket.set_next_bucket(key.clone());
                key
            },
        };
        guard.bucket.record_forward();
        self.persist(&mut guard).await?;
        Ok((outcome, Some(next_key)))
    }

    /// Looks up one key, falling through the chain when absent here.
    ///
    /// Unavailable buckets contribute nothing.
    pub async fn lookup_by_key(
        &self,
        host: &BucketHost,
        key: &IndexValue,
        page: PageSpec,
    ) -> Result<Vec<GrainId>> {
        let mut next = {
            let guard = self.state.read().await;
            if guard.bucket.status() == BucketStatus::Available {
                if guard.bucket.try_get(key).is_some() {
                    return Ok(guard.bucket.get_page(key, page));
                }
            }
            guard.bucket.next_bucket().cloned()
        };

        while let Some(next_key) = next.take() {
            let bucket = host.bucket(next_key, self.config.clone()).await?;
            let guard = bucket.state.read().await;
            if guard.bucket.status() == BucketStatus::Available && guard.bucket.try_get(key).is_some() {
                return Ok(guard.bucket.get_page(key, page));
            }
            next = guard.bucket.next_bucket().cloned();
        }
        Ok(Vec::new())
    }

    /// Range lookup across this bucket and its chain, ascending per
    /// bucket, concatenated in chain order.
    pub async fn lookup_range(
        &self,
        host: &BucketHost,
        start: &IndexValue,
        end: &IndexValue,
        page: PageSpec,
    ) -> Result<Vec<GrainId>> {
        let needed = page.offset.saturating_add(page.size);
        let mut collected = Vec::new();

        let mut next = {
            let guard = self.state.read().await;
            if guard.bucket.status() == BucketStatus::Available {
                collected.extend(guard.bucket.range(start, end, PageSpec::all())?);
            }
            guard.bucket.next_bucket().cloned()
        };

        while collected.len() < needed {
            let Some(next_key) = next.take() else { break };
            let bucket = host.bucket(next_key, self.config.clone()).await?;
            let guard = bucket.state.read().await;
            if guard.bucket.status() == BucketStatus::Available {
                collected.extend(guard.bucket.range(start, end, PageSpec::all())?);
            }
            next = guard.bucket.next_bucket().cloned();
        }

        Ok(collected.into_iter().skip(page.offset).take(page.size).collect())
    }

    /// Classifies `[start, end]` against the key span of this bucket
    /// and its whole chain.
    pub async fn range_overlap(
        &self,
        host: &BucketHost,
        start: &IndexValue,
        end: &IndexValue,
    ) -> Result<RangeOverlap> {
        let mut span: Option<(IndexValue, IndexValue)> = None;

        let mut next = {
            let guard = self.state.read().await;
            merge_span(&mut span, guard.bucket.key_span()?);
            guard.bucket.next_bucket().cloned()
        };
        while let Some(next_key) = next.take() {
            let bucket = host.bucket(next_key, self.config.clone()).await?;
            let guard = bucket.state.read().await;
            merge_span(&mut span, guard.bucket.key_span()?);
            next = guard.bucket.next_bucket().cloned();
        }

        Ok(match span {
            Some((min, max)) => BucketState::classify_range(start, end, &min, &max),
            None => RangeOverlap::GreaterThan,
        })
    }

    /// Tombstones the bucket: status `Disposed`, persisted record
    /// cleared. The activation keeps answering with its tombstoned
    /// status.
    pub async fn dispose(&self) -> Result<()> {
        let mut guard = self.state.write().await;
        guard.bucket.set_status(BucketStatus::Disposed);
        self.store
            .clear(&self.pk)
            .await
            .map_err(|e| StorageSnafu { message: e.to_string() }.build())?;
        guard.version = None;
        debug!(bucket = %self.pk, "bucket disposed");
        Ok(())
    }

    async fn persist(&self, guard: &mut Persisted) -> Result<()> {
        let data = encode(&guard.bucket).context(CodecSnafu)?;
        let version = persist_versioned(self.store.as_ref(), &self.retry, &self.pk, data, guard.version)
            .await
            .map_err(|e| StorageSnafu { message: e.to_string() }.build())?;
        guard.version = Some(version);
        Ok(())
    }
}

fn merge_span(acc: &mut Option<(IndexValue, IndexValue)>, span: Option<(IndexValue, IndexValue)>) {
    if let Some((min, max)) = span {
        match acc {
            Some((acc_min, acc_max)) => {
                if min < *acc_min {
                    *acc_min = min;
                }
                if max > *acc_max {
                    *acc_max = max;
                }
            },
            None => *acc = Some((min, max)),
        }
    }
}
