//! Index client: stateless fan-in/fan-out over bucket actors.
//!
//! Routing is pure and recomputed on every call. Updates dispatch to
//! the bucket derived from their key; an update whose before- and
//! after-images land in different partitions decomposes into a parallel
//! delete + insert, and both must succeed. Sorted range lookups walk
//! the ordered partition list, consulting each bucket's range overlap
//! before querying it.

use std::sync::Arc;

use tracing::trace;

use graindex_bucket::{ApplyOutcome, BucketHost, PageSpec, RangeOverlap};
use graindex_types::error::InvalidArgumentSnafu;
use graindex_types::{GrainId, IndexOp, IndexUpdate, IndexValue, Result};

use crate::spec::IndexSpec;

/// Fan-in/fan-out routing for one index.
pub struct IndexClient {
    spec: IndexSpec,
    host: Arc<BucketHost>,
}

impl IndexClient {
    /// Creates a client for one index over a bucket host.
    pub fn new(spec: IndexSpec, host: Arc<BucketHost>) -> Self {
        Self { spec, host }
    }

    /// This index's descriptor.
    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    /// Routes one update to its bucket(s).
    ///
    /// An `Update` whose images cross partitions becomes a delete to
    /// the before-bucket and an insert to the after-bucket, dispatched
    /// in parallel; the first error fails the whole call.
    ///
    /// # Errors
    ///
    /// Propagates bucket errors, notably
    /// [`UniquenessViolation`](graindex_types::IndexError::UniquenessViolation).
    pub async fn apply_update(&self, grain: &GrainId, update: &IndexUpdate) -> Result<ApplyOutcome> {
        update.validate()?;
        match update.op {
            IndexOp::None => Ok(ApplyOutcome { applied: true, fix_delete_on_unavailable: false }),
            IndexOp::Insert => {
                let Some(after) = update.after.as_ref() else {
                    return Ok(ApplyOutcome { applied: true, fix_delete_on_unavailable: false });
                };
                self.dispatch(after, grain, update).await
            },
            IndexOp::Delete => {
                let Some(before) = update.before.as_ref() else {
                    return Ok(ApplyOutcome { applied: true, fix_delete_on_unavailable: false });
                };
                self.dispatch(before, grain, update).await
            },
            IndexOp::Update => {
                let (Some(before), Some(after)) = (update.before.as_ref(), update.after.as_ref())
                else {
                    return Ok(ApplyOutcome { applied: true, fix_delete_on_unavailable: false });
                };

                let before_bucket = self.spec.bucket_key_for(before)?;
                let after_bucket = self.spec.bucket_key_for(after)?;
                if before_bucket == after_bucket {
                    return self.dispatch(after, grain, update).await;
                }

                trace!(
                    index = %self.spec.name,
                    %before_bucket,
                    %after_bucket,
                    "update crosses partitions, splitting"
                );
                let delete_half = IndexUpdate::from_images(
                    update.before.clone(),
                    None,
                    update.visibility,
                );
                let insert_half = IndexUpdate::from_images(
                    None,
                    update.after.clone(),
                    update.visibility,
                );
                let (deleted, inserted) = tokio::join!(
                    self.dispatch(before, grain, &delete_half),
                    self.dispatch(after, grain, &insert_half),
                );
                let deleted = deleted?;
                let inserted = inserted?;
                Ok(ApplyOutcome {
                    applied: deleted.applied && inserted.applied,
                    fix_delete_on_unavailable: deleted.fix_delete_on_unavailable
                        || inserted.fix_delete_on_unavailable,
                })
            },
        }
    }

    async fn dispatch(
        &self,
        route: &IndexValue,
        grain: &GrainId,
        update: &IndexUpdate,
    ) -> Result<ApplyOutcome> {
        let key = self.spec.bucket_key_for(route)?;
        let bucket = self.host.bucket(key, self.spec.bucket_config()).await?;
        bucket.update(&self.host, grain, update).await
    }

    /// Equality lookup: all grains under `key`, up to the page window.
    pub async fn lookup_by_key(&self, key: &IndexValue, page: PageSpec) -> Result<Vec<GrainId>> {
        let bucket_key = self.spec.bucket_key_for(key)?;
        let bucket = self.host.bucket(bucket_key, self.spec.bucket_config()).await?;
        bucket.lookup_by_key(&self.host, key, page).await
    }

    /// Range lookup over a sorted index: partitions are traversed in
    /// ascending order, each consulted for overlap first, with an early
    /// exit once the page is filled.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` on a hash index or inverted bounds.
    pub async fn lookup_range(
        &self,
        start: &IndexValue,
        end: &IndexValue,
        page: PageSpec,
    ) -> Result<Vec<GrainId>> {
        if !self.spec.is_sorted() {
            return InvalidArgumentSnafu {
                message: format!("range lookup on hash index {}", self.spec.name),
            }
            .fail();
        }

        let needed = page.offset.saturating_add(page.size);
        let mut collected = Vec::new();

        for partition in self.spec.scheme.partitions_in_range(start, end)? {
            if collected.len() >= needed {
                break;
            }
            let bucket_key = self.spec.bucket_key_for_partition(&partition);
            let bucket = self.host.bucket(bucket_key, self.spec.bucket_config()).await?;

            let overlap = bucket.range_overlap(&self.host, start, end).await?;
            trace!(index = %self.spec.name, partition, ?overlap, "sorted traversal step");
            match overlap {
                RangeOverlap::LessThan => break,
                RangeOverlap::PartialLessThan | RangeOverlap::Superset => {
                    collected.extend(bucket.lookup_range(&self.host, start, end, PageSpec::all()).await?);
                    break;
                },
                RangeOverlap::Subset | RangeOverlap::PartialGreaterThan => {
                    collected.extend(bucket.lookup_range(&self.host, start, end, PageSpec::all()).await?);
                },
                RangeOverlap::GreaterThan => {},
            }
        }

        Ok(collected.into_iter().skip(page.offset).take(page.size).collect())
    }
}
