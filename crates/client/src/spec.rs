//! Index descriptors as seen by routing.
//!
//! The registry binds property readers and validates schemas; what
//! routing needs is this immutable spec: kind, uniqueness, partition
//! scheme, and bucket sizing.

use graindex_bucket::{BucketConfig, MapKind};
use graindex_types::{BucketKey, IndexName, IndexValue, InterfaceName, KeyType, Result};

use crate::partition::PartitionScheme;

/// Physical layout of a hash index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashScope {
    /// One bucket actor, no partitioning.
    SingleNode,
    /// Buckets partitioned by key via the scheme.
    PartitionedByKey,
}

/// Index kind with per-kind routing data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Equality-lookup index.
    Hash {
        /// At most one confirmed grain per key.
        unique: bool,
        /// Physical layout.
        scope: HashScope,
    },
    /// Range-lookup index over ordered buckets.
    Sorted,
}

/// Immutable descriptor of one index, shared by client, queue, and
/// controller.
#[derive(Debug, Clone)]
pub struct IndexSpec {
    /// Interface whose state this index covers.
    pub interface: InterfaceName,
    /// Index name (`_`-prefixed property name).
    pub name: IndexName,
    /// Kind and per-kind layout.
    pub kind: IndexKind,
    /// Declared key type.
    pub key_type: KeyType,
    /// Chain threshold per bucket; 0 disables chaining.
    pub max_bucket_size: usize,
    /// Key-to-partition mapping.
    pub scheme: PartitionScheme,
}

impl IndexSpec {
    /// True for unique hash indexes.
    pub fn is_unique(&self) -> bool {
        matches!(self.kind, IndexKind::Hash { unique: true, .. })
    }

    /// True for sorted indexes.
    pub fn is_sorted(&self) -> bool {
        matches!(self.kind, IndexKind::Sorted)
    }

    /// Bucket configuration for every bucket of this index.
    pub fn bucket_config(&self) -> BucketConfig {
        BucketConfig {
            kind: match self.kind {
                IndexKind::Hash { .. } => MapKind::Hashed,
                IndexKind::Sorted => MapKind::Ordered,
            },
            index: self.name.clone(),
            unique: self.is_unique(),
            max_size: self.max_bucket_size,
        }
    }

    /// Head bucket key for the partition holding `value`.
    ///
    /// # Errors
    ///
    /// Propagates scheme errors (e.g. a non-instant key under a
    /// date-time scheme).
    pub fn bucket_key_for(&self, value: &IndexValue) -> Result<BucketKey> {
        match self.kind {
            IndexKind::Hash { scope: HashScope::SingleNode, .. } => {
                Ok(BucketKey::single_node(self.interface.clone(), &self.name))
            },
            _ => {
                let partition = self.scheme.partition(value)?;
                Ok(BucketKey::partitioned(self.interface.clone(), &self.name, &partition))
            },
        }
    }

    /// Head bucket key for a named partition.
    pub fn bucket_key_for_partition(&self, partition: &str) -> BucketKey {
        BucketKey::partitioned(self.interface.clone(), &self.name, partition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(kind: IndexKind) -> IndexSpec {
        IndexSpec {
            interface: InterfaceName::new("app.IJobGrain"),
            name: IndexName::from_property("Status"),
            kind,
            key_type: KeyType::Str,
            max_bucket_size: 0,
            scheme: PartitionScheme::Hash { partitions: 4 },
        }
    }

    #[test]
    fn test_single_node_routes_to_one_bucket() {
        let spec = spec(IndexKind::Hash { unique: false, scope: HashScope::SingleNode });
        let a = spec.bucket_key_for(&IndexValue::from("x")).expect("route");
        let b = spec.bucket_key_for(&IndexValue::from("y")).expect("route");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "app.IJobGrain-_Status");
    }

    #[test]
    fn test_partitioned_routes_by_stable_hash() {
        let spec = spec(IndexKind::Hash { unique: false, scope: HashScope::PartitionedByKey });
        let value = IndexValue::from("k");
        let key = spec.bucket_key_for(&value).expect("route");
        let expected = format!("app.IJobGrain-_Status_{}", value.stable_hash() % 4);
        assert_eq!(key.to_string(), expected);
    }
}
