//! Bucket state machine.
//!
//! One bucket holds one partition's slice of one index: a map from key
//! value to the set of grains carrying that value. Hash indexes use an
//! unordered map, sorted indexes an ordered map. The apply rules
//! implement uniqueness serialization (tentative visibility) and
//! overflow chaining; bucket-full is a boolean return consumed by the
//! chain logic, never an error.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use graindex_types::error::{InvalidArgumentSnafu, UniquenessViolationSnafu};
use graindex_types::{BucketKey, GrainId, IndexName, IndexOp, IndexUpdate, IndexValue, Result, Visibility};

/// Pending operation recorded on an entry by a tentative update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TentativeOp {
    /// Entry is in its steady state.
    #[default]
    None,
    /// Entry was inserted tentatively; hidden from lookups until
    /// confirmed.
    Insert,
    /// Entry is marked for deletion; removal happens on the
    /// non-tentative or transactional delete.
    Delete,
}

/// Map entry for one key: grains carrying the value plus the pending
/// flag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BucketEntry {
    values: HashSet<GrainId>,
    tentative: TentativeOp,
}

impl BucketEntry {
    fn with_grain(grain: GrainId, tentative: TentativeOp) -> Self {
        Self { values: HashSet::from([grain]), tentative }
    }

    /// Grains currently holding this key.
    pub fn values(&self) -> &HashSet<GrainId> {
        &self.values
    }

    /// True when a tentative operation is pending on this entry.
    pub fn is_tentative(&self) -> bool {
        self.tentative != TentativeOp::None
    }

    /// The pending operation, if any.
    pub fn tentative_op(&self) -> TentativeOp {
        self.tentative
    }

    /// True when `grain` holds this key.
    pub fn contains(&self, grain: &GrainId) -> bool {
        self.values.contains(grain)
    }

    /// True when lookups should surface this entry's values.
    ///
    /// Tentative inserts stay hidden until the queue confirms them.
    pub fn is_visible(&self) -> bool {
        self.tentative != TentativeOp::Insert
    }

    fn mark(&mut self, op: TentativeOp) {
        self.tentative = op;
    }
}

/// Lifecycle status of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BucketStatus {
    /// Index build in progress; lookups empty, deletes tombstoned.
    UnderConstruction,
    /// Normal serving state.
    #[default]
    Available,
    /// Tombstoned; retains identity but serves nothing.
    Disposed,
}

impl BucketStatus {
    /// Status label used in errors and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            BucketStatus::UnderConstruction => "UnderConstruction",
            BucketStatus::Available => "Available",
            BucketStatus::Disposed => "Disposed",
        }
    }
}

/// Relation of a query range to a bucket's stored key set.
///
/// Read as "the range is ... the stored keys". Drives the sorted
/// partition traversal: `LessThan` stops, `GreaterThan` skips, partial
/// overlaps decide between query-and-stop and query-and-continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOverlap {
    /// Range lies entirely below the stored keys.
    LessThan,
    /// Range starts below the stored keys and ends inside them.
    PartialLessThan,
    /// Stored keys span the whole range.
    Superset,
    /// Range spans all stored keys (extends below and above).
    Subset,
    /// Range starts inside the stored keys and extends above them.
    PartialGreaterThan,
    /// Range lies entirely above the stored keys.
    GreaterThan,
}

/// Pagination window over lookup results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSpec {
    /// Results to skip.
    pub offset: usize,
    /// Maximum results to return; 0 yields an empty page.
    pub size: usize,
}

impl PageSpec {
    /// A window over everything.
    pub fn all() -> Self {
        Self { offset: 0, size: usize::MAX }
    }

    /// A window of `size` results starting at `offset`.
    pub fn new(offset: usize, size: usize) -> Self {
        Self { offset, size }
    }
}

/// Per-bucket counters surfaced by the actor's status call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketStats {
    /// Applied inserts (including the insert half of updates).
    pub inserts: u64,
    /// Applied deletes (including the delete half of updates).
    pub deletes: u64,
    /// Updates forwarded to the chain successor.
    pub forwards: u64,
}

/// Which map backs the entry set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapKind {
    /// Unordered map; hash indexes.
    Hashed,
    /// Ordered map; sorted indexes.
    Ordered,
}

/// Entry storage, hashed or ordered per index kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum EntryMap {
    Hashed(HashMap<IndexValue, BucketEntry>),
    Ordered(BTreeMap<IndexValue, BucketEntry>),
}

impl EntryMap {
    fn new(kind: MapKind) -> Self {
        match kind {
            MapKind::Hashed => EntryMap::Hashed(HashMap::new()),
            MapKind::Ordered => EntryMap::Ordered(BTreeMap::new()),
        }
    }

    fn len(&self) -> usize {
        match self {
            EntryMap::Hashed(map) => map.len(),
            EntryMap::Ordered(map) => map.len(),
        }
    }

    fn get(&self, key: &IndexValue) -> Option<&BucketEntry> {
        match self {
            EntryMap::Hashed(map) => map.get(key),
            EntryMap::Ordered(map) => map.get(key),
        }
    }

    fn get_mut(&mut self, key: &IndexValue) -> Option<&mut BucketEntry> {
        match self {
            EntryMap::Hashed(map) => map.get_mut(key),
            EntryMap::Ordered(map) => map.get_mut(key),
        }
    }

    fn contains_key(&self, key: &IndexValue) -> bool {
        self.get(key).is_some()
    }

    fn insert(&mut self, key: IndexValue, entry: BucketEntry) {
        match self {
            EntryMap::Hashed(map) => {
                map.insert(key, entry);
            },
            EntryMap::Ordered(map) => {
                map.insert(key, entry);
            },
        }
    }

    fn remove(&mut self, key: &IndexValue) {
        match self {
            EntryMap::Hashed(map) => {
                map.remove(key);
            },
            EntryMap::Ordered(map) => {
                map.remove(key);
            },
        }
    }

    fn min_key(&self) -> Option<&IndexValue> {
        match self {
            EntryMap::Hashed(_) => None,
            EntryMap::Ordered(map) => map.keys().next(),
        }
    }

    fn max_key(&self) -> Option<&IndexValue> {
        match self {
            EntryMap::Hashed(_) => None,
            EntryMap::Ordered(map) => map.keys().next_back(),
        }
    }

    fn range<'a>(
        &'a self,
        bounds: RangeInclusive<IndexValue>,
    ) -> Option<impl Iterator<Item = (&'a IndexValue, &'a BucketEntry)> + 'a> {
        match self {
            EntryMap::Hashed(_) => None,
            EntryMap::Ordered(map) => Some(map.range(bounds)),
        }
    }
}

/// Immutable apply context carried by the owning index.
#[derive(Debug, Clone)]
pub struct ApplyMeta {
    /// Index this bucket belongs to, for error reporting.
    pub index: IndexName,
    /// Unique index: at most one non-tentative grain per key.
    pub unique: bool,
    /// Chain threshold; 0 disables chaining (unbounded bucket).
    pub max_size: usize,
}

/// Result of one apply call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// False when the caller must forward the update to the chain
    /// successor (bucket full, or key not found in a chained bucket).
    pub applied: bool,
    /// The delete arrived while the index was not yet available; the
    /// controller tombstones the key so construction ignores it.
    pub fix_delete_on_unavailable: bool,
}

impl ApplyOutcome {
    fn applied() -> Self {
        Self { applied: true, fix_delete_on_unavailable: false }
    }

    fn forward() -> Self {
        Self { applied: false, fix_delete_on_unavailable: false }
    }
}

/// One bucket's state: entries, chain link, lifecycle status, counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketState {
    entries: EntryMap,
    next_bucket: Option<BucketKey>,
    status: BucketStatus,
    stats: BucketStats,
}

impl BucketState {
    /// Fresh available bucket backed by the given map kind.
    pub fn new(kind: MapKind) -> Self {
        Self {
            entries: EntryMap::new(kind),
            next_bucket: None,
            status: BucketStatus::Available,
            stats: BucketStats::default(),
        }
    }

    /// Number of keys stored here (chain successors not included).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no keys are stored here.
    pub fn is_empty(&self) -> bool {
        self.entries.len() == 0
    }

    /// Current lifecycle status.
    pub fn status(&self) -> BucketStatus {
        self.status
    }

    /// Sets the lifecycle status.
    pub fn set_status(&mut self, status: BucketStatus) {
        self.status = status;
    }

    /// Chain successor, if one was ever allocated.
    pub fn next_bucket(&self) -> Option<&BucketKey> {
        self.next_bucket.as_ref()
    }

    /// Records the chain successor.
    pub fn set_next_bucket(&mut self, key: BucketKey) {
        self.next_bucket = Some(key);
    }

    /// Counter snapshot.
    pub fn stats(&self) -> BucketStats {
        self.stats
    }

    /// Counts one forward to the chain successor.
    pub fn record_forward(&mut self) {
        self.stats.forwards += 1;
    }

    /// Returns the entry for a key, tentative or not.
    ///
    /// Consumers filter by [`BucketEntry::is_visible`]; the entry
    /// reference itself is always returned when present.
    pub fn try_get(&self, key: &IndexValue) -> Option<&BucketEntry> {
        self.entries.get(key)
    }

    /// Returns a page of the grains under `key`, hiding tentative
    /// inserts. Iteration order within an entry is not promised.
    pub fn get_page(&self, key: &IndexValue, page: PageSpec) -> Vec<GrainId> {
        match self.entries.get(key) {
            Some(entry) if entry.is_visible() => {
                entry.values.iter().skip(page.offset).take(page.size).cloned().collect()
            },
            _ => Vec::new(),
        }
    }

    /// Returns a page of grains with keys in `[start, end]`, ascending
    /// by key. Sorted buckets only.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` on a hashed bucket or when
    /// `start > end`.
    pub fn range(&self, start: &IndexValue, end: &IndexValue, page: PageSpec) -> Result<Vec<GrainId>> {
        if start > end {
            return InvalidArgumentSnafu { message: format!("range start {start} > end {end}") }.fail();
        }
        let entries = self.entries.range(start.clone()..=end.clone()).ok_or_else(|| {
            InvalidArgumentSnafu { message: "range lookup on a hashed bucket".to_string() }.build()
        })?;

        Ok(entries
            .filter(|(_, entry)| entry.is_visible())
            .flat_map(|(_, entry)| entry.values.iter().cloned())
            .skip(page.offset)
            .take(page.size)
            .collect())
    }

    /// Smallest and largest stored key. Sorted buckets only; `None`
    /// when empty.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` on a hashed bucket.
    pub fn key_span(&self) -> Result<Option<(IndexValue, IndexValue)>> {
        if matches!(self.entries, EntryMap::Hashed(_)) {
            return InvalidArgumentSnafu { message: "key span on a hashed bucket".to_string() }.fail();
        }
        Ok(match (self.entries.min_key(), self.entries.max_key()) {
            (Some(min), Some(max)) => Some((min.clone(), max.clone())),
            _ => None,
        })
    }

    /// Classifies `[start, end]` against the stored key set.
    ///
    /// An empty bucket reports `GreaterThan`: it can satisfy no part of
    /// any range, and the traversal must skip it and continue.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` on a hashed bucket or when
    /// `start > end`.
    pub fn range_overlap(&self, start: &IndexValue, end: &IndexValue) -> Result<RangeOverlap> {
        if start > end {
            return InvalidArgumentSnafu { message: format!("range start {start} > end {end}") }.fail();
        }
        let (Some(min), Some(max)) = (self.entries.min_key(), self.entries.max_key()) else {
            if matches!(self.entries, EntryMap::Hashed(_)) {
                return InvalidArgumentSnafu { message: "range overlap on a hashed bucket".to_string() }.fail();
            }
            return Ok(RangeOverlap::GreaterThan);
        };

        Ok(Self::classify_range(start, end, min, max))
    }

    /// Pure range classification against a stored key span.
    pub fn classify_range(
        start: &IndexValue,
        end: &IndexValue,
        min: &IndexValue,
        max: &IndexValue,
    ) -> RangeOverlap {
        if end < min {
            RangeOverlap::LessThan
        } else if start > max {
            RangeOverlap::GreaterThan
        } else if start >= min && end <= max {
            RangeOverlap::Superset
        } else if start < min && end <= max {
            RangeOverlap::PartialLessThan
        } else if start >= min {
            RangeOverlap::PartialGreaterThan
        } else {
            RangeOverlap::Subset
        }
    }

    /// Applies one property update for `grain`.
    ///
    /// Returns `applied = false` (no mutation) when the chain logic
    /// must forward: the bucket is full for a new key, or a
    /// delete/update targets a key absent here while a successor
    /// exists.
    ///
    /// # Errors
    ///
    /// - [`UniquenessViolation`](graindex_types::IndexError::UniquenessViolation)
    ///   when an insert or the insert half of an update would put a
    ///   second grain under a unique key.
    /// - [`IndexUnavailable`](graindex_types::IndexError::IndexUnavailable)
    ///   for inserts/updates while not `Available` (deletes instead
    ///   report `fix_delete_on_unavailable`).
    /// - [`InvalidUpdate`](graindex_types::IndexError::InvalidUpdate)
    ///   when the update's images violate its op.
    pub fn apply(&mut self, grain: &GrainId, update: &IndexUpdate, meta: &ApplyMeta) -> Result<ApplyOutcome> {
        update.validate()?;

        if self.status != BucketStatus::Available {
            if update.op == IndexOp::Delete {
                return Ok(ApplyOutcome { applied: true, fix_delete_on_unavailable: true });
            }
            return graindex_types::error::IndexUnavailableSnafu {
                bucket: meta.index.to_string(),
                status: self.status.as_str(),
            }
            .fail();
        }

        match update.op {
            IndexOp::None => Ok(ApplyOutcome::applied()),
            IndexOp::Insert => {
                // Validated: after image present.
                let Some(after) = update.after.as_ref() else { return Ok(ApplyOutcome::applied()) };
                self.apply_insert(grain, after, update.visibility, meta)
            },
            IndexOp::Delete => {
                let Some(before) = update.before.as_ref() else { return Ok(ApplyOutcome::applied()) };
                Ok(self.apply_delete(grain, before, update.visibility, meta))
            },
            IndexOp::Update => {
                let (Some(before), Some(after)) = (update.before.as_ref(), update.after.as_ref())
                else {
                    return Ok(ApplyOutcome::applied());
                };
                self.apply_move(grain, before, after, update.visibility, meta)
            },
        }
    }

    fn is_full(&self, meta: &ApplyMeta) -> bool {
        meta.max_size > 0 && self.entries.len() >= meta.max_size
    }

    fn check_unique(&self, grain: &GrainId, key: &IndexValue, meta: &ApplyMeta) -> Result<()> {
        if meta.unique {
            if let Some(entry) = self.entries.get(key) {
                if !entry.values.is_empty() && !entry.contains(grain) {
                    return UniquenessViolationSnafu {
                        index: meta.index.to_string(),
                        key: key.to_string(),
                    }
                    .fail();
                }
            }
        }
        Ok(())
    }

    fn apply_insert(
        &mut self,
        grain: &GrainId,
        key: &IndexValue,
        visibility: Visibility,
        meta: &ApplyMeta,
    ) -> Result<ApplyOutcome> {
        self.check_unique(grain, key, meta)?;

        match self.entries.get_mut(key) {
            Some(entry) => {
                let newly_added = entry.values.insert(grain.clone());
                match visibility {
                    Visibility::Tentative => entry.mark(TentativeOp::Insert),
                    Visibility::NonTentative | Visibility::Transactional => entry.mark(TentativeOp::None),
                }
                if newly_added {
                    self.stats.inserts += 1;
                }
                Ok(ApplyOutcome::applied())
            },
            None => {
                if self.is_full(meta) {
                    return Ok(ApplyOutcome::forward());
                }
                let tentative = match visibility {
                    Visibility::Tentative => TentativeOp::Insert,
                    _ => TentativeOp::None,
                };
                self.entries.insert(key.clone(), BucketEntry::with_grain(grain.clone(), tentative));
                self.stats.inserts += 1;
                Ok(ApplyOutcome::applied())
            },
        }
    }

    fn apply_delete(
        &mut self,
        grain: &GrainId,
        key: &IndexValue,
        visibility: Visibility,
        meta: &ApplyMeta,
    ) -> ApplyOutcome {
        let holds = self.entries.get(key).is_some_and(|entry| entry.contains(grain));
        if !holds {
            // Chained bucket: the key may live further down the chain.
            // At the tail the delete is idempotent.
            return if self.next_bucket.is_some() {
                ApplyOutcome::forward()
            } else {
                ApplyOutcome::applied()
            };
        }

        // Entry present and holds the grain; the match above guarantees it.
        let Some(entry) = self.entries.get_mut(key) else { return ApplyOutcome::applied() };
        match visibility {
            Visibility::Tentative => {
                entry.mark(TentativeOp::Delete);
                ApplyOutcome::applied()
            },
            Visibility::NonTentative if meta.unique && !entry.is_tentative() => {
                // Confirmed unique entries only leave via a preceding
                // tentative mark or a transactional delete; a stray
                // non-tentative delete (e.g. a replayed reversal) is an
                // idempotent no-op.
                ApplyOutcome::applied()
            },
            Visibility::NonTentative | Visibility::Transactional => {
                entry.values.remove(grain);
                entry.mark(TentativeOp::None);
                if entry.values.is_empty() {
                    self.entries.remove(key);
                }
                self.stats.deletes += 1;
                ApplyOutcome::applied()
            },
        }
    }

    fn apply_move(
        &mut self,
        grain: &GrainId,
        before: &IndexValue,
        after: &IndexValue,
        visibility: Visibility,
        meta: &ApplyMeta,
    ) -> Result<ApplyOutcome> {
        let before_holds = self.entries.get(before).is_some_and(|entry| entry.contains(grain));
        if !before_holds && self.next_bucket.is_some() {
            return Ok(ApplyOutcome::forward());
        }
        // Full and uniqueness are checked before any mutation so that a
        // forwarded or rejected update leaves the bucket untouched.
        if !self.entries.contains_key(after) && self.is_full(meta) {
            return Ok(ApplyOutcome::forward());
        }
        self.check_unique(grain, after, meta)?;

        if before_holds {
            self.apply_delete(grain, before, visibility, meta);
        }
        self.apply_insert(grain, after, visibility, meta)
    }
}

#[cfg(test)]
mod tests {
    use graindex_types::IndexError;

    use super::*;

    fn grain(key: &str) -> GrainId {
        GrainId::new("app.IJobGrain", key)
    }

    fn meta(unique: bool, max_size: usize) -> ApplyMeta {
        ApplyMeta { index: IndexName::from_property("Status"), unique, max_size }
    }

    fn insert(value: &str, visibility: Visibility) -> IndexUpdate {
        IndexUpdate::from_images(None, Some(IndexValue::from(value)), visibility)
    }

    fn delete(value: &str, visibility: Visibility) -> IndexUpdate {
        IndexUpdate::from_images(Some(IndexValue::from(value)), None, visibility)
    }

    fn update(before: &str, after: &str, visibility: Visibility) -> IndexUpdate {
        IndexUpdate::from_images(
            Some(IndexValue::from(before)),
            Some(IndexValue::from(after)),
            visibility,
        )
    }

    #[test]
    fn test_insert_then_lookup() {
        let mut bucket = BucketState::new(MapKind::Hashed);
        let outcome = bucket
            .apply(&grain("g1"), &insert("Started", Visibility::NonTentative), &meta(false, 0))
            .expect("insert");
        assert!(outcome.applied);

        let page = bucket.get_page(&IndexValue::from("Started"), PageSpec::all());
        assert_eq!(page, vec![grain("g1")]);
    }

    #[test]
    fn test_tentative_insert_is_hidden_until_confirmed() {
        let mut bucket = BucketState::new(MapKind::Hashed);
        bucket
            .apply(&grain("g1"), &insert("P1", Visibility::Tentative), &meta(true, 0))
            .expect("tentative insert");

        let entry = bucket.try_get(&IndexValue::from("P1")).expect("entry exists");
        assert!(entry.is_tentative());
        assert!(bucket.get_page(&IndexValue::from("P1"), PageSpec::all()).is_empty());

        bucket
            .apply(&grain("g1"), &insert("P1", Visibility::NonTentative), &meta(true, 0))
            .expect("confirm");
        assert_eq!(bucket.get_page(&IndexValue::from("P1"), PageSpec::all()), vec![grain("g1")]);
    }

    #[test]
    fn test_unique_violation_blocks_second_grain() {
        let mut bucket = BucketState::new(MapKind::Hashed);
        bucket
            .apply(&grain("g1"), &insert("P1", Visibility::Tentative), &meta(true, 0))
            .expect("first insert");

        let err = bucket
            .apply(&grain("g2"), &insert("P1", Visibility::Tentative), &meta(true, 0))
            .expect_err("second insert");
        assert!(matches!(err, IndexError::UniquenessViolation { .. }));
        // Failed apply must not leave g2 behind.
        let entry = bucket.try_get(&IndexValue::from("P1")).expect("entry");
        assert!(!entry.contains(&grain("g2")));
    }

    #[test]
    fn test_non_unique_key_holds_many_grains() {
        let mut bucket = BucketState::new(MapKind::Hashed);
        for key in ["g1", "g2", "g3"] {
            bucket
                .apply(&grain(key), &insert("Started", Visibility::NonTentative), &meta(false, 0))
                .expect("insert");
        }
        assert_eq!(bucket.get_page(&IndexValue::from("Started"), PageSpec::all()).len(), 3);
    }

    #[test]
    fn test_tentative_delete_defers_removal() {
        let mut bucket = BucketState::new(MapKind::Hashed);
        bucket
            .apply(&grain("g1"), &insert("P1", Visibility::NonTentative), &meta(true, 0))
            .expect("insert");

        bucket
            .apply(&grain("g1"), &delete("P1", Visibility::Tentative), &meta(true, 0))
            .expect("tentative delete");
        let entry = bucket.try_get(&IndexValue::from("P1")).expect("still present");
        assert_eq!(entry.tentative_op(), TentativeOp::Delete);

        bucket
            .apply(&grain("g1"), &delete("P1", Visibility::NonTentative), &meta(true, 0))
            .expect("confirm delete");
        assert!(bucket.try_get(&IndexValue::from("P1")).is_none());
    }

    #[test]
    fn test_unique_non_tentative_delete_without_flag_is_noop() {
        let mut bucket = BucketState::new(MapKind::Hashed);
        bucket
            .apply(&grain("g1"), &insert("P1", Visibility::NonTentative), &meta(true, 0))
            .expect("insert");

        // A replayed reversal hitting a confirmed entry must not remove it.
        bucket
            .apply(&grain("g1"), &delete("P1", Visibility::NonTentative), &meta(true, 0))
            .expect("stray delete");
        assert!(bucket.try_get(&IndexValue::from("P1")).is_some());

        // A transactional delete does remove it.
        bucket
            .apply(&grain("g1"), &delete("P1", Visibility::Transactional), &meta(true, 0))
            .expect("transactional delete");
        assert!(bucket.try_get(&IndexValue::from("P1")).is_none());
    }

    #[test]
    fn test_full_bucket_forwards_without_mutation() {
        let mut bucket = BucketState::new(MapKind::Hashed);
        bucket
            .apply(&grain("g1"), &insert("a", Visibility::NonTentative), &meta(false, 1))
            .expect("fills the bucket");

        let outcome = bucket
            .apply(&grain("g2"), &insert("b", Visibility::NonTentative), &meta(false, 1))
            .expect("forwarded");
        assert!(!outcome.applied);
        assert_eq!(bucket.len(), 1);

        // An existing key still accepts new grains when full.
        let outcome = bucket
            .apply(&grain("g3"), &insert("a", Visibility::NonTentative), &meta(false, 1))
            .expect("existing key");
        assert!(outcome.applied);
    }

    #[test]
    fn test_delete_absent_key_chained_vs_tail() {
        let mut bucket = BucketState::new(MapKind::Hashed);

        // Tail: idempotent.
        let outcome = bucket
            .apply(&grain("g1"), &delete("missing", Visibility::NonTentative), &meta(false, 1))
            .expect("tail delete");
        assert!(outcome.applied);

        // Chained: forward.
        bucket.set_next_bucket(
            BucketKey::partitioned(
                graindex_types::InterfaceName::new("app.IJobGrain"),
                &IndexName::from_property("Status"),
                "0",
            )
            .successor(),
        );
        let outcome = bucket
            .apply(&grain("g1"), &delete("missing", Visibility::NonTentative), &meta(false, 1))
            .expect("chained delete");
        assert!(!outcome.applied);
    }

    #[test]
    fn test_move_within_bucket() {
        let mut bucket = BucketState::new(MapKind::Hashed);
        bucket
            .apply(&grain("g1"), &insert("Started", Visibility::NonTentative), &meta(false, 0))
            .expect("insert");

        bucket
            .apply(&grain("g1"), &update("Started", "Error", Visibility::NonTentative), &meta(false, 0))
            .expect("move");
        assert!(bucket.try_get(&IndexValue::from("Started")).is_none());
        assert_eq!(bucket.get_page(&IndexValue::from("Error"), PageSpec::all()), vec![grain("g1")]);
    }

    #[test]
    fn test_move_unique_violation_leaves_bucket_untouched() {
        let mut bucket = BucketState::new(MapKind::Hashed);
        bucket
            .apply(&grain("g1"), &insert("A", Visibility::NonTentative), &meta(true, 0))
            .expect("insert g1");
        bucket
            .apply(&grain("g2"), &insert("B", Visibility::NonTentative), &meta(true, 0))
            .expect("insert g2");

        let err = bucket
            .apply(&grain("g2"), &update("B", "A", Visibility::NonTentative), &meta(true, 0))
            .expect_err("collision");
        assert!(matches!(err, IndexError::UniquenessViolation { .. }));
        // Neither half applied.
        assert!(bucket.try_get(&IndexValue::from("B")).expect("B intact").contains(&grain("g2")));
    }

    #[test]
    fn test_unavailable_bucket_rejects_inserts_and_flags_deletes() {
        let mut bucket = BucketState::new(MapKind::Hashed);
        bucket.set_status(BucketStatus::UnderConstruction);

        let err = bucket
            .apply(&grain("g1"), &insert("a", Visibility::NonTentative), &meta(false, 0))
            .expect_err("insert rejected");
        assert!(matches!(err, IndexError::IndexUnavailable { .. }));

        let outcome = bucket
            .apply(&grain("g1"), &delete("a", Visibility::NonTentative), &meta(false, 0))
            .expect("delete flagged");
        assert!(outcome.fix_delete_on_unavailable);
    }

    #[test]
    fn test_range_and_paging() {
        let mut bucket = BucketState::new(MapKind::Ordered);
        for (g, v) in [("g1", 10i64), ("g2", 20), ("g3", 30), ("g4", 40)] {
            let upd = IndexUpdate::from_images(None, Some(IndexValue::from(v)), Visibility::NonTentative);
            bucket.apply(&grain(g), &upd, &meta(false, 0)).expect("insert");
        }

        let hits = bucket
            .range(&IndexValue::from(15i64), &IndexValue::from(35i64), PageSpec::all())
            .expect("range");
        assert_eq!(hits, vec![grain("g2"), grain("g3")]);

        // offset beyond matches → empty; size 0 → empty.
        assert!(bucket
            .range(&IndexValue::from(15i64), &IndexValue::from(35i64), PageSpec::new(5, 10))
            .expect("offset past end")
            .is_empty());
        assert!(bucket
            .range(&IndexValue::from(15i64), &IndexValue::from(35i64), PageSpec::new(0, 0))
            .expect("zero size")
            .is_empty());
    }

    #[test]
    fn test_range_rejects_inverted_bounds() {
        let bucket = BucketState::new(MapKind::Ordered);
        let err = bucket
            .range(&IndexValue::from(5i64), &IndexValue::from(1i64), PageSpec::all())
            .expect_err("inverted");
        assert!(matches!(err, IndexError::InvalidArgument { .. }));
    }

    #[test]
    fn test_range_overlap_verdicts() {
        let mut bucket = BucketState::new(MapKind::Ordered);
        for (g, v) in [("g1", 10i64), ("g2", 20)] {
            let upd = IndexUpdate::from_images(None, Some(IndexValue::from(v)), Visibility::NonTentative);
            bucket.apply(&grain(g), &upd, &meta(false, 0)).expect("insert");
        }
        let overlap = |s: i64, e: i64| {
            bucket.range_overlap(&IndexValue::from(s), &IndexValue::from(e)).expect("overlap")
        };

        assert_eq!(overlap(1, 5), RangeOverlap::LessThan);
        assert_eq!(overlap(5, 15), RangeOverlap::PartialLessThan);
        assert_eq!(overlap(12, 18), RangeOverlap::Superset);
        assert_eq!(overlap(5, 25), RangeOverlap::Subset);
        assert_eq!(overlap(15, 25), RangeOverlap::PartialGreaterThan);
        assert_eq!(overlap(25, 30), RangeOverlap::GreaterThan);
    }

    #[test]
    fn test_range_overlap_empty_bucket_skips() {
        let bucket = BucketState::new(MapKind::Ordered);
        let overlap = bucket
            .range_overlap(&IndexValue::from(1i64), &IndexValue::from(5i64))
            .expect("empty bucket");
        assert_eq!(overlap, RangeOverlap::GreaterThan);
    }

    #[test]
    fn test_state_roundtrips_through_codec() {
        let mut bucket = BucketState::new(MapKind::Ordered);
        bucket
            .apply(
                &grain("g1"),
                &IndexUpdate::from_images(None, Some(IndexValue::from(7i64)), Visibility::NonTentative),
                &meta(false, 0),
            )
            .expect("insert");
        bucket.set_next_bucket(BucketKey::partitioned(
            graindex_types::InterfaceName::new("app.IJobGrain"),
            &IndexName::from_property("Level"),
            "2",
        ));

        let bytes = graindex_types::encode(&bucket).expect("encode");
        let decoded: BucketState = graindex_types::decode(&bytes).expect("decode");
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.next_bucket(), bucket.next_bucket());
        assert_eq!(decoded.stats(), bucket.stats());
    }
}
