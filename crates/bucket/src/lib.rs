//! Bucket state machine and bucket actors.
//!
//! Each index is physically partitioned into buckets; each bucket is an
//! addressable actor holding one [`BucketState`]. The state machine
//! applies insert/update/delete with uniqueness and tentative-visibility
//! rules and chains into a successor bucket on overflow; the actor adds
//! persistence, chain forwarding, and the read/write interleaving
//! policy (mutations serialized, lookups shared).

pub mod actor;
pub mod host;
pub mod state;

pub use actor::{BucketActor, BucketConfig};
pub use host::BucketHost;
pub use state::{
    ApplyMeta, ApplyOutcome, BucketEntry, BucketState, BucketStats, BucketStatus, MapKind,
    PageSpec, RangeOverlap, TentativeOp,
};
