//! Partition routing and index clients.
//!
//! The router is pure: key to bucket id, range to ordered bucket ids.
//! The client is stateless fan-in/fan-out over bucket actors: it
//! recomputes routing on every call, splits updates that cross
//! partitions, and drives the overlap-guided traversal for sorted range
//! lookups.

pub mod client;
pub mod partition;
pub mod spec;

pub use client::IndexClient;
pub use partition::PartitionScheme;
pub use spec::{HashScope, IndexKind, IndexSpec};
