//! Core types, identifiers, and configuration for graindex.
//!
//! This crate provides the foundational types used throughout the
//! indexing system:
//! - Identifier newtypes (GrainId, IndexName, ActionId, QueueId)
//! - Index key values and the stable partition hash
//! - The indexed-property update and indexing-action model
//! - Bucket primary-key encoding
//! - Error types using snafu
//! - Configuration under the `IndexingSystem` section

pub mod action;
pub mod bucket_key;
pub mod codec;
pub mod config;
pub mod error;
pub mod hash;
pub mod ids;
pub mod update;
pub mod value;

// Re-export commonly used types at crate root
pub use action::IndexingAction;
pub use bucket_key::BucketKey;
pub use codec::{CodecError, decode, encode};
pub use config::{IndexingConfig, PartitionBin, StorageRetryConfig};
pub use error::{IndexError, Result};
pub use hash::{stable_bytes_hash, stable_string_hash};
pub use ids::{ActionId, GrainId, IndexName, InterfaceName, QueueId};
pub use update::{IndexOp, IndexUpdate, Visibility};
pub use value::{IndexValue, KeyType};
