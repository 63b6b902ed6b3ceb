//! Bucket primary-key encoding.
//!
//! A bucket's identity is a deterministic string so that chain
//! successors and routing targets are derived, never held as
//! references:
//!
//! - head bucket of a partition: `{interface}-{index}_{partition}`
//! - single-node (unpartitioned) head: `{interface}-{index}`
//! - chain successor n (n >= 1):  `{head}-{n}`
//!
//! The interface segment must not contain `-` (see
//! [`InterfaceName`](crate::ids::InterfaceName)); the index segment
//! carries the `_`-prefixed index name and the partition suffix.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use snafu::Snafu;

use crate::ids::{IndexName, InterfaceName};

/// Bucket primary key: interface, index segment, chain position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketKey {
    interface: InterfaceName,
    segment: String,
    chain: u32,
}

/// Error parsing a bucket primary key.
#[derive(Debug, Snafu)]
pub enum BucketKeyError {
    /// The key does not match the `{interface}-{index}[-{n}]` shape.
    #[snafu(display("malformed bucket key: {key}"))]
    Malformed {
        /// The offending key string.
        key: String,
    },
}

impl BucketKey {
    /// Head bucket of one partition of a partitioned index.
    pub fn partitioned(interface: InterfaceName, index: &IndexName, partition: &str) -> Self {
        Self { interface, segment: format!("{index}_{partition}"), chain: 0 }
    }

    /// Head bucket of a single-node (unpartitioned) index.
    pub fn single_node(interface: InterfaceName, index: &IndexName) -> Self {
        Self { interface, segment: index.as_str().to_string(), chain: 0 }
    }

    /// Derives the next bucket in the overflow chain.
    pub fn successor(&self) -> Self {
        Self { interface: self.interface.clone(), segment: self.segment.clone(), chain: self.chain + 1 }
    }

    /// Interface that owns the index.
    #[inline]
    pub fn interface(&self) -> &InterfaceName {
        &self.interface
    }

    /// Index segment (index name plus partition suffix, if any).
    #[inline]
    pub fn index_segment(&self) -> &str {
        &self.segment
    }

    /// Position in the overflow chain (0 = head).
    #[inline]
    pub fn chain(&self) -> u32 {
        self.chain
    }

    /// True for the first bucket of a chain.
    #[inline]
    pub fn is_head(&self) -> bool {
        self.chain == 0
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.chain == 0 {
            write!(f, "{}-{}", self.interface, self.segment)
        } else {
            write!(f, "{}-{}-{}", self.interface, self.segment, self.chain)
        }
    }
}

impl FromStr for BucketKey {
    type Err = BucketKeyError;

    /// Parses `{interface}-{index}` or `{interface}-{index}-{n}`.
    ///
    /// In the three-segment form the index segment sits between the
    /// first and the last `-`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (interface, rest) =
            s.split_once('-').ok_or_else(|| BucketKeyError::Malformed { key: s.to_string() })?;
        if interface.is_empty() || rest.is_empty() {
            return Err(BucketKeyError::Malformed { key: s.to_string() });
        }

        let (segment, chain) = match rest.rsplit_once('-') {
            Some((segment, n)) if !segment.is_empty() => {
                let chain = n.parse::<u32>().map_err(|_| BucketKeyError::Malformed { key: s.to_string() })?;
                if chain == 0 {
                    return Err(BucketKeyError::Malformed { key: s.to_string() });
                }
                (segment.to_string(), chain)
            },
            Some(_) => return Err(BucketKeyError::Malformed { key: s.to_string() }),
            None => (rest.to_string(), 0),
        };

        Ok(Self { interface: InterfaceName::new(interface), segment, chain })
    }
}
