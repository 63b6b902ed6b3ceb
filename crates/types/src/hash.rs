//! Stable partition hashing.
//!
//! Hash-index routing must be bit-exact across process runs and hosts,
//! so the default hashers (randomized, platform-dependent) are off the
//! table. Strings use a fixed unchecked 32-bit polynomial over their
//! UTF-16 code units; all other key types hash a canonical big-endian
//! byte encoding with the byte-wise variant of the same polynomial.

use chrono::{DateTime, Utc};

use crate::value::IndexValue;

const HASH_SEED: u32 = (5381 << 16) + 5381;
const HASH_MIX: u32 = 1_566_083_941;

/// Stable 32-bit hash of a string.
///
/// Unchecked arithmetic over UTF-16 code-unit pairs:
/// `h1 = ((h1 << 5) + h1) ^ c[i]`, `h2 = ((h2 << 5) + h2) ^ c[i+1]`,
/// result `h1 + h2 * 1566083941`.
pub fn stable_string_hash(s: &str) -> u32 {
    let mut h1 = HASH_SEED;
    let mut h2 = HASH_SEED;

    let mut units = s.encode_utf16();
    while let Some(first) = units.next() {
        h1 = (h1 << 5).wrapping_add(h1) ^ u32::from(first);
        if let Some(second) = units.next() {
            h2 = (h2 << 5).wrapping_add(h2) ^ u32::from(second);
        }
    }

    h1.wrapping_add(h2.wrapping_mul(HASH_MIX))
}

/// Stable 32-bit hash of a canonical byte encoding.
///
/// Same pairwise polynomial as [`stable_string_hash`], taken over bytes
/// instead of UTF-16 code units.
pub fn stable_bytes_hash(bytes: &[u8]) -> u32 {
    let mut h1 = HASH_SEED;
    let mut h2 = HASH_SEED;

    let mut iter = bytes.iter();
    while let Some(&first) = iter.next() {
        h1 = (h1 << 5).wrapping_add(h1) ^ u32::from(first);
        if let Some(&second) = iter.next() {
            h2 = (h2 << 5).wrapping_add(h2) ^ u32::from(second);
        }
    }

    h1.wrapping_add(h2.wrapping_mul(HASH_MIX))
}

/// Canonical instant encoding: microseconds since the Unix epoch, BE.
fn canonical_time_bytes(t: &DateTime<Utc>) -> [u8; 8] {
    t.timestamp_micros().to_be_bytes()
}

impl IndexValue {
    /// Stable partition hash of this key value.
    pub fn stable_hash(&self) -> u32 {
        match self {
            IndexValue::Str(s) => stable_string_hash(s),
            IndexValue::Int(i) => stable_bytes_hash(&i.to_be_bytes()),
            IndexValue::Time(t) => stable_bytes_hash(&canonical_time_bytes(t)),
        }
    }
}
