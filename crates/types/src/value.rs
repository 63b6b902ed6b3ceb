//! Index key values.
//!
//! An index stores one key type for its whole lifetime; the tagged
//! [`IndexValue`] lets descriptors, buckets, and routers handle all key
//! types through one representation without per-update reflection. The
//! ordering derives are what the sorted bucket map relies on.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Declared key type of one index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyType {
    /// UTF-8 string keys.
    Str,
    /// Signed 64-bit integer keys.
    Int,
    /// UTC instant keys (sorted date-time indexes).
    Time,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::Str => f.write_str("string"),
            KeyType::Int => f.write_str("int64"),
            KeyType::Time => f.write_str("datetime"),
        }
    }
}

/// One index key value.
///
/// Values of a single index always carry the same variant; the variant
/// order backs `Ord` only within one variant in practice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IndexValue {
    /// String key.
    Str(String),
    /// Integer key.
    Int(i64),
    /// UTC instant key.
    Time(DateTime<Utc>),
}

impl IndexValue {
    /// Returns the key type of this value.
    pub fn key_type(&self) -> KeyType {
        match self {
            IndexValue::Str(_) => KeyType::Str,
            IndexValue::Int(_) => KeyType::Int,
            IndexValue::Time(_) => KeyType::Time,
        }
    }
}

impl fmt::Display for IndexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexValue::Str(s) => f.write_str(s),
            IndexValue::Int(i) => write!(f, "{i}"),
            IndexValue::Time(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

impl From<&str> for IndexValue {
    fn from(value: &str) -> Self {
        IndexValue::Str(value.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(value: String) -> Self {
        IndexValue::Str(value)
    }
}

impl From<i64> for IndexValue {
    fn from(value: i64) -> Self {
        IndexValue::Int(value)
    }
}

impl From<DateTime<Utc>> for IndexValue {
    fn from(value: DateTime<Utc>) -> Self {
        IndexValue::Time(value)
    }
}

/// Conversion trait for typed property readers.
///
/// Binding the key type to the reader's return type at schema-build time
/// makes key-type mismatches unrepresentable.
pub trait IntoIndexValue: Into<IndexValue> {
    /// Key type produced by this Rust type.
    const KEY_TYPE: KeyType;
}

impl IntoIndexValue for String {
    const KEY_TYPE: KeyType = KeyType::Str;
}

impl IntoIndexValue for i64 {
    const KEY_TYPE: KeyType = KeyType::Int;
}

impl IntoIndexValue for DateTime<Utc> {
    const KEY_TYPE: KeyType = KeyType::Time;
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_key_type_of_value() {
        assert_eq!(IndexValue::from("a").key_type(), KeyType::Str);
        assert_eq!(IndexValue::from(7i64).key_type(), KeyType::Int);
        let t = Utc.with_ymd_and_hms(2024, 10, 11, 0, 0, 0).unwrap();
        assert_eq!(IndexValue::from(t).key_type(), KeyType::Time);
    }

    #[test]
    fn test_ordering_within_variant() {
        assert!(IndexValue::from("a") < IndexValue::from("b"));
        assert!(IndexValue::from(1i64) < IndexValue::from(2i64));
        let t1 = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
        assert!(IndexValue::from(t1) < IndexValue::from(t2));
    }
}
