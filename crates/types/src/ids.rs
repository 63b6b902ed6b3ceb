//! Identifier types for the indexing system.
//!
//! String-keyed identifiers (grain interfaces, index names, queue
//! instances) wrap `String` for compile-time type safety; the action id
//! wraps a UUIDv4 since it is the unit of durable dequeue/acknowledge.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generates a newtype wrapper around `String` for type-safe identifiers.
///
/// Each generated type provides:
/// - Standard derives: Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord
/// - Serde with `#[serde(transparent)]` for wire format compatibility
/// - `From<&str>` / `From<String>` conversions
/// - `Display` printing the raw value
/// - `new()` constructor and `as_str()` accessor
macro_rules! define_str_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord,
            Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier from a raw value.
            #[inline]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the raw string value.
            #[inline]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            #[inline]
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            #[inline]
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

define_str_id!(
    /// Full name of an indexable grain interface.
    ///
    /// Doubles as the first segment of bucket primary keys, so it must
    /// not contain `-`.
    InterfaceName
);

define_str_id!(
    /// Name of one index over an indexed-state class.
    ///
    /// Derived from the indexed property name prefixed with `_`, e.g.
    /// property `Status` yields index name `_Status`.
    IndexName
);

define_str_id!(
    /// Identity of one write-ahead indexing queue instance.
    ///
    /// Formatted `{interface}@{node}` so that a grain migrating between
    /// nodes observes a queue-identity change and transfers its pending
    /// actions (see the controller's activation recovery).
    QueueId
);

impl IndexName {
    /// Derives the index name for an indexed property: `_` + property name.
    pub fn from_property(property: &str) -> Self {
        Self(format!("_{property}"))
    }
}

impl QueueId {
    /// Builds the queue identity for an interface hosted on a node.
    pub fn for_interface(interface: &InterfaceName, node: &str) -> Self {
        Self(format!("{interface}@{node}"))
    }
}

/// Identity of a grain: interface plus primary key.
///
/// Grain ids are resolved to live activations through the grain
/// directory; index buckets store them as opaque set members.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GrainId {
    /// Interface the grain implements.
    pub interface: InterfaceName,
    /// Primary key within the interface.
    pub key: String,
}

impl GrainId {
    /// Creates a grain id from an interface and primary key.
    pub fn new(interface: impl Into<InterfaceName>, key: impl Into<String>) -> Self {
        Self { interface: interface.into(), key: key.into() }
    }
}

impl fmt::Display for GrainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.interface, self.key)
    }
}

/// Identity of one indexing action (UUIDv4).
///
/// The action id is the unit of dequeue and acknowledge between the
/// indexing queue and the owning grain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(Uuid);

impl ActionId {
    /// Generates a fresh random action id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[inline]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "action:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_name_from_property() {
        let name = IndexName::from_property("Status");
        assert_eq!(name.as_str(), "_Status");
    }

    #[test]
    fn test_queue_id_format() {
        let interface = InterfaceName::new("app.IPlayerGrain");
        let id = QueueId::for_interface(&interface, "node-1");
        assert_eq!(id.as_str(), "app.IPlayerGrain@node-1");
    }

    #[test]
    fn test_grain_id_display() {
        let grain = GrainId::new("app.IPlayerGrain", "g1");
        assert_eq!(grain.to_string(), "app.IPlayerGrain/g1");
    }

    #[test]
    fn test_action_ids_are_unique() {
        let a = ActionId::generate();
        let b = ActionId::generate();
        assert_ne!(a, b);
    }
}
