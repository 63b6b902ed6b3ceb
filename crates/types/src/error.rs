//! Error types for graindex using snafu.
//!
//! One taxonomy crosses the whole system: uniqueness violations surface
//! as a dedicated typed error (they abort grain commits), storage
//! conflicts drive the retry policy, and queue failures deactivate the
//! queue actor. Bucket-full is deliberately NOT an error; chaining
//! consumes it as a boolean return.

use snafu::{Location, Snafu};

/// Unified result type for indexing operations.
pub type Result<T, E = IndexError> = std::result::Result<T, E>;

/// Top-level error type for indexing operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum IndexError {
    /// An insert/update would put a second grain under a unique key.
    #[snafu(display("uniqueness violation on index {index}: key {key} is already taken"))]
    UniquenessViolation {
        /// Index name.
        index: String,
        /// Offending key value.
        key: String,
    },

    /// Update images violate the op preconditions. Programmer error.
    #[snafu(display("invalid update at {location}: {message}"))]
    InvalidUpdate {
        /// Description of the violated precondition.
        message: String,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// Operation against a bucket that is under construction or disposed.
    #[snafu(display("bucket {bucket} is unavailable ({status})"))]
    IndexUnavailable {
        /// Bucket primary key.
        bucket: String,
        /// Current bucket status.
        status: String,
    },

    /// Persistence failed after exhausting the retry policy.
    #[snafu(display("storage error at {location}: {message}"))]
    Storage {
        /// Error description.
        message: String,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// Unhandled failure in the queue drain loop; deactivates the queue.
    #[snafu(display("queue processing failure at {location}: {message}"))]
    QueueProcessing {
        /// Error description.
        message: String,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// Serialization or deserialization of durable state failed.
    #[snafu(display("codec error at {location}: {source}"))]
    Codec {
        /// Underlying codec error.
        source: crate::codec::CodecError,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// Configuration error.
    #[snafu(display("configuration error: {message}"))]
    Config {
        /// Error description.
        message: String,
    },

    /// Invalid argument.
    #[snafu(display("invalid argument: {message}"))]
    InvalidArgument {
        /// Error description.
        message: String,
    },

    /// Internal error (unexpected state).
    #[snafu(display("internal error at {location}: {message}"))]
    Internal {
        /// Error description.
        message: String,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },
}

impl IndexError {
    /// True for uniqueness violations, which abort commits instead of
    /// propagating as infrastructure failures.
    #[inline]
    pub fn is_uniqueness_violation(&self) -> bool {
        matches!(self, IndexError::UniquenessViolation { .. })
    }
}
