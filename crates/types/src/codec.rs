//! Centralized serialization for durable state.
//!
//! Bucket states, grain envelopes, and queue states all round-trip
//! through these two functions so the wire format (postcard) is chosen
//! in exactly one place and survives process restarts.

use serde::{Serialize, de::DeserializeOwned};
use snafu::Snafu;

/// Error type for codec operations.
#[derive(Debug, Snafu)]
pub enum CodecError {
    /// Encoding failed.
    #[snafu(display("encoding failed: {source}"))]
    Encode {
        /// The underlying postcard error.
        source: postcard::Error,
    },

    /// Decoding failed.
    #[snafu(display("decoding failed: {source}"))]
    Decode {
        /// The underlying postcard error.
        source: postcard::Error,
    },
}

/// Encodes a value to bytes.
///
/// # Errors
///
/// Returns `CodecError::Encode` if serialization fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(value).map_err(|source| CodecError::Encode { source })
}

/// Decodes bytes to a value.
///
/// # Errors
///
/// Returns `CodecError::Decode` if deserialization fails.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    postcard::from_bytes(bytes).map_err(|source| CodecError::Decode { source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::GrainId;
    use crate::update::{IndexUpdate, Visibility};
    use crate::value::IndexValue;

    #[test]
    fn test_roundtrip_update() {
        let update = IndexUpdate::from_images(
            Some(IndexValue::from("Started")),
            Some(IndexValue::from("Error")),
            Visibility::NonTentative,
        );
        let bytes = encode(&update).expect("encode update");
        let decoded: IndexUpdate = decode(&bytes).expect("decode update");
        assert_eq!(update, decoded);
    }

    #[test]
    fn test_roundtrip_grain_id() {
        let grain = GrainId::new("app.IPlayerGrain", "g42");
        let bytes = encode(&grain).expect("encode grain id");
        let decoded: GrainId = decode(&bytes).expect("decode grain id");
        assert_eq!(grain, decoded);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result: Result<GrainId, _> = decode(&[0xff, 0xff, 0xff, 0xff]);
        assert!(result.is_err());
    }
}
