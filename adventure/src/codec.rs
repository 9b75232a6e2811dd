//! Message and state serialization.
//!
//! Every request body, reply body and persisted actor state goes through
//! [`JsonCodec`]. JSON keeps the store contents and wire traffic readable
//! while debugging a cluster.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Error type for codec operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Failed to encode a value to bytes.
    #[error("encode error: {0}")]
    Encode(#[source] serde_json::Error),
    /// Failed to decode bytes into a value.
    #[error("decode error: {0}")]
    Decode(#[source] serde_json::Error),
}

/// JSON codec based on `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    /// Serialize a value to JSON bytes.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(CodecError::Encode)
    }

    /// Deserialize JSON bytes into a value.
    pub fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buf).map_err(CodecError::Decode)
    }
}
