//! Binary codec for chunked documents
//!
//! Values are encoded as MessagePack with named map keys. Only the chunking
//! path uses this codec; everything else is stored as plain documents.

use serde_json::Value;
use thiserror::Error;

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Codec errors
#[derive(Debug, Clone, Error)]
pub enum CodecError {
    #[error("Failed to encode value: {0}")]
    Encode(String),

    #[error("Failed to decode value: {0}")]
    Decode(String),
}

/// Serialize a value into a byte buffer
pub fn encode(value: &Value) -> CodecResult<Vec<u8>> {
    rmp_serde::to_vec_named(value).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Deserialize a value from a byte buffer
pub fn decode(bytes: &[u8]) -> CodecResult<Value> {
    rmp_serde::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}
