//! Binary codec shared by the wire messages and the persisted topology
//!
//! Everything goes through bincode's serde bridge with the standard config,
//! so the encoding is deterministic for equal values.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Codec error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("trailing bytes after decode: {0}")]
    TrailingBytes(usize),
}

/// Encode a value to bytes
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decode a value, rejecting input that is longer than the encoded value
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    let (value, read) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| CodecError::Decode(e.to_string()))?;
    if read != bytes.len() {
        return Err(CodecError::TrailingBytes(bytes.len() - read));
    }
    Ok(value)
}
