//! JSON codec for relay wire frames.
//!
//! Frames are UTF-8 JSON text; browser clients speak this natively over
//! WebSocket text messages. Both event enums (and any other serde type)
//! go through the same pair of functions.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The frame is not valid JSON or does not match the expected shape.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

/// Encodes a value into a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the value cannot be serialized.
pub fn encode<T: Serialize>(value: &T) -> Result<String, CodecError> {
    serde_json::to_string(value).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a value from a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::Deserialization`] if the frame is not valid JSON
/// or does not match `T`.
pub fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, CodecError> {
    serde_json::from_str(raw).map_err(|e| CodecError::Deserialization(e.to_string()))
}
