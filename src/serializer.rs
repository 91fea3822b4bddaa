//! Event batch serialization.
//!
//! The append engine stores a whole batch as one blob. The codec is pluggable;
//! [`JsonSerializer`] is the default.

use crate::stream::Envelope;

#[derive(Debug, thiserror::Error)]
pub enum SerializerError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Codec error: {0}")]
    Codec(String),
}

/// Marshals an event batch to bytes and back.
pub trait Serializer: Send + Sync {
    fn marshal_batch(&self, envelopes: &[Envelope]) -> Result<Vec<u8>, SerializerError>;

    fn unmarshal_batch(&self, data: &[u8]) -> Result<Vec<Envelope>, SerializerError>;
}

/// Batch as a JSON array of envelopes.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn marshal_batch(&self, envelopes: &[Envelope]) -> Result<Vec<u8>, SerializerError> {
        Ok(serde_json::to_vec(envelopes)?)
    }

    fn unmarshal_batch(&self, data: &[u8]) -> Result<Vec<Envelope>, SerializerError> {
        Ok(serde_json::from_slice(data)?)
    }
}
