//! Explicit event-type registry.
//!
//! Maps a stored event type name to a decode function producing the
//! application's own tagged union. Owned by whoever needs type resolution;
//! there is no process-wide table.

use std::collections::HashMap;

use serde::de::DeserializeOwned;

use super::Envelope;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown event type: {0}")]
    UnknownType(String),

    #[error("Failed to decode {event_type}: {message}")]
    Decode { event_type: String, message: String },
}

type Decoder<T> = Box<dyn Fn(&[u8]) -> Result<T, RegistryError> + Send + Sync>;

/// Event type name -> decoder into `T`.
pub struct Registry<T> {
    decoders: HashMap<String, Decoder<T>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a raw decoder. A later registration for the same name wins.
    pub fn register<F>(&mut self, event_type: impl Into<String>, decode: F) -> &mut Self
    where
        F: Fn(&[u8]) -> Result<T, RegistryError> + Send + Sync + 'static,
    {
        self.decoders.insert(event_type.into(), Box::new(decode));
        self
    }

    /// Register a JSON payload type and the variant constructor wrapping it.
    pub fn register_json<E>(&mut self, event_type: impl Into<String>, wrap: fn(E) -> T) -> &mut Self
    where
        E: DeserializeOwned + 'static,
        T: 'static,
    {
        let name = event_type.into();
        let label = name.clone();
        self.register(name, move |bytes| {
            serde_json::from_slice::<E>(bytes)
                .map(wrap)
                .map_err(|e| RegistryError::Decode {
                    event_type: label.clone(),
                    message: e.to_string(),
                })
        })
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    /// Decode an envelope's payload by its event type.
    pub fn decode(&self, envelope: &Envelope) -> Result<T, RegistryError> {
        let decode = self
            .decoders
            .get(&envelope.event_type)
            .ok_or_else(|| RegistryError::UnknownType(envelope.event_type.clone()))?;
        decode(&envelope.payload)
    }
}
