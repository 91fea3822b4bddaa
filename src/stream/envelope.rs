//! Envelopes and the `wrap` constructor.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::StreamId;
use crate::error::{Error, Result};
use crate::serializer::SerializerError;
use crate::version::{Version, VersionError};

/// A domain event that can be wrapped into an [`Envelope`].
pub trait DomainEvent: Serialize {
    /// Type name stored alongside the payload.
    fn event_type(&self) -> &str;
}

/// One stored event plus its metadata.
///
/// Mutable until durably appended; the engine never rewrites an envelope
/// after its record is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(with = "payload_base64")]
    pub payload: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Version::is_zero")]
    pub version: Version,
    #[serde(default, skip_serializing_if = "Version::is_zero")]
    pub global_version: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destinations: Vec<String>,
    /// Time to live in seconds; the record expires at append time plus the
    /// largest TTL in its batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    pub stream_id: StreamId,
}

impl Envelope {
    /// Build an envelope with a fresh id and the current time.
    pub fn new(stream_id: StreamId, event_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            payload,
            timestamp: Some(Utc::now()),
            version: Version::ZERO,
            global_version: Version::ZERO,
            user: None,
            destinations: Vec::new(),
            ttl: None,
            stream_id,
        }
    }

    /// Decode a JSON payload produced by [`wrap`].
    pub fn decode_json<E: DeserializeOwned>(&self) -> std::result::Result<E, SerializerError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Per-batch mutation applied by [`wrap`] after stamping ids and timestamps.
pub trait Mutator {
    fn apply(&self, envelopes: &mut [Envelope]) -> Result<()>;
}

impl<F> Mutator for F
where
    F: Fn(&mut [Envelope]) -> Result<()>,
{
    fn apply(&self, envelopes: &mut [Envelope]) -> Result<()> {
        self(envelopes)
    }
}

/// Wrap domain payloads into envelopes for `stream_id`.
///
/// Each envelope gets a v4 id and a timestamp; timestamps strictly increase
/// across the batch. Payloads are JSON-encoded. Mutators run in order.
pub fn wrap<E: DomainEvent>(
    stream_id: &StreamId,
    events: &[E],
    mutators: &[&dyn Mutator],
) -> Result<Vec<Envelope>> {
    let now = Utc::now();
    let mut envelopes = events
        .iter()
        .enumerate()
        .map(|(i, event)| {
            let payload = serde_json::to_vec(event).map_err(SerializerError::from)?;
            let mut envelope = Envelope::new(stream_id.clone(), event.event_type(), payload);
            envelope.timestamp = Some(now + chrono::Duration::nanoseconds(i as i64));
            Ok(envelope)
        })
        .collect::<Result<Vec<_>>>()?;

    for mutator in mutators {
        mutator.apply(&mut envelopes)?;
    }
    Ok(envelopes)
}

/// Assign `base.add(0, i)` to each envelope and flag the last one eof.
pub fn with_version(base: Version) -> impl Mutator {
    move |envelopes: &mut [Envelope]| -> Result<()> {
        let last = envelopes.len().saturating_sub(1);
        for (i, envelope) in envelopes.iter_mut().enumerate() {
            let offset = u8::try_from(i).map_err(|_| VersionError::LimitExceeded {
                version: base.to_string(),
                op: "add",
                dp: 0,
                df: u8::MAX,
            })?;
            let version = base.add(0, offset)?;
            envelope.version = if i == last { version.eof() } else { version };
        }
        Ok(())
    }
}

/// Prefix every event type with `namespace.`.
pub fn with_namespace(namespace: impl Into<String>) -> impl Mutator {
    let namespace = namespace.into();
    move |envelopes: &mut [Envelope]| -> Result<()> {
        for envelope in envelopes.iter_mut() {
            envelope.event_type = format!("{}.{}", namespace, envelope.event_type);
        }
        Ok(())
    }
}

/// Resolve each envelope's destination list.
pub fn with_destinations<F>(resolve: F) -> impl Mutator
where
    F: Fn(&Envelope) -> Vec<String>,
{
    move |envelopes: &mut [Envelope]| -> Result<()> {
        for envelope in envelopes.iter_mut() {
            envelope.destinations = resolve(envelope);
        }
        Ok(())
    }
}

pub fn with_user(user: impl Into<String>) -> impl Mutator {
    let user = user.into();
    move |envelopes: &mut [Envelope]| -> Result<()> {
        for envelope in envelopes.iter_mut() {
            envelope.user = Some(user.clone());
        }
        Ok(())
    }
}

pub fn with_ttl(ttl: Duration) -> impl Mutator {
    move |envelopes: &mut [Envelope]| -> Result<()> {
        for envelope in envelopes.iter_mut() {
            envelope.ttl = Some(ttl.as_secs());
        }
        Ok(())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serializer(SerializerError::from(e))
    }
}

mod payload_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
