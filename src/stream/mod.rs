//! Stream identity and event envelopes.
//!
//! A [`StreamId`] names a global partition plus an ordered list of parts
//! (`orders/eu/1234`). Every stream sharing a global name lives in the same
//! storage partition and contributes to that partition's global stream.

mod envelope;
mod registry;

pub use envelope::{
    with_destinations, with_namespace, with_ttl, with_user, with_version, wrap, DomainEvent,
    Envelope, Mutator,
};
pub use registry::{Registry, RegistryError};

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::validation::validate_segment;

/// Separator between the global name and each part in the string form.
pub const SEPARATOR: char = '/';

/// Errors raised while constructing a [`StreamId`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamIdError {
    #[error("Stream id cannot be empty")]
    Empty,

    #[error("Invalid stream id segment {segment:?}: {reason}")]
    InvalidSegment {
        segment: String,
        reason: &'static str,
    },
}

/// Identity of an event stream: `{global, parts}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId {
    global: String,
    parts: Vec<String>,
}

impl StreamId {
    /// Build a stream id, validating every segment.
    pub fn new<I, S>(global: impl Into<String>, parts: I) -> Result<Self, StreamIdError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let global = global.into();
        validate_segment(&global)?;
        let parts = parts
            .into_iter()
            .map(|p| {
                let p = p.into();
                validate_segment(&p).map(|_| p)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { global, parts })
    }

    /// Parse the `global/part/part` form.
    pub fn parse(s: &str) -> Result<Self, StreamIdError> {
        if s.is_empty() {
            return Err(StreamIdError::Empty);
        }
        let mut segments = s.split(SEPARATOR);
        let global = segments.next().unwrap_or_default();
        Self::new(global, segments)
    }

    /// Parse a stream id known to be valid at compile time.
    ///
    /// # Panics
    ///
    /// Panics if `s` is not a valid stream id.
    pub fn must(s: &str) -> Self {
        match Self::parse(s) {
            Ok(id) => id,
            Err(e) => panic!("invalid stream id {:?}: {}", s, e),
        }
    }

    /// True iff this id names the partition's global stream (no parts).
    pub fn is_global(&self) -> bool {
        self.parts.is_empty()
    }

    /// The partition (global) name.
    pub fn partition(&self) -> &str {
        &self.global
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// The global stream this stream contributes to.
    pub fn global_id(&self) -> StreamId {
        Self {
            global: self.global.clone(),
            parts: Vec::new(),
        }
    }

    /// Extend with one more part.
    pub fn child(&self, part: impl Into<String>) -> Result<StreamId, StreamIdError> {
        let part = part.into();
        validate_segment(&part)?;
        let mut parts = self.parts.clone();
        parts.push(part);
        Ok(Self {
            global: self.global.clone(),
            parts,
        })
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.global)?;
        for part in &self.parts {
            write!(f, "{}{}", SEPARATOR, part)?;
        }
        Ok(())
    }
}

impl FromStr for StreamId {
    type Err = StreamIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for StreamId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StreamId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(de::Error::custom)
    }
}
