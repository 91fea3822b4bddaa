//! Crate-level error taxonomy.
//!
//! Layer errors (`VersionError`, `ValidationError`, `BackendError`, ...) are
//! wrapped once at the component boundary, with the stream or record key
//! attached, into [`Error`].

use std::fmt;
use std::time::Duration;

use crate::backend::{BackendError, Key};
use crate::serializer::SerializerError;
use crate::stream::{RegistryError, StreamIdError};
use crate::validation::ValidationError;
use crate::version::{Version, VersionError};

/// Boxed error used where the cause comes from a pluggable collaborator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why an append was rejected as a concurrency or idempotency violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    /// A conditional write found its precondition violated, usually because
    /// the record's range key already exists.
    ConditionFailed { key: Option<Key> },
    /// Sourcing append whose predecessor record does not exist.
    MissingPredecessor { version: Version },
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::ConditionFailed { key: Some(key) } => {
                write!(f, "condition failed on {}", key)
            }
            ConflictReason::ConditionFailed { key: None } => write!(f, "condition failed"),
            ConflictReason::MissingPredecessor { version } => {
                write!(f, "predecessor {} does not exist", version)
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Conflict on {stream}: {reason}")]
    Conflict {
        stream: String,
        reason: ConflictReason,
    },

    #[error("Append to {stream} failed: {source}")]
    AppendFailed {
        stream: String,
        #[source]
        source: BoxError,
    },

    #[error("Load from {stream} failed: {source}")]
    LoadFailed {
        stream: String,
        #[source]
        source: BoxError,
    },

    #[error("Invalid stream {stream}: {source}")]
    InvalidStream {
        stream: String,
        #[source]
        source: ValidationError,
    },

    #[error("Record for {stream} is {size} bytes, limit is {limit}")]
    SizeLimitExceeded {
        stream: String,
        size: usize,
        limit: usize,
    },

    #[error("Batch for {stream} spans {span:?}, limit is {limit:?}")]
    BatchSpanExceeded {
        stream: String,
        span: Duration,
        limit: Duration,
    },

    #[error("Indexing {key} failed: {source}")]
    IndexingFailed {
        key: Key,
        #[source]
        source: Box<Error>,
    },

    #[error("Appends to {stream} are disabled")]
    AppendDisabled { stream: String },

    #[error("Replay aborted by handler: {0}")]
    Handler(#[source] BoxError),

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    StreamId(#[from] StreamIdError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Serializer(#[from] SerializerError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl Error {
    /// Whether the caller may retry after re-reading state.
    ///
    /// Conflicts are never retried inside the engine; indexing failures are
    /// retried by the redelivery mechanism.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict { .. } | Error::IndexingFailed { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    pub(crate) fn append_failed(stream: impl fmt::Display, source: impl Into<BoxError>) -> Self {
        Error::AppendFailed {
            stream: stream.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn load_failed(stream: impl fmt::Display, source: impl Into<BoxError>) -> Self {
        Error::LoadFailed {
            stream: stream.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn invalid_stream(stream: impl fmt::Display, source: ValidationError) -> Self {
        Error::InvalidStream {
            stream: stream.to_string(),
            source,
        }
    }
}
