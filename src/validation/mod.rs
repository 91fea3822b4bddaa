//! Stream identity and event sequence validation.
//!
//! Segment validation guards the characters allowed in stream ids, which
//! end up verbatim in storage keys. Sequence validation threads a [`Cursor`]
//! through a batch or a replay window and asserts the events form a gapless,
//! monotonic chain. Events outside the configured window are reported as
//! [`Verdict::Ignore`] rather than as errors so scans can skip them.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::stream::{Envelope, StreamId, StreamIdError};
use crate::version::Version;

/// Error constants for validation failures.
pub mod errmsg {
    pub const SEGMENT_EMPTY: &str = "segment cannot be empty";
    pub const SEGMENT_INVALID_CHARS: &str =
        "segment contains invalid characters (allowed: A-Z, a-z, 0-9, -, _, #, +, @)";
}

/// Validate one stream id segment (the global name or a part).
///
/// Rules:
/// - Must not be empty
/// - May contain: ASCII letters and digits, `-`, `_`, `#`, `+`, `@`
pub fn validate_segment(segment: &str) -> Result<(), StreamIdError> {
    if segment.is_empty() {
        return Err(StreamIdError::InvalidSegment {
            segment: segment.to_string(),
            reason: errmsg::SEGMENT_EMPTY,
        });
    }
    if !segment.chars().all(is_segment_char) {
        return Err(StreamIdError::InvalidSegment {
            segment: segment.to_string(),
            reason: errmsg::SEGMENT_INVALID_CHARS,
        });
    }
    Ok(())
}

fn is_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '#' | '+' | '@')
}

/// Scan direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

/// Outcome of validating a single event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    /// Outside the configured window; skip without failing.
    Ignore,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Event {id} belongs to {actual}, expected {expected}")]
    StreamMismatch {
        id: Uuid,
        expected: StreamId,
        actual: StreamId,
    },

    #[error("Event {id} has no version")]
    ZeroVersion { id: Uuid },

    #[error("Version {version} does not follow {previous}")]
    Gap { previous: Version, version: Version },

    #[error("Event {id} has no timestamp")]
    MissingTimestamp { id: Uuid },

    #[error("Timestamp {timestamp} regresses from {previous}")]
    TimestampRegression {
        previous: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    #[error("Timestamp {0} cannot be encoded as nanoseconds")]
    TimestampOutOfRange(DateTime<Utc>),

    #[error("Event {id} falls outside its own batch bounds")]
    OutOfBatch { id: Uuid },

    #[error("Batch is empty")]
    EmptyBatch,

    #[error("Record {key} decoded to no events")]
    EmptyRecord { key: String },

    #[error("Batch does not fit one record: {0}")]
    RecordShape(&'static str),

    #[error("{0} is not a global stream")]
    NotGlobal(StreamId),
}

/// Transient validation state threaded through a scan.
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    stream_id: Option<StreamId>,
    version: Version,
    timestamp: Option<DateTime<Utc>>,
    started: bool,
}

impl Cursor {
    /// A cursor that adopts the stream id of the first event it sees.
    pub fn new() -> Self {
        Self::default()
    }

    /// A cursor pinned to `stream_id`; any other stream is a mismatch.
    pub fn for_stream(stream_id: StreamId) -> Self {
        Self {
            stream_id: Some(stream_id),
            ..Self::default()
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    fn advance(&mut self, stream_id: StreamId, version: Version, timestamp: DateTime<Utc>) {
        if self.stream_id.is_none() {
            self.stream_id = Some(stream_id);
        }
        self.version = version;
        self.timestamp = Some(timestamp);
        self.started = true;
    }
}

/// What to check and which window to accept.
#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    /// Check the global stream id and global version instead of the local ones.
    pub global: bool,
    pub check_versions: bool,
    pub check_timestamps: bool,
    pub from: Option<Version>,
    pub to: Option<Version>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub order: Order,
}

impl ValidateOptions {
    /// Local versions and timestamps, as appended to a sourcing stream.
    pub fn sourcing() -> Self {
        Self {
            check_versions: true,
            check_timestamps: true,
            ..Self::default()
        }
    }

    /// Timestamps only, as appended to a logging stream.
    pub fn logging() -> Self {
        Self {
            check_timestamps: true,
            ..Self::default()
        }
    }

    /// Global versions in the given scan direction.
    pub fn global(order: Order) -> Self {
        Self {
            global: true,
            check_versions: true,
            order,
            ..Self::default()
        }
    }

    pub fn with_versions(mut self, from: Version, to: Version) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn with_window(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    fn version_of(&self, envelope: &Envelope) -> Version {
        if self.global {
            envelope.global_version
        } else {
            envelope.version
        }
    }

    fn stream_of(&self, envelope: &Envelope) -> StreamId {
        if self.global {
            envelope.stream_id.global_id()
        } else {
            envelope.stream_id.clone()
        }
    }

    fn outside(&self, version: Version, timestamp: DateTime<Utc>) -> bool {
        if self.check_versions {
            if self.from.is_some_and(|from| version < from) || self.to.is_some_and(|to| version > to)
            {
                return true;
            }
        }
        if self.check_timestamps {
            if self.since.is_some_and(|since| timestamp < since)
                || self.until.is_some_and(|until| timestamp > until)
            {
                return true;
            }
        }
        false
    }
}

/// Validate one event against the cursor, advancing it on acceptance.
///
/// The first event of a fresh cursor seeds it instead of being checked for
/// adjacency.
pub fn validate_event(
    envelope: &Envelope,
    cursor: &mut Cursor,
    opts: &ValidateOptions,
) -> Result<Verdict, ValidationError> {
    let stream_id = opts.stream_of(envelope);
    let version = opts.version_of(envelope);

    if let Some(expected) = &cursor.stream_id {
        if *expected != stream_id {
            return Err(ValidationError::StreamMismatch {
                id: envelope.id,
                expected: expected.clone(),
                actual: stream_id,
            });
        }
    }
    if opts.check_versions && version.is_zero() {
        return Err(ValidationError::ZeroVersion { id: envelope.id });
    }
    let timestamp = envelope
        .timestamp
        .ok_or(ValidationError::MissingTimestamp { id: envelope.id })?;

    if opts.outside(version, timestamp) {
        return Ok(Verdict::Ignore);
    }

    if cursor.started {
        if opts.check_versions {
            let adjacent = match opts.order {
                Order::Asc => version.next(&cursor.version),
                Order::Desc => cursor.version.next(&version),
            };
            if !adjacent {
                return Err(ValidationError::Gap {
                    previous: cursor.version,
                    version,
                });
            }
        }
        if opts.check_timestamps {
            if let Some(previous) = cursor.timestamp {
                let regressed = match opts.order {
                    Order::Asc => timestamp < previous,
                    Order::Desc => timestamp > previous,
                };
                if regressed {
                    return Err(ValidationError::TimestampRegression {
                        previous,
                        timestamp,
                    });
                }
            }
        }
    }

    cursor.advance(stream_id, version, timestamp);
    Ok(Verdict::Accept)
}

/// Validate a whole batch.
///
/// The window is derived from the batch's own first and last entries, so
/// an event outside it is an error rather than a skip.
pub fn validate(
    envelopes: &[Envelope],
    cursor: &mut Cursor,
    opts: &ValidateOptions,
) -> Result<(), ValidationError> {
    let (first, last) = match (envelopes.first(), envelopes.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(ValidationError::EmptyBatch),
    };

    let mut bounded = opts.clone();
    if opts.check_versions {
        let (a, b) = (opts.version_of(first), opts.version_of(last));
        bounded.from = Some(a.min(b));
        bounded.to = Some(a.max(b));
    }
    if opts.check_timestamps {
        if let (Some(a), Some(b)) = (first.timestamp, last.timestamp) {
            bounded.since = Some(a.min(b));
            bounded.until = Some(a.max(b));
        }
    }

    for envelope in envelopes {
        if validate_event(envelope, cursor, &bounded)? == Verdict::Ignore {
            return Err(ValidationError::OutOfBatch { id: envelope.id });
        }
    }
    Ok(())
}
