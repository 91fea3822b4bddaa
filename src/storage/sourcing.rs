//! Sourcing mode: version-keyed records with gapless appends.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::keys::{self, Layout};
use super::{EventStore, Record, Table};
use crate::backend::{Key, Session};
use crate::error::{ConflictReason, Error, Result};
use crate::stream::{Envelope, StreamId};
use crate::validation::{
    validate, validate_event, Cursor, ValidateOptions, ValidationError, Verdict,
};
use crate::version::Version;

/// Appends batches keyed by their base version.
///
/// A batch at base `v` is accepted only when the record at `v - 1` exists
/// (or `v` is [`Version::MIN`]) and no record at `v` exists yet. The
/// predecessor check and the write are separate requests; the conditional
/// write alone guarantees no two batches share a base version.
pub struct SourcingStore {
    table: Table,
    /// Highest record position known to exist, per stream.
    checkpoints: RwLock<HashMap<StreamId, Version>>,
}

impl SourcingStore {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            checkpoints: RwLock::new(HashMap::new()),
        }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    /// Events of `stream` with versions in `[from, to]`, validated as one
    /// gapless chain across records.
    pub async fn load(
        &self,
        stream: &StreamId,
        from: Option<Version>,
        to: Option<Version>,
    ) -> Result<Vec<Envelope>> {
        let from = from.unwrap_or(Version::MIN);
        let to = to.unwrap_or(Version::MAX);
        let lo = keys::sourcing_key(stream, from);
        let hi = keys::sourcing_key(stream, to);

        // Versions carry the order; clocks of different writers need not agree.
        let mut opts = ValidateOptions::sourcing().with_versions(from, to);
        opts.check_timestamps = false;

        let mut cursor = Cursor::for_stream(stream.clone());
        let mut events = Vec::new();
        for batch in self.table.load(stream, Layout::Sourcing, &lo, &hi).await? {
            for envelope in batch {
                let verdict = validate_event(&envelope, &mut cursor, &opts)
                    .map_err(|e| Error::invalid_stream(stream, e))?;
                if verdict == Verdict::Accept {
                    events.push(envelope);
                }
            }
        }
        Ok(events)
    }

    /// Version of the last event of `stream`, flagged eof, or `None` for a
    /// stream with no records.
    pub async fn current_version(&self, stream: &StreamId) -> Result<Option<Version>> {
        let lo = keys::sourcing_key(stream, Version::MIN);
        let hi = keys::sourcing_key(stream, Version::MAX);
        let Some(record) = self
            .table
            .last_record(stream, Layout::Sourcing, &lo, &hi)
            .await?
        else {
            return Ok(None);
        };

        let base = record.base_version.ok_or_else(|| {
            Error::load_failed(stream, format!("record {} has no base version", record.key))
        })?;
        self.remember(stream, base).await;

        let last = u8::try_from(record.event_count.saturating_sub(1)).map_err(|_| {
            Error::invalid_stream(stream, ValidationError::RecordShape("too many events"))
        })?;
        Ok(Some(base.add(0, last)?.eof()))
    }

    async fn remember(&self, stream: &StreamId, position: Version) {
        let mut checkpoints = self.checkpoints.write().await;
        let entry = checkpoints.entry(stream.clone()).or_insert(position);
        if *entry < position {
            *entry = position;
        }
    }

    /// Ensure the record preceding `base` exists.
    async fn check_predecessor(&self, stream: &StreamId, base: Version) -> Result<()> {
        if base == Version::MIN {
            return Ok(());
        }
        let previous = base.decr()?;

        let known = self.checkpoints.read().await.get(stream).copied();
        if known.is_some_and(|v| v >= previous) {
            return Ok(());
        }

        debug!(stream = %stream, previous = %previous, "Reading predecessor record");
        let key = Key::new(
            self.table.hash_key(stream),
            keys::sourcing_key(stream, previous),
        );
        let found = self
            .table
            .backend()
            .get_item(&key, true)
            .await
            .map_err(|e| Error::append_failed(stream, e))?;

        if found.is_some() {
            self.remember(stream, previous).await;
            return Ok(());
        }
        Err(Error::Conflict {
            stream: stream.to_string(),
            reason: ConflictReason::MissingPredecessor { version: previous },
        })
    }
}

/// The base version of a validated batch, rejecting batches that do not
/// fill exactly one record position from its first offset.
fn record_base(events: &[Envelope]) -> std::result::Result<Version, ValidationError> {
    let base = events
        .first()
        .map(|e| e.version)
        .ok_or(ValidationError::EmptyBatch)?;
    if base.f() != 0 {
        return Err(ValidationError::RecordShape(
            "first event must have offset 0",
        ));
    }
    if events.iter().any(|e| e.version.p() != base.p()) {
        return Err(ValidationError::RecordShape(
            "events span more than one record position",
        ));
    }
    // The next position only follows an eof-flagged last event; a lone
    // event at offset 0 is followed without it.
    let (last, earlier) = events.split_last().ok_or(ValidationError::EmptyBatch)?;
    if earlier.iter().any(|e| e.version.is_eof()) {
        return Err(ValidationError::RecordShape(
            "only the last event may be flagged eof",
        ));
    }
    if !earlier.is_empty() && !last.version.is_eof() {
        return Err(ValidationError::RecordShape(
            "last event must be flagged eof",
        ));
    }
    Ok(base)
}

#[async_trait]
impl EventStore for SourcingStore {
    async fn append_with(
        &self,
        stream: &StreamId,
        events: &[Envelope],
        session: Option<Session>,
    ) -> Result<Record> {
        self.table.check_enabled(stream).await?;

        let base = validate(
            events,
            &mut Cursor::for_stream(stream.clone()),
            &ValidateOptions::sourcing(),
        )
        .and_then(|_| record_base(events))
        .map_err(|e| Error::invalid_stream(stream, e))?;

        self.check_predecessor(stream, base).await?;

        let range_key = keys::sourcing_key(stream, base);
        let record = self
            .table
            .write(stream, range_key, events, Some(base.trunc()), session)
            .await?;
        self.remember(stream, base.trunc()).await;
        Ok(record)
    }

    async fn load_stream(&self, stream: &StreamId) -> Result<Vec<Envelope>> {
        self.load(stream, None, None).await
    }
}
