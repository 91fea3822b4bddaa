//! Shared append and load mechanics.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use super::keys::{self, Layout};
use super::record::Record;
use crate::backend::{
    Backend, BackendError, Condition, Key, Query, Session, RANGE_KEY,
};
use crate::bus::Publisher;
use crate::config::{StoreConfig, Toggle};
use crate::error::{ConflictReason, Error, Result};
use crate::serializer::Serializer;
use crate::stream::{Envelope, StreamId};
use crate::validation::ValidationError;
use crate::version::Version;

/// A backend table plus the collaborators every append goes through.
///
/// Mode-specific stores compute range keys and validate; the table
/// serializes, enforces limits, writes conditionally and notifies.
#[derive(Clone)]
pub struct Table {
    backend: Arc<dyn Backend>,
    serializer: Arc<dyn Serializer>,
    config: StoreConfig,
    publisher: Option<Arc<dyn Publisher>>,
    toggle: Option<Arc<dyn Toggle>>,
}

impl Table {
    pub fn new(
        backend: Arc<dyn Backend>,
        serializer: Arc<dyn Serializer>,
        config: StoreConfig,
    ) -> Self {
        Self {
            backend,
            serializer,
            config,
            publisher: None,
            toggle: None,
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_toggle(mut self, toggle: Arc<dyn Toggle>) -> Self {
        self.toggle = Some(toggle);
        self
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn serializer(&self) -> &Arc<dyn Serializer> {
        &self.serializer
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// A session whose operations commit together with the next append.
    pub fn session(&self) -> Session {
        Session::new(self.backend.clone())
    }

    pub fn hash_key(&self, stream: &StreamId) -> String {
        keys::hash_key(stream, self.config.page)
    }

    pub(crate) async fn check_enabled(&self, stream: &StreamId) -> Result<()> {
        if let Some(toggle) = &self.toggle {
            if !toggle.append_enabled(stream).await {
                return Err(Error::AppendDisabled {
                    stream: stream.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Serialize `events` into one record at `range_key` and write it
    /// unless the key already exists.
    ///
    /// Events must already be validated. With a session, the record commits
    /// atomically with the session's other operations.
    pub(crate) async fn write(
        &self,
        stream: &StreamId,
        range_key: String,
        events: &[Envelope],
        base_version: Option<Version>,
        session: Option<Session>,
    ) -> Result<Record> {
        let data = self
            .serializer
            .marshal_batch(events)
            .map_err(|e| Error::append_failed(stream, e))?;

        let limit = self.config.max_record_bytes;
        if limit > 0 && data.len() > limit {
            return Err(Error::SizeLimitExceeded {
                stream: stream.to_string(),
                size: data.len(),
                limit,
            });
        }

        let (first, last) = match (events.first(), events.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(Error::invalid_stream(stream, ValidationError::EmptyBatch)),
        };
        let first_timestamp = timestamp_nanos(stream, first)?;
        let last_timestamp = timestamp_nanos(stream, last)?;
        let event_count = u32::try_from(events.len())
            .map_err(|_| Error::invalid_stream(stream, ValidationError::RecordShape("too many events")))?;

        let now = Utc::now();
        let expires_at = events
            .iter()
            .filter_map(|e| e.ttl)
            .max()
            .map(|ttl| now.timestamp().saturating_add(i64::try_from(ttl).unwrap_or(i64::MAX)));

        let record = Record {
            key: Key::new(self.hash_key(stream), range_key),
            data,
            first_timestamp,
            last_timestamp,
            event_count,
            base_version,
            expires_at,
            global_version: None,
        };

        let item = record.to_item();
        let condition = Some(Condition::NotExists(RANGE_KEY.to_string()));
        let written = match session {
            Some(mut session) => {
                session.put(item, condition);
                session.commit().await
            }
            None => self.backend.put_item(item, condition).await,
        };
        written.map_err(|e| match e {
            BackendError::ConditionFailed { key } => Error::Conflict {
                stream: stream.to_string(),
                reason: ConflictReason::ConditionFailed { key },
            },
            other => Error::append_failed(stream, other),
        })?;

        debug!(
            stream = %stream,
            key = %record.key,
            events = events.len(),
            "Appended record"
        );

        self.publish(stream, events).await;
        Ok(record)
    }

    async fn publish(&self, stream: &StreamId, events: &[Envelope]) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        if let Err(e) = publisher.publish(stream, events).await {
            warn!(
                stream = %stream,
                error = %e,
                "Failed to publish appended events"
            );
        }
    }

    /// Read every live record of `stream` with a range key in `[lo, hi]`,
    /// in key order, decoded into one batch per record.
    ///
    /// Expired records and records of child streams are skipped. A record
    /// that decodes to no events makes the stream invalid.
    pub(crate) async fn load(
        &self,
        stream: &StreamId,
        layout: Layout,
        lo: &str,
        hi: &str,
    ) -> Result<Vec<Vec<Envelope>>> {
        let hash = self.hash_key(stream);
        let prefix = keys::parts_prefix(stream);
        let now = Utc::now();

        let mut batches = Vec::new();
        let mut start = None;
        loop {
            let query = Query::new(&hash)
                .between(lo, hi)
                .consistent()
                .start_after(start.take());
            let page = self
                .backend
                .query(&query)
                .await
                .map_err(|e| Error::load_failed(stream, e))?;

            for item in &page.items {
                let record = Record::try_from(item).map_err(|e| Error::load_failed(stream, e))?;
                if !layout.owns(&prefix, &record.key.range) {
                    continue;
                }
                if record.is_expired(now) {
                    debug!(stream = %stream, key = %record.key, "Skipping expired record");
                    continue;
                }
                batches.push(self.decode(stream, &record)?);
            }

            match page.last_key {
                Some(last) => start = Some(last),
                None => break,
            }
        }
        Ok(batches)
    }

    /// The record of `stream` with the greatest range key in `[lo, hi]`.
    pub(crate) async fn last_record(
        &self,
        stream: &StreamId,
        layout: Layout,
        lo: &str,
        hi: &str,
    ) -> Result<Option<Record>> {
        let hash = self.hash_key(stream);
        let prefix = keys::parts_prefix(stream);

        let mut start = None;
        loop {
            let query = Query::new(&hash)
                .between(lo, hi)
                .consistent()
                .backward()
                .start_after(start.take());
            let page = self
                .backend
                .query(&query)
                .await
                .map_err(|e| Error::load_failed(stream, e))?;

            for item in &page.items {
                let record = Record::try_from(item).map_err(|e| Error::load_failed(stream, e))?;
                if layout.owns(&prefix, &record.key.range) {
                    return Ok(Some(record));
                }
            }

            match page.last_key {
                Some(last) => start = Some(last),
                None => return Ok(None),
            }
        }
    }

    pub(crate) fn decode(&self, stream: &StreamId, record: &Record) -> Result<Vec<Envelope>> {
        let events = self
            .serializer
            .unmarshal_batch(&record.data)
            .map_err(|e| Error::load_failed(stream, e))?;
        if events.is_empty() {
            return Err(Error::invalid_stream(
                stream,
                ValidationError::EmptyRecord {
                    key: record.key.to_string(),
                },
            ));
        }
        Ok(events)
    }
}

fn timestamp_nanos(stream: &StreamId, envelope: &Envelope) -> Result<i64> {
    let timestamp = envelope
        .timestamp
        .ok_or(ValidationError::MissingTimestamp { id: envelope.id })
        .and_then(keys::nanos)
        .map_err(|e| Error::invalid_stream(stream, e))?;
    Ok(timestamp)
}
