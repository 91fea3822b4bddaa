//! Logging mode: time-keyed records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::keys::{self, Layout};
use super::{EventStore, Record, Table};
use crate::backend::Session;
use crate::error::{Error, Result};
use crate::stream::{Envelope, StreamId};
use crate::validation::{
    validate, validate_event, Cursor, ValidateOptions, ValidationError, Verdict,
};

/// Appends batches keyed by their first timestamp.
///
/// Appending the same batch twice conflicts on the range key, which makes
/// retries after an unknown outcome safe.
#[derive(Clone)]
pub struct LoggingStore {
    table: Table,
}

impl LoggingStore {
    pub fn new(table: Table) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    /// Events of `stream` with timestamps in `[since, until]`, record by
    /// record in key order.
    ///
    /// Timestamps are validated within each record only; concurrent writers
    /// may interleave records.
    pub async fn load(
        &self,
        stream: &StreamId,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<Envelope>> {
        let span = chrono::Duration::from_std(self.table.config().max_batch_span())
            .unwrap_or(chrono::Duration::zero());
        let (lo, hi) = keys::logging_range(stream, since, until, span);

        let mut opts = ValidateOptions::logging();
        opts.since = since;
        opts.until = until;

        let mut events = Vec::new();
        for batch in self.table.load(stream, Layout::Logging, &lo, &hi).await? {
            let mut cursor = Cursor::for_stream(stream.clone());
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
}

#[async_trait]
impl EventStore for LoggingStore {
    async fn append_with(
        &self,
        stream: &StreamId,
        events: &[Envelope],
        session: Option<Session>,
    ) -> Result<Record> {
        self.table.check_enabled(stream).await?;

        validate(
            events,
            &mut Cursor::for_stream(stream.clone()),
            &ValidateOptions::logging(),
        )
        .map_err(|e| Error::invalid_stream(stream, e))?;

        // Validated above: non-empty, every event timestamped, ascending.
        let first = events.first().and_then(|e| e.timestamp);
        let last = events.last().and_then(|e| e.timestamp);
        let (Some(first), Some(last)) = (first, last) else {
            return Err(Error::invalid_stream(stream, ValidationError::EmptyBatch));
        };

        let limit = self.table.config().max_batch_span();
        let span = (last - first).to_std().unwrap_or_default();
        if span > limit {
            return Err(Error::BatchSpanExceeded {
                stream: stream.to_string(),
                span,
                limit,
            });
        }

        let range_key =
            keys::logging_key(stream, first).map_err(|e| Error::invalid_stream(stream, e))?;
        self.table
            .write(stream, range_key, events, None, session)
            .await
    }

    async fn load_stream(&self, stream: &StreamId) -> Result<Vec<Envelope>> {
        self.load(stream, None, None).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::backend::{Backend, MemoryBackend, Operation};
    use crate::bus::MockPublisher;
    use crate::config::{StaticToggle, StoreConfig};
    use crate::error::ConflictReason;
    use crate::serializer::JsonSerializer;
    use crate::stream::{with_ttl, Mutator};

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn batch(stream: &StreamId, secs: &[i64]) -> Vec<Envelope> {
        secs.iter()
            .map(|s| {
                let mut e = Envelope::new(stream.clone(), "Logged", s.to_string().into_bytes());
                e.timestamp = Some(at(*s));
                e
            })
            .collect()
    }

    fn store_with(backend: Arc<MemoryBackend>, config: StoreConfig) -> LoggingStore {
        LoggingStore::new(Table::new(backend, Arc::new(JsonSerializer), config))
    }

    fn store() -> (Arc<MemoryBackend>, LoggingStore) {
        let backend = Arc::new(MemoryBackend::new());
        (backend.clone(), store_with(backend, StoreConfig::default()))
    }

    #[tokio::test]
    async fn test_append_and_load() {
        let (_, store) = store();
        let stream = StreamId::must("logs/a");
        let events = batch(&stream, &[10, 11, 12]);

        let record = store.append(&stream, &events).await.unwrap();
        assert_eq!(record.key.hash, "logs#0");
        assert_eq!(record.event_count, 3);
        assert_eq!(record.first_timestamp, 10_000_000_000);
        assert_eq!(record.last_timestamp, 12_000_000_000);
        assert!(record.base_version.is_none());

        assert_eq!(store.load_stream(&stream).await.unwrap(), events);
    }

    #[tokio::test]
    async fn test_duplicate_append_conflicts() {
        let (backend, store) = store();
        let stream = StreamId::must("logs/a");
        let events = batch(&stream, &[10, 11]);

        let record = store.append(&stream, &events).await.unwrap();
        let err = store.append(&stream, &events).await.unwrap_err();
        match err {
            Error::Conflict {
                reason: ConflictReason::ConditionFailed { key },
                ..
            } => assert_eq!(key, Some(record.key)),
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(backend.len().await, 1);
    }

    #[tokio::test]
    async fn test_streams_of_one_partition_do_not_mix() {
        let (backend, store) = store();
        let a = StreamId::must("logs/a");
        let child = StreamId::must("logs/a/t_5");
        store.append(&a, &batch(&a, &[10])).await.unwrap();
        store.append(&child, &batch(&child, &[11])).await.unwrap();
        assert_eq!(backend.len().await, 2);

        assert_eq!(store.load_stream(&a).await.unwrap().len(), 1);
        assert_eq!(store.load_stream(&child).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch_rejected() {
        let (backend, store) = store();
        let stream = StreamId::must("logs/a");
        let err = store.append(&stream, &[]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidStream { .. }));
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_foreign_event_rejected() {
        let (_, store) = store();
        let stream = StreamId::must("logs/a");
        let other = StreamId::must("logs/b");
        let err = store.append(&stream, &batch(&other, &[1])).await.unwrap_err();
        assert!(matches!(err, Error::InvalidStream { .. }));
    }

    #[tokio::test]
    async fn test_span_limit_checked_before_io() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_fail_on_write(true).await;
        let config = StoreConfig {
            max_batch_span_ms: 1_000,
            ..StoreConfig::default()
        };
        let store = store_with(backend, config);
        let stream = StreamId::must("logs/a");

        let err = store.append(&stream, &batch(&stream, &[10, 12])).await.unwrap_err();
        match err {
            Error::BatchSpanExceeded { span, limit, .. } => {
                assert_eq!(span, Duration::from_secs(2));
                assert_eq!(limit, Duration::from_secs(1));
            }
            other => panic!("expected span error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_size_limit() {
        let backend = Arc::new(MemoryBackend::new());
        let config = StoreConfig {
            max_record_bytes: 64,
            ..StoreConfig::default()
        };
        let store = store_with(backend.clone(), config);
        let stream = StreamId::must("logs/a");

        let err = store.append(&stream, &batch(&stream, &[1, 2, 3])).await.unwrap_err();
        assert!(matches!(err, Error::SizeLimitExceeded { limit: 64, .. }));
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_window_load_finds_straddling_record() {
        let (_, store) = store();
        let stream = StreamId::must("logs/a");
        store.append(&stream, &batch(&stream, &[100, 130, 150])).await.unwrap();
        store.append(&stream, &batch(&stream, &[200, 210])).await.unwrap();

        let events = store
            .load(&stream, Some(at(120)), Some(at(205)))
            .await
            .unwrap();
        let times: Vec<_> = events.iter().filter_map(|e| e.timestamp).collect();
        assert_eq!(times, vec![at(130), at(150), at(200)]);
    }

    #[tokio::test]
    async fn test_expired_records_skipped() {
        let (backend, store) = store();
        let stream = StreamId::must("logs/a");
        let mut events = batch(&stream, &[10]);
        with_ttl(Duration::from_secs(60)).apply(&mut events).unwrap();
        let record = store.append(&stream, &events).await.unwrap();
        assert!(record.expires_at.is_some());

        // Rewrite the record as already expired.
        let mut expired = record.clone();
        expired.expires_at = Some(Utc::now().timestamp() - 1);
        backend.put_item(expired.to_item(), None).await.unwrap();

        assert!(store.load_stream(&stream).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publishes_after_write() {
        let backend = Arc::new(MemoryBackend::new());
        let publisher = Arc::new(MockPublisher::new());
        let table = Table::new(backend, Arc::new(JsonSerializer), StoreConfig::default())
            .with_publisher(publisher.clone());
        let store = LoggingStore::new(table);
        let stream = StreamId::must("logs/a");

        store.append(&stream, &batch(&stream, &[1, 2])).await.unwrap();
        let published = publisher.take_published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].1.len(), 2);
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_fail_append() {
        let backend = Arc::new(MemoryBackend::new());
        let publisher = Arc::new(MockPublisher::new());
        publisher.set_fail_on_publish(true).await;
        let table = Table::new(backend.clone(), Arc::new(JsonSerializer), StoreConfig::default())
            .with_publisher(publisher);
        let store = LoggingStore::new(table);
        let stream = StreamId::must("logs/a");

        store.append(&stream, &batch(&stream, &[1])).await.unwrap();
        assert_eq!(backend.len().await, 1);
    }

    #[tokio::test]
    async fn test_toggle_disables_appends() {
        let backend = Arc::new(MemoryBackend::new());
        let toggle = Arc::new(StaticToggle::new(false));
        let table = Table::new(backend.clone(), Arc::new(JsonSerializer), StoreConfig::default())
            .with_toggle(toggle.clone());
        let store = LoggingStore::new(table);
        let stream = StreamId::must("logs/a");

        let err = store.append(&stream, &batch(&stream, &[1])).await.unwrap_err();
        assert!(matches!(err, Error::AppendDisabled { .. }));
        assert!(backend.is_empty().await);

        toggle.set(true);
        store.append(&stream, &batch(&stream, &[1])).await.unwrap();
    }

    #[tokio::test]
    async fn test_session_commits_with_record() {
        let (backend, store) = store();
        let stream = StreamId::must("logs/a");
        let marker = crate::backend::Key::new("logs#0", "marker");

        let mut session = store.table().session();
        session.push(Operation::Put {
            item: marker.to_item(),
            condition: None,
        });
        store
            .append_with(&stream, &batch(&stream, &[1]), Some(session))
            .await
            .unwrap();

        assert_eq!(backend.transaction_count(), 1);
        assert!(backend.get_item(&marker, true).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_backend_failure_is_append_failed() {
        let (backend, store) = store();
        backend.set_fail_on_write(true).await;
        let stream = StreamId::must("logs/a");
        let err = store.append(&stream, &batch(&stream, &[1])).await.unwrap_err();
        assert!(matches!(err, Error::AppendFailed { .. }));
    }
}
