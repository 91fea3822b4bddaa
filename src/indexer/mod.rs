//! Global ordering.
//!
//! The indexer consumes records in write order (typically from the table's
//! change stream) and stamps each with the next global version of its
//! partition. Global versions are record positions: `{n, 0}` for the n-th
//! indexed record. Events inside a record derive theirs as
//! `base.add(0, offset)`.
//!
//! One indexer instance must own a partition at a time. Its checkpoint is a
//! cache of the partition's last indexed record and is rebuilt from the
//! ordering index after a restart or a failure.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{
    AttributeValue, Backend, BackendError, Condition, Key, Query, Update, HASH_KEY,
    ORDERING_INDEX, ORDERING_KEY,
};
use crate::error::{Error, Result};
use crate::serializer::Serializer;
use crate::storage::Record;
use crate::stream::Envelope;
use crate::validation::{Order, ValidationError};
use crate::version::{Version, VersionError};

/// Last record indexed in the current partition.
#[derive(Debug, Clone)]
struct Checkpoint {
    /// `None` when the partition has no indexed record yet.
    key: Option<Key>,
    version: Version,
}

#[derive(Debug, Default)]
struct State {
    partition: Option<String>,
    checkpoint: Option<Checkpoint>,
}

/// Outcome of [`GlobalIndexer::index_batch`].
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Records indexed, in delivery order, with their global versions.
    pub indexed: Vec<(Key, Version)>,
    /// The record that stopped the batch and why.
    pub failed: Option<(Key, Error)>,
    /// Records after the failure, not attempted.
    pub remaining: Vec<Key>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_none()
    }

    /// Keys that must be redelivered: the failed record and everything
    /// after it.
    pub fn retry_keys(&self) -> Vec<Key> {
        self.failed
            .iter()
            .map(|(key, _)| key.clone())
            .chain(self.remaining.iter().cloned())
            .collect()
    }
}

pub struct GlobalIndexer {
    backend: Arc<dyn Backend>,
    state: Mutex<State>,
}

impl GlobalIndexer {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            state: Mutex::new(State::default()),
        }
    }

    /// Assign the next global version of its partition to `record`.
    ///
    /// Redelivery of the most recently indexed record returns its existing
    /// version without a write. A record whose image already carries a
    /// global version is acknowledged with it.
    pub async fn index(&self, record: &Record) -> Result<Version> {
        if let Some(version) = record.global_version {
            debug!(key = %record.key, version = %version, "Record already indexed");
            return Ok(version);
        }

        let mut state = self.state.lock().await;
        match self.assign(&mut state, record).await {
            Ok(version) => Ok(version),
            Err(e) => {
                state.checkpoint = None;
                warn!(key = %record.key, error = %e, "Indexing failed, checkpoint reset");
                Err(Error::IndexingFailed {
                    key: record.key.clone(),
                    source: Box::new(e),
                })
            }
        }
    }

    /// Index `records` in order, stopping at the first failure.
    pub async fn index_batch(&self, records: &[Record]) -> BatchReport {
        let mut report = BatchReport::default();
        let mut pending = records.iter();
        for record in pending.by_ref() {
            match self.index(record).await {
                Ok(version) => report.indexed.push((record.key.clone(), version)),
                Err(e) => {
                    report.failed = Some((record.key.clone(), e));
                    break;
                }
            }
        }
        report.remaining = pending.map(|r| r.key.clone()).collect();
        if !report.is_complete() {
            info!(
                indexed = report.indexed.len(),
                remaining = report.remaining.len(),
                "Index batch stopped early"
            );
        }
        report
    }

    async fn assign(&self, state: &mut State, record: &Record) -> Result<Version> {
        let partition = &record.key.hash;
        if state.partition.as_ref() != Some(partition) {
            debug!(partition = %partition, "Switching partition");
            state.partition = Some(partition.clone());
            state.checkpoint = None;
        }

        let checkpoint = match &state.checkpoint {
            Some(checkpoint) => checkpoint.clone(),
            None => {
                let checkpoint = self.resume(partition).await?;
                state.checkpoint = Some(checkpoint.clone());
                checkpoint
            }
        };

        if checkpoint.key.as_ref() == Some(&record.key) {
            debug!(key = %record.key, version = %checkpoint.version, "Duplicate delivery");
            return Ok(checkpoint.version);
        }

        let version = checkpoint.version.incr()?;
        let update = Update::new().set(ORDERING_KEY, AttributeValue::S(version.to_string()));
        let guard = Condition::All(vec![
            Condition::Exists(HASH_KEY.to_string()),
            Condition::NotExists(ORDERING_KEY.to_string()),
        ]);
        self.backend
            .update_item(&record.key, update, Some(guard))
            .await?;

        state.checkpoint = Some(Checkpoint {
            key: Some(record.key.clone()),
            version,
        });
        debug!(key = %record.key, version = %version, "Assigned global version");
        Ok(version)
    }

    /// Rebuild the checkpoint from the highest indexed record of `partition`.
    async fn resume(&self, partition: &str) -> Result<Checkpoint> {
        let query = Query::new(partition)
            .on_index(ORDERING_INDEX)
            .consistent()
            .backward()
            .limit(1);
        let page = self.backend.query(&query).await?;

        let Some(item) = page.items.first() else {
            info!(partition = %partition, "No indexed records, starting from zero");
            return Ok(Checkpoint {
                key: None,
                version: Version::ZERO,
            });
        };

        let record = Record::try_from(item)?;
        let version = record.global_version.ok_or_else(|| {
            BackendError::Malformed(format!(
                "index returned unindexed record {}",
                record.key
            ))
        })?;
        info!(partition = %partition, version = %version, "Resumed from ordering index");
        Ok(Checkpoint {
            key: Some(record.key),
            version,
        })
    }
}

/// Decode an indexed record into events carrying their global versions.
///
/// In [`Order::Desc`] events come newest first; offsets still count from
/// the record's first event, so the record's conceptually last event is the
/// one flagged eof in either direction.
pub fn global_events(
    record: &Record,
    serializer: &dyn Serializer,
    order: Order,
) -> Result<Vec<Envelope>> {
    let base = record.global_version.ok_or_else(|| {
        Error::load_failed(&record.key, "record has no global version")
    })?;

    let mut events = serializer.unmarshal_batch(&record.data)?;
    if events.is_empty() {
        return Err(Error::invalid_stream(
            &record.key,
            ValidationError::EmptyRecord {
                key: record.key.to_string(),
            },
        ));
    }
    if order == Order::Desc {
        let mut indexed: Vec<(usize, Envelope)> = events.into_iter().enumerate().collect();
        indexed.sort_by(|(i, a), (j, b)| (b.timestamp, j).cmp(&(a.timestamp, i)));
        events = indexed.into_iter().map(|(_, e)| e).collect();
    }

    let n = events.len();
    for (j, envelope) in events.iter_mut().enumerate() {
        let (offset, last) = match order {
            Order::Asc => (j, j + 1 == n),
            Order::Desc => (n - 1 - j, j == 0),
        };
        let offset = u8::try_from(offset).map_err(|_| VersionError::LimitExceeded {
            version: base.to_string(),
            op: "add",
            dp: 0,
            df: u8::MAX,
        })?;
        let version = base.add(0, offset)?;
        envelope.global_version = if last { version.eof() } else { version };
    }
    Ok(events)
}
