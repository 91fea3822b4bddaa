//! Global stream replay.
//!
//! Scans a partition's ordering index between two global versions and hands
//! each event, stamped with its global version, to a handler. The scan
//! validates the global chain as it goes, so a replay either delivers a
//! gapless sequence or stops with an error at the first hole.

use std::convert::Infallible;
use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::{Backend, Query, ORDERING_INDEX};
use crate::config::{ReplayConfig, StoreConfig, DEFAULT_RECORD_LIMIT};
use crate::error::{BoxError, Error, Result};
use crate::indexer::global_events;
use crate::serializer::Serializer;
use crate::storage::{hash_key, Record};
use crate::stream::{Envelope, StreamId};
use crate::validation::{validate_event, Cursor, Order, ValidateOptions, ValidationError, Verdict};
use crate::version::Version;

/// Window and direction of one replay.
#[derive(Debug, Clone, Default)]
pub struct ReplayQuery {
    /// First global version to deliver; defaults to [`Version::MIN`].
    pub from: Option<Version>,
    /// Last global version to deliver; defaults to [`Version::MAX`].
    pub to: Option<Version>,
    /// Maximum number of records to read; 0 uses the replayer default.
    pub record_limit: usize,
    pub order: Order,
}

impl ReplayQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from(mut self, from: Version) -> Self {
        self.from = Some(from);
        self
    }

    pub fn to(mut self, to: Version) -> Self {
        self.to = Some(to);
        self
    }

    pub fn record_limit(mut self, limit: usize) -> Self {
        self.record_limit = limit;
        self
    }

    pub fn descending(mut self) -> Self {
        self.order = Order::Desc;
        self
    }
}

/// What a completed replay read and delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub records: usize,
    pub events: usize,
}

pub struct Replayer {
    backend: Arc<dyn Backend>,
    serializer: Arc<dyn Serializer>,
    page: u32,
    record_limit: usize,
}

impl Replayer {
    pub fn new(backend: Arc<dyn Backend>, serializer: Arc<dyn Serializer>) -> Self {
        Self {
            backend,
            serializer,
            page: 0,
            record_limit: DEFAULT_RECORD_LIMIT,
        }
    }

    pub fn from_config(
        backend: Arc<dyn Backend>,
        serializer: Arc<dyn Serializer>,
        store: &StoreConfig,
        replay: &ReplayConfig,
    ) -> Self {
        Self {
            page: store.page,
            record_limit: replay.record_limit.max(1),
            ..Self::new(backend, serializer)
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    /// Deliver the events of global stream `stream` selected by `query`.
    ///
    /// The handler sees events in global order (or reverse order for
    /// [`Order::Desc`]); its first error aborts the replay.
    pub async fn replay<F, E>(
        &self,
        stream: &StreamId,
        query: &ReplayQuery,
        mut handler: F,
    ) -> Result<ReplaySummary>
    where
        F: FnMut(Envelope) -> std::result::Result<(), E> + Send,
        E: Into<BoxError>,
    {
        if !stream.is_global() {
            return Err(Error::invalid_stream(
                stream,
                ValidationError::NotGlobal(stream.clone()),
            ));
        }

        let limit = match query.record_limit {
            0 => self.record_limit,
            n => n,
        };
        let from = query.from.filter(|v| !v.is_zero()).unwrap_or(Version::MIN);
        let to = match query.to {
            None => Version::MAX,
            Some(to) => {
                let window = u64::try_from(limit).unwrap_or(u64::MAX);
                to.min(from.trunc().add(window, 0).unwrap_or(Version::MAX))
            }
        };
        if to < from {
            debug!(stream = %stream, from = %from, to = %to, "Empty replay window");
            return Ok(ReplaySummary::default());
        }

        let lo = from.trunc().to_string();
        let hi = Version::new(to.p(), u8::MAX).to_string();
        let opts = ValidateOptions::global(query.order).with_versions(from, to);
        let mut cursor = Cursor::for_stream(stream.clone());
        let hash = hash_key(stream, self.page);

        debug!(stream = %stream, from = %from, to = %to, limit, "Starting replay");

        let mut summary = ReplaySummary::default();
        let mut start = None;
        'scan: loop {
            let mut scan = Query::new(&hash)
                .between(&lo, &hi)
                .on_index(ORDERING_INDEX)
                .consistent()
                .start_after(start.take());
            if query.order == Order::Desc {
                scan = scan.backward();
            }
            let page = self
                .backend
                .query(&scan)
                .await
                .map_err(|e| Error::load_failed(stream, e))?;

            for item in &page.items {
                if summary.records >= limit {
                    break 'scan;
                }
                let record = Record::try_from(item).map_err(|e| Error::load_failed(stream, e))?;
                summary.records += 1;

                for envelope in global_events(&record, self.serializer.as_ref(), query.order)? {
                    let verdict = validate_event(&envelope, &mut cursor, &opts)
                        .map_err(|e| Error::invalid_stream(stream, e))?;
                    if verdict == Verdict::Ignore {
                        continue;
                    }
                    handler(envelope).map_err(|e| Error::Handler(e.into()))?;
                    summary.events += 1;
                }
            }

            match page.last_key {
                Some(last) => start = Some(last),
                None => break,
            }
        }

        info!(
            stream = %stream,
            records = summary.records,
            events = summary.events,
            "Replay complete"
        );
        Ok(summary)
    }

    /// Replay into a vector.
    pub async fn collect(&self, stream: &StreamId, query: &ReplayQuery) -> Result<Vec<Envelope>> {
        let mut events = Vec::new();
        self.replay(stream, query, |envelope| {
            events.push(envelope);
            Ok::<_, Infallible>(())
        })
        .await?;
        Ok(events)
    }
}
