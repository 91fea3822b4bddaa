//! Append engine.
//!
//! Two stores share one [`Table`]:
//!
//! - [`LoggingStore`]: records keyed by the first event's timestamp;
//!   duplicates are rejected, order between writers is not enforced.
//! - [`SourcingStore`]: records keyed by the batch's base version; a batch
//!   is accepted only if it extends the stream without a gap.
//!
//! Both are reachable through the [`EventStore`] trait.

mod keys;
mod logging;
mod record;
mod sourcing;
mod table;

pub use keys::{hash_key, logging_key, parts_prefix, sourcing_key, Layout};
pub use logging::LoggingStore;
pub use record::{
    Record, BASE_VERSION_ATTRIBUTE, COUNT_ATTRIBUTE, DATA_ATTRIBUTE, FIRST_TIMESTAMP_ATTRIBUTE,
    LAST_TIMESTAMP_ATTRIBUTE, TTL_ATTRIBUTE,
};
pub use sourcing::SourcingStore;
pub use table::Table;

use async_trait::async_trait;

use crate::backend::Session;
use crate::error::Result;
use crate::stream::{Envelope, StreamId};

/// Interface for event persistence.
///
/// An append writes exactly one record holding the whole batch, or nothing.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append `events` as one record.
    ///
    /// When `session` is given, its operations commit atomically with the
    /// record. Returns the written record, without a global version.
    async fn append_with(
        &self,
        stream: &StreamId,
        events: &[Envelope],
        session: Option<Session>,
    ) -> Result<Record>;

    async fn append(&self, stream: &StreamId, events: &[Envelope]) -> Result<Record> {
        self.append_with(stream, events, None).await
    }

    /// Every live event of `stream` in append order.
    async fn load_stream(&self, stream: &StreamId) -> Result<Vec<Envelope>>;
}
