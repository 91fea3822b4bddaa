//! Tidemark - partition-keyed event store
//!
//! Appends batches of events as single records in a key-value table, in
//! one of two modes (time-keyed logging or version-keyed sourcing), then
//! orders every record of a partition into a global stream that can be
//! replayed from any version.

pub mod backend;
pub mod bus;
pub mod config;
pub mod error;
pub mod indexer;
pub mod replay;
pub mod serializer;
pub mod storage;
pub mod stream;
pub mod utils;
pub mod validation;
pub mod version;

pub use error::{ConflictReason, Error, Result};
pub use indexer::{global_events, BatchReport, GlobalIndexer};
pub use replay::{ReplayQuery, ReplaySummary, Replayer};
pub use storage::{EventStore, LoggingStore, Record, SourcingStore, Table};
pub use stream::{Envelope, StreamId};
pub use version::Version;
