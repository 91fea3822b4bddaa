//! Change notification.
//!
//! After a record is durably written the append engine hands its events to
//! an optional [`Publisher`]. Publishing is best effort: a failure is logged
//! and never rolls back or fails the append.

mod mock;

pub use mock::MockPublisher;

use async_trait::async_trait;

use crate::stream::{Envelope, StreamId};

pub type Result<T> = std::result::Result<T, BusError>;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Publish failed: {0}")]
    Publish(String),
}

/// Delivers freshly appended events to downstream consumers.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, stream: &StreamId, events: &[Envelope]) -> Result<()>;
}
