//! Recording publisher for tests.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{BusError, Publisher, Result};
use crate::stream::{Envelope, StreamId};

/// Records every published batch; can be switched to fail.
#[derive(Default)]
pub struct MockPublisher {
    published: RwLock<Vec<(StreamId, Vec<Envelope>)>>,
    fail_on_publish: RwLock<bool>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.fail_on_publish.write().await = fail;
    }

    /// Number of batches published so far.
    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    pub async fn take_published(&self) -> Vec<(StreamId, Vec<Envelope>)> {
        std::mem::take(&mut *self.published.write().await)
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn publish(&self, stream: &StreamId, events: &[Envelope]) -> Result<()> {
        if *self.fail_on_publish.read().await {
            return Err(BusError::Publish("Mock publish failure".to_string()));
        }
        self.published
            .write()
            .await
            .push((stream.clone(), events.to_vec()));
        Ok(())
    }
}
