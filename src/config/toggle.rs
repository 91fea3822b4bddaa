//! Append gate.
//!
//! A toggle is consulted before every append. Dynamic implementations fetch
//! their flag from a feature-flag or config service.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::stream::StreamId;

#[async_trait]
pub trait Toggle: Send + Sync {
    /// Whether appends to `stream` are currently allowed.
    async fn append_enabled(&self, stream: &StreamId) -> bool;
}

/// Process-local on/off switch.
#[derive(Debug)]
pub struct StaticToggle {
    enabled: AtomicBool,
}

impl StaticToggle {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn set(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

impl Default for StaticToggle {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl Toggle for StaticToggle {
    async fn append_enabled(&self, _stream: &StreamId) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}
