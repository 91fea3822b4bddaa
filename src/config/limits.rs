//! Append and replay limits.
//!
//! Record size defaults to just under the DynamoDB item limit (400 KB) to
//! leave room for key and metadata attributes.

use std::time::Duration;

use serde::Deserialize;

/// Default maximum serialized batch size per record (384 KB).
pub const DEFAULT_MAX_RECORD_BYTES: usize = 384 * 1024;

/// Default maximum time span of one logging batch (60 s).
pub const DEFAULT_MAX_BATCH_SPAN_MS: u64 = 60_000;

/// Default number of records per replay.
pub const DEFAULT_RECORD_LIMIT: usize = 500;

/// Append engine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Page suffix of the hash key (`{global}#{page}`).
    pub page: u32,
    /// Maximum serialized batch size in bytes; 0 disables the check.
    pub max_record_bytes: usize,
    /// Maximum time span of one logging batch in milliseconds.
    ///
    /// Also widens logging loads so records straddling `since` are found.
    pub max_batch_span_ms: u64,
}

impl StoreConfig {
    pub fn max_batch_span(&self) -> Duration {
        Duration::from_millis(self.max_batch_span_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page: 0,
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
            max_batch_span_ms: DEFAULT_MAX_BATCH_SPAN_MS,
        }
    }
}

/// Replay configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Records per replay when the query does not set a limit.
    pub record_limit: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            record_limit: DEFAULT_RECORD_LIMIT,
        }
    }
}
