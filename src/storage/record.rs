//! Stored records.
//!
//! One record holds one appended batch. Its attributes:
//!
//! | attribute | type | content |
//! |-----------|------|---------|
//! | `pk`  | S | `{global}#{page}` |
//! | `sk`  | S | mode-specific range key |
//! | `data`| B | serialized batch |
//! | `t0`  | N | first event timestamp, ns |
//! | `t1`  | N | last event timestamp, ns |
//! | `n`   | N | event count |
//! | `v0`  | S | base version (sourcing only) |
//! | `ttl` | N | expiry, epoch seconds (optional) |
//! | `gv`  | S | global version (set by the indexer) |

use chrono::{DateTime, Utc};

use crate::backend::{AttributeValue, BackendError, Item, Key, ORDERING_KEY};
use crate::version::Version;

pub const DATA_ATTRIBUTE: &str = "data";
pub const FIRST_TIMESTAMP_ATTRIBUTE: &str = "t0";
pub const LAST_TIMESTAMP_ATTRIBUTE: &str = "t1";
pub const COUNT_ATTRIBUTE: &str = "n";
pub const BASE_VERSION_ATTRIBUTE: &str = "v0";
pub const TTL_ATTRIBUTE: &str = "ttl";

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub key: Key,
    pub data: Vec<u8>,
    /// Nanoseconds since the epoch.
    pub first_timestamp: i64,
    pub last_timestamp: i64,
    pub event_count: u32,
    pub base_version: Option<Version>,
    /// Epoch seconds after which the record is treated as absent.
    pub expires_at: Option<i64>,
    pub global_version: Option<Version>,
}

impl Record {
    pub fn to_item(&self) -> Item {
        let mut item = self.key.to_item();
        item.insert(
            DATA_ATTRIBUTE.to_string(),
            AttributeValue::B(self.data.clone()),
        );
        item.insert(
            FIRST_TIMESTAMP_ATTRIBUTE.to_string(),
            AttributeValue::N(self.first_timestamp),
        );
        item.insert(
            LAST_TIMESTAMP_ATTRIBUTE.to_string(),
            AttributeValue::N(self.last_timestamp),
        );
        item.insert(
            COUNT_ATTRIBUTE.to_string(),
            AttributeValue::N(i64::from(self.event_count)),
        );
        if let Some(base) = self.base_version {
            item.insert(
                BASE_VERSION_ATTRIBUTE.to_string(),
                AttributeValue::S(base.to_string()),
            );
        }
        if let Some(expires_at) = self.expires_at {
            item.insert(TTL_ATTRIBUTE.to_string(), AttributeValue::N(expires_at));
        }
        if let Some(gv) = self.global_version {
            item.insert(ORDERING_KEY.to_string(), AttributeValue::S(gv.to_string()));
        }
        item
    }

    /// Whether the record's TTL has passed at `now`.
    ///
    /// Expired records may linger in storage until the backend deletes them.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|t| t <= now.timestamp())
    }

    /// Whether the indexer has assigned a global version.
    pub fn is_indexed(&self) -> bool {
        self.global_version.is_some()
    }
}

fn malformed(key: &Key, what: &str) -> BackendError {
    BackendError::Malformed(format!("record {} has no valid {}", key, what))
}

fn number(item: &Item, key: &Key, name: &str) -> Result<i64, BackendError> {
    item.get(name)
        .and_then(AttributeValue::as_n)
        .ok_or_else(|| malformed(key, name))
}

fn version(item: &Item, key: &Key, name: &str) -> Result<Option<Version>, BackendError> {
    match item.get(name) {
        None => Ok(None),
        Some(value) => value
            .as_s()
            .and_then(|s| s.parse().ok())
            .map(Some)
            .ok_or_else(|| malformed(key, name)),
    }
}

impl TryFrom<&Item> for Record {
    type Error = BackendError;

    fn try_from(item: &Item) -> Result<Self, Self::Error> {
        let key = Key::from_item(item)?;
        let data = item
            .get(DATA_ATTRIBUTE)
            .and_then(AttributeValue::as_b)
            .ok_or_else(|| malformed(&key, DATA_ATTRIBUTE))?
            .to_vec();
        let event_count = u32::try_from(number(item, &key, COUNT_ATTRIBUTE)?)
            .map_err(|_| malformed(&key, COUNT_ATTRIBUTE))?;

        Ok(Record {
            first_timestamp: number(item, &key, FIRST_TIMESTAMP_ATTRIBUTE)?,
            last_timestamp: number(item, &key, LAST_TIMESTAMP_ATTRIBUTE)?,
            base_version: version(item, &key, BASE_VERSION_ATTRIBUTE)?,
            expires_at: item.get(TTL_ATTRIBUTE).and_then(AttributeValue::as_n),
            global_version: version(item, &key, ORDERING_KEY)?,
            event_count,
            data,
            key,
        })
    }
}

impl TryFrom<Item> for Record {
    type Error = BackendError;

    fn try_from(item: Item) -> Result<Self, Self::Error> {
        Record::try_from(&item)
    }
}
