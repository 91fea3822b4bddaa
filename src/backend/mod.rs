//! Conditional-write key-value backend contract.
//!
//! The append engine, the indexer and the replayer only talk to storage
//! through [`Backend`]: conditional put/update/delete, range queries over the
//! base table or the ordering index, and atomic multi-item writes.
//!
//! Implementations:
//! - `MemoryBackend`: in-process, always available (tests, embedded use)
//! - `DynamoBackend`: DynamoDB (feature `dynamo`)

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;
#[cfg(not(feature = "dynamo"))]
use tracing::error;

use crate::config::{BackendConfig, BackendType};
use crate::error::BoxError;

mod memory;
mod session;

#[cfg(feature = "dynamo")]
mod dynamo;

pub use memory::MemoryBackend;
pub use session::{Operation, Session};

#[cfg(feature = "dynamo")]
pub use dynamo::DynamoBackend;

/// Hash (partition) key attribute.
pub const HASH_KEY: &str = "pk";
/// Range (sort) key attribute.
pub const RANGE_KEY: &str = "sk";
/// Attribute holding the assigned global version.
pub const ORDERING_KEY: &str = "gv";
/// Local secondary index sorted by [`ORDERING_KEY`].
pub const ORDERING_INDEX: &str = "gv-index";

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors that can occur during backend operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    #[error("Condition failed{}", key.as_ref().map(|k| format!(" on {}", k)).unwrap_or_default())]
    ConditionFailed { key: Option<Key> },

    #[error("Transaction canceled: {reasons:?}")]
    TransactionCanceled { reasons: Vec<Option<String>> },

    #[error("Request throttled: {0}")]
    Throttled(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Timed out after {elapsed:?} waiting for {what}")]
    Timeout { what: String, elapsed: Duration },

    #[error("Malformed item: {0}")]
    Malformed(String),
}

impl BackendError {
    pub fn is_condition_failed(&self) -> bool {
        matches!(self, BackendError::ConditionFailed { .. })
    }
}

/// A stored attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    S(String),
    N(i64),
    B(Vec<u8>),
}

impl AttributeValue {
    pub fn as_s(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_n(&self) -> Option<i64> {
        match self {
            AttributeValue::N(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_b(&self) -> Option<&[u8]> {
        match self {
            AttributeValue::B(b) => Some(b),
            _ => None,
        }
    }
}

/// One stored item: attribute name -> value.
pub type Item = HashMap<String, AttributeValue>;

/// Primary key of an item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    pub hash: String,
    pub range: String,
}

impl Key {
    pub fn new(hash: impl Into<String>, range: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            range: range.into(),
        }
    }

    /// Extract the primary key attributes of an item.
    pub fn from_item(item: &Item) -> Result<Self> {
        let get = |name: &str| {
            item.get(name)
                .and_then(AttributeValue::as_s)
                .map(str::to_string)
                .ok_or_else(|| BackendError::Malformed(format!("missing key attribute {}", name)))
        };
        Ok(Self {
            hash: get(HASH_KEY)?,
            range: get(RANGE_KEY)?,
        })
    }

    /// The key as a two-attribute item.
    pub fn to_item(&self) -> Item {
        HashMap::from([
            (HASH_KEY.to_string(), AttributeValue::S(self.hash.clone())),
            (RANGE_KEY.to_string(), AttributeValue::S(self.range.clone())),
        ])
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {}]", self.hash, self.range)
    }
}

/// Write precondition on the current state of the target item.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Exists(String),
    NotExists(String),
    All(Vec<Condition>),
}

impl Condition {
    /// Evaluate against the current item (`None` when absent).
    pub fn evaluate(&self, item: Option<&Item>) -> bool {
        match self {
            Condition::Exists(attr) => item.is_some_and(|i| i.contains_key(attr)),
            Condition::NotExists(attr) => !item.is_some_and(|i| i.contains_key(attr)),
            Condition::All(conditions) => conditions.iter().all(|c| c.evaluate(item)),
        }
    }
}

/// Attribute assignments applied by `update_item`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    set: Vec<(String, AttributeValue)>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.set.push((name.into(), value));
        self
    }

    pub fn assignments(&self) -> &[(String, AttributeValue)] {
        &self.set
    }
}

/// Range key predicate of a query.
#[derive(Debug, Clone, PartialEq)]
pub enum RangeCondition {
    /// Inclusive on both ends.
    Between(String, String),
    BeginsWith(String),
}

impl RangeCondition {
    pub fn matches(&self, value: &str) -> bool {
        match self {
            RangeCondition::Between(lo, hi) => value >= lo.as_str() && value <= hi.as_str(),
            RangeCondition::BeginsWith(prefix) => value.starts_with(prefix.as_str()),
        }
    }
}

/// A single-partition range query.
///
/// With `index` set, the range condition and the ordering apply to the
/// index's sort attribute, and only items carrying that attribute match.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub hash_key: String,
    pub range: Option<RangeCondition>,
    pub index: Option<String>,
    pub consistent: bool,
    pub forward: bool,
    pub limit: Option<usize>,
    /// Exclusive start: the `last_key` of the previous page.
    pub start_key: Option<Item>,
}

impl Query {
    pub fn new(hash_key: impl Into<String>) -> Self {
        Self {
            hash_key: hash_key.into(),
            range: None,
            index: None,
            consistent: false,
            forward: true,
            limit: None,
            start_key: None,
        }
    }

    pub fn between(mut self, lo: impl Into<String>, hi: impl Into<String>) -> Self {
        self.range = Some(RangeCondition::Between(lo.into(), hi.into()));
        self
    }

    pub fn begins_with(mut self, prefix: impl Into<String>) -> Self {
        self.range = Some(RangeCondition::BeginsWith(prefix.into()));
        self
    }

    pub fn on_index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    pub fn consistent(mut self) -> Self {
        self.consistent = true;
        self
    }

    pub fn backward(mut self) -> Self {
        self.forward = false;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start_after(mut self, start_key: Option<Item>) -> Self {
        self.start_key = start_key;
        self
    }
}

/// One page of query results.
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    pub items: Vec<Item>,
    /// Set when more items may follow; pass to [`Query::start_after`].
    pub last_key: Option<Item>,
}

/// Interface for the conditional-write key-value store.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn get_item(&self, key: &Key, consistent: bool) -> Result<Option<Item>>;

    /// Write a whole item, failing with `ConditionFailed` if the
    /// precondition does not hold.
    async fn put_item(&self, item: Item, condition: Option<Condition>) -> Result<()>;

    /// Set attributes on an item, creating it if absent.
    async fn update_item(&self, key: &Key, update: Update, condition: Option<Condition>)
        -> Result<()>;

    async fn delete_item(&self, key: &Key, condition: Option<Condition>) -> Result<()>;

    /// Fetch one page of a range query.
    async fn query(&self, query: &Query) -> Result<QueryPage>;

    /// Commit all operations atomically or none of them.
    ///
    /// A failed precondition cancels the whole transaction with
    /// `TransactionCanceled`, one reason slot per operation.
    async fn transact_write(&self, operations: Vec<Operation>) -> Result<()>;
}

/// Initialize the backend selected by configuration.
pub async fn init_backend(
    config: &BackendConfig,
) -> std::result::Result<Arc<dyn Backend>, BoxError> {
    info!(backend = %config.backend_type, "Initializing backend");

    match config.backend_type {
        BackendType::Memory => Ok(Arc::new(MemoryBackend::with_page_size(
            config.memory.page_size,
        ))),
        #[cfg(feature = "dynamo")]
        BackendType::Dynamo => {
            let backend = DynamoBackend::new(&config.dynamo).await?;
            if config.dynamo.create_table {
                backend
                    .ensure_table(Duration::from_secs(config.dynamo.provision_timeout_secs))
                    .await?;
            }
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "dynamo"))]
        BackendType::Dynamo => {
            error!("DynamoDB backend requested but 'dynamo' feature is not enabled");
            Err("DynamoDB feature not enabled".into())
        }
    }
}
