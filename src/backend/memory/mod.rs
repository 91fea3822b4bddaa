//! In-memory backend.
//!
//! Implements the full [`Backend`] contract over ordered maps: conditional
//! writes, local secondary indexes, exclusive-start pagination with a fixed
//! page size, and all-or-nothing transactions. Failure switches and call
//! counters let tests observe and break the engine's storage traffic.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::session::CONDITIONAL_CHECK_FAILED;
use super::{
    AttributeValue, Backend, BackendError, Condition, Item, Key, Operation, Query, QueryPage,
    Result, Update, HASH_KEY, ORDERING_INDEX, ORDERING_KEY, RANGE_KEY,
};

/// Items returned per query page unless the query asks for fewer.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Range key -> item, for one hash key.
type Partition = BTreeMap<String, Item>;

pub struct MemoryBackend {
    partitions: RwLock<HashMap<String, Partition>>,
    /// Index name -> sort attribute.
    indexes: HashMap<String, String>,
    page_size: usize,
    fail_on_write: RwLock<bool>,
    fail_on_read: RwLock<bool>,
    get_item_calls: AtomicUsize,
    transactions: AtomicUsize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend whose query pages hold at most `page_size` items.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            indexes: HashMap::from([(ORDERING_INDEX.to_string(), ORDERING_KEY.to_string())]),
            page_size: page_size.max(1),
            fail_on_write: RwLock::new(false),
            fail_on_read: RwLock::new(false),
            get_item_calls: AtomicUsize::new(0),
            transactions: AtomicUsize::new(0),
        }
    }

    /// Register an additional local secondary index.
    pub fn with_index(mut self, name: impl Into<String>, sort_attribute: impl Into<String>) -> Self {
        self.indexes.insert(name.into(), sort_attribute.into());
        self
    }

    pub async fn set_fail_on_write(&self, fail: bool) {
        *self.fail_on_write.write().await = fail;
    }

    pub async fn set_fail_on_read(&self, fail: bool) {
        *self.fail_on_read.write().await = fail;
    }

    /// Number of `get_item` calls served so far.
    pub fn get_item_count(&self) -> usize {
        self.get_item_calls.load(Ordering::SeqCst)
    }

    /// Number of `transact_write` calls attempted so far.
    pub fn transaction_count(&self) -> usize {
        self.transactions.load(Ordering::SeqCst)
    }

    /// Total number of stored items.
    pub async fn len(&self) -> usize {
        self.partitions.read().await.values().map(BTreeMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        self.partitions.write().await.clear();
    }

    async fn check_write(&self) -> Result<()> {
        if *self.fail_on_write.read().await {
            return Err(BackendError::Unavailable("write failure injected".into()));
        }
        Ok(())
    }

    async fn check_read(&self) -> Result<()> {
        if *self.fail_on_read.read().await {
            return Err(BackendError::Unavailable("read failure injected".into()));
        }
        Ok(())
    }

    fn sort_attribute(&self, index: Option<&String>) -> Result<Option<&str>> {
        match index {
            None => Ok(None),
            Some(name) => self
                .indexes
                .get(name)
                .map(|attr| Some(attr.as_str()))
                .ok_or_else(|| BackendError::Request(format!("unknown index {}", name))),
        }
    }
}

fn current<'a>(partitions: &'a HashMap<String, Partition>, key: &Key) -> Option<&'a Item> {
    partitions.get(&key.hash).and_then(|p| p.get(&key.range))
}

fn check(
    partitions: &HashMap<String, Partition>,
    key: &Key,
    condition: Option<&Condition>,
) -> bool {
    condition.is_none_or(|c| c.evaluate(current(partitions, key)))
}

fn apply(partitions: &mut HashMap<String, Partition>, operation: Operation) -> Result<()> {
    match operation {
        Operation::Put { item, .. } => {
            let key = Key::from_item(&item)?;
            partitions
                .entry(key.hash)
                .or_default()
                .insert(key.range, item);
        }
        Operation::Update { key, update, .. } => {
            let item = partitions
                .entry(key.hash.clone())
                .or_default()
                .entry(key.range.clone())
                .or_insert_with(|| key.to_item());
            for (name, value) in update.assignments() {
                item.insert(name.clone(), value.clone());
            }
        }
        Operation::Delete { key, .. } => {
            if let Some(partition) = partitions.get_mut(&key.hash) {
                partition.remove(&key.range);
            }
        }
        Operation::Check { .. } => {}
    }
    Ok(())
}

fn validate_update(update: &Update) -> Result<()> {
    match update
        .assignments()
        .iter()
        .find(|(name, _)| name == HASH_KEY || name == RANGE_KEY)
    {
        Some((name, _)) => Err(BackendError::Request(format!(
            "cannot update key attribute {}",
            name
        ))),
        None => Ok(()),
    }
}

fn condition_of(operation: &Operation) -> Option<&Condition> {
    match operation {
        Operation::Put { condition, .. }
        | Operation::Update { condition, .. }
        | Operation::Delete { condition, .. } => condition.as_ref(),
        Operation::Check { condition, .. } => Some(condition),
    }
}

/// Key attributes identifying `item`'s position in a scan.
fn position_of(item: &Item, sort_attribute: Option<&str>) -> Item {
    [Some(HASH_KEY), Some(RANGE_KEY), sort_attribute]
        .into_iter()
        .flatten()
        .filter_map(|name| item.get(name).map(|v| (name.to_string(), v.clone())))
        .collect()
}

fn string_attr<'a>(item: &'a Item, name: &str) -> Result<&'a str> {
    item.get(name)
        .and_then(AttributeValue::as_s)
        .ok_or_else(|| BackendError::Malformed(format!("start key missing {}", name)))
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get_item(&self, key: &Key, _consistent: bool) -> Result<Option<Item>> {
        self.check_read().await?;
        self.get_item_calls.fetch_add(1, Ordering::SeqCst);
        let partitions = self.partitions.read().await;
        Ok(current(&partitions, key).cloned())
    }

    async fn put_item(&self, item: Item, condition: Option<Condition>) -> Result<()> {
        self.check_write().await?;
        let key = Key::from_item(&item)?;
        let mut partitions = self.partitions.write().await;
        if !check(&partitions, &key, condition.as_ref()) {
            return Err(BackendError::ConditionFailed { key: Some(key) });
        }
        apply(&mut partitions, Operation::Put { item, condition })
    }

    async fn update_item(
        &self,
        key: &Key,
        update: Update,
        condition: Option<Condition>,
    ) -> Result<()> {
        self.check_write().await?;
        validate_update(&update)?;
        let mut partitions = self.partitions.write().await;
        if !check(&partitions, key, condition.as_ref()) {
            return Err(BackendError::ConditionFailed {
                key: Some(key.clone()),
            });
        }
        apply(
            &mut partitions,
            Operation::Update {
                key: key.clone(),
                update,
                condition,
            },
        )
    }

    async fn delete_item(&self, key: &Key, condition: Option<Condition>) -> Result<()> {
        self.check_write().await?;
        let mut partitions = self.partitions.write().await;
        if !check(&partitions, key, condition.as_ref()) {
            return Err(BackendError::ConditionFailed {
                key: Some(key.clone()),
            });
        }
        apply(
            &mut partitions,
            Operation::Delete {
                key: key.clone(),
                condition,
            },
        )
    }

    async fn query(&self, query: &Query) -> Result<QueryPage> {
        self.check_read().await?;
        let sort_attribute = self.sort_attribute(query.index.as_ref())?;

        let partitions = self.partitions.read().await;
        let Some(partition) = partitions.get(&query.hash_key) else {
            return Ok(QueryPage::default());
        };

        // (sort value, range key, item); index scans skip items without the attribute.
        let mut rows: Vec<(&str, &str, &Item)> = partition
            .iter()
            .filter_map(|(range, item)| {
                let sort = match sort_attribute {
                    Some(attr) => item.get(attr)?.as_s()?,
                    None => range.as_str(),
                };
                Some((sort, range.as_str(), item))
            })
            .filter(|(sort, _, _)| query.range.as_ref().is_none_or(|r| r.matches(sort)))
            .collect();
        rows.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        if !query.forward {
            rows.reverse();
        }

        if let Some(start) = &query.start_key {
            let start_range = string_attr(start, RANGE_KEY)?;
            let start_sort = match sort_attribute {
                Some(attr) => string_attr(start, attr)?,
                None => start_range,
            };
            let origin = (start_sort, start_range);
            rows.retain(|(sort, range, _)| {
                if query.forward {
                    (*sort, *range) > origin
                } else {
                    (*sort, *range) < origin
                }
            });
        }

        let limit = query.limit.unwrap_or(usize::MAX).min(self.page_size);
        let more = rows.len() > limit;
        let items: Vec<Item> = rows
            .into_iter()
            .take(limit)
            .map(|(_, _, item)| item.clone())
            .collect();
        let last_key = if more {
            items.last().map(|item| position_of(item, sort_attribute))
        } else {
            None
        };

        Ok(QueryPage { items, last_key })
    }

    async fn transact_write(&self, operations: Vec<Operation>) -> Result<()> {
        self.check_write().await?;
        self.transactions.fetch_add(1, Ordering::SeqCst);

        let mut keys = HashSet::new();
        for operation in &operations {
            let key = operation
                .key()
                .ok_or_else(|| BackendError::Malformed("operation without key".into()))?;
            if !keys.insert(key.clone()) {
                return Err(BackendError::Request(format!(
                    "multiple operations on {}",
                    key
                )));
            }
            if let Operation::Update { update, .. } = operation {
                validate_update(update)?;
            }
        }

        let mut partitions = self.partitions.write().await;
        let reasons: Vec<Option<String>> = operations
            .iter()
            .map(|operation| {
                let passes = operation
                    .key()
                    .is_some_and(|key| check(&partitions, &key, condition_of(operation)));
                (!passes).then(|| CONDITIONAL_CHECK_FAILED.to_string())
            })
            .collect();
        if reasons.iter().any(Option::is_some) {
            return Err(BackendError::TransactionCanceled { reasons });
        }

        for operation in operations {
            apply(&mut partitions, operation)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
