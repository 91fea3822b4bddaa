//! Transaction session.
//!
//! Accumulates write operations for one append call. A session holding a
//! single operation executes it directly; several operations commit as one
//! atomic `transact_write`.

use std::sync::Arc;

use tracing::debug;

use super::{Backend, BackendError, Condition, Item, Key, Result, Update};

/// Cancellation reason reported for an operation whose precondition failed.
pub const CONDITIONAL_CHECK_FAILED: &str = "ConditionalCheckFailed";

/// One write inside a session or transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Put {
        item: Item,
        condition: Option<Condition>,
    },
    Update {
        key: Key,
        update: Update,
        condition: Option<Condition>,
    },
    Delete {
        key: Key,
        condition: Option<Condition>,
    },
    /// Assert a condition on an item without writing it.
    Check { key: Key, condition: Condition },
}

impl Operation {
    /// Key of the targeted item, when it can be determined.
    pub fn key(&self) -> Option<Key> {
        match self {
            Operation::Put { item, .. } => Key::from_item(item).ok(),
            Operation::Update { key, .. }
            | Operation::Delete { key, .. }
            | Operation::Check { key, .. } => Some(key.clone()),
        }
    }
}

/// Write operations owned by one in-flight append.
pub struct Session {
    backend: Arc<dyn Backend>,
    operations: Vec<Operation>,
}

impl Session {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            operations: Vec::new(),
        }
    }

    pub fn put(&mut self, item: Item, condition: Option<Condition>) -> &mut Self {
        self.push(Operation::Put { item, condition })
    }

    pub fn update(&mut self, key: Key, update: Update, condition: Option<Condition>) -> &mut Self {
        self.push(Operation::Update {
            key,
            update,
            condition,
        })
    }

    pub fn delete(&mut self, key: Key, condition: Option<Condition>) -> &mut Self {
        self.push(Operation::Delete { key, condition })
    }

    pub fn check(&mut self, key: Key, condition: Condition) -> &mut Self {
        self.push(Operation::Check { key, condition })
    }

    pub fn push(&mut self, operation: Operation) -> &mut Self {
        self.operations.push(operation);
        self
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Execute every accumulated operation, all-or-nothing.
    ///
    /// A canceled transaction is reported as `ConditionFailed` carrying the
    /// key of the first operation whose precondition failed.
    pub async fn commit(self) -> Result<()> {
        let Session {
            backend,
            mut operations,
        } = self;

        match operations.len() {
            0 => Ok(()),
            1 => match operations.remove(0) {
                Operation::Put { item, condition } => backend.put_item(item, condition).await,
                Operation::Update {
                    key,
                    update,
                    condition,
                } => backend.update_item(&key, update, condition).await,
                Operation::Delete { key, condition } => backend.delete_item(&key, condition).await,
                Operation::Check { key, condition } => {
                    let current = backend.get_item(&key, true).await?;
                    if condition.evaluate(current.as_ref()) {
                        Ok(())
                    } else {
                        Err(BackendError::ConditionFailed { key: Some(key) })
                    }
                }
            },
            n => {
                debug!(operations = n, "Committing transaction");
                let keys: Vec<Option<Key>> = operations.iter().map(Operation::key).collect();
                backend
                    .transact_write(operations)
                    .await
                    .map_err(|e| attribute_cancellation(e, &keys))
            }
        }
    }
}

fn attribute_cancellation(error: BackendError, keys: &[Option<Key>]) -> BackendError {
    if let BackendError::TransactionCanceled { reasons } = &error {
        let failed = reasons
            .iter()
            .position(|r| r.as_deref() == Some(CONDITIONAL_CHECK_FAILED));
        if let Some(i) = failed {
            return BackendError::ConditionFailed {
                key: keys.get(i).cloned().flatten(),
            };
        }
    }
    error
}
