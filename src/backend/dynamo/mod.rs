//! DynamoDB backend.
//!
//! Table schema:
//! - `pk` (S): `{global}#{page}` partition key
//! - `sk` (S): record range key
//! - `gv` (S): assigned global version, sort key of the `gv-index` LSI
//! - `ttl` (N): epoch seconds, DynamoDB TTL attribute

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue as DynamoValue, BillingMode, ConditionCheck, Delete,
    KeySchemaElement, KeyType, LocalSecondaryIndex, Projection, ProjectionType, Put,
    ScalarAttributeType, TableStatus, TimeToLiveSpecification, TransactWriteItem,
    Update as DynamoUpdate,
};
use aws_sdk_dynamodb::Client;
use tracing::{debug, info};

use super::{
    AttributeValue, Backend, BackendError, Condition, Item, Key, Operation, Query, QueryPage,
    RangeCondition, Result, Update, HASH_KEY, ORDERING_INDEX, ORDERING_KEY, RANGE_KEY,
};
use crate::config::DynamoConfig;
use crate::storage::TTL_ATTRIBUTE;
use crate::utils::retry::{provisioning_backoff, wait_until};

const CONDITIONAL_CHECK_FAILED_EXCEPTION: &str = "ConditionalCheckFailedException";
const RESOURCE_IN_USE_EXCEPTION: &str = "ResourceInUseException";
const THROTTLING_CODES: &[&str] = &[
    "ProvisionedThroughputExceededException",
    "ThrottlingException",
    "RequestLimitExceeded",
];

/// DynamoDB implementation of [`Backend`].
pub struct DynamoBackend {
    client: Client,
    table_name: String,
}

impl DynamoBackend {
    /// Connect using the default AWS configuration chain.
    pub async fn new(config: &DynamoConfig) -> Result<Self> {
        let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;

        let client = if let Some(endpoint) = &config.endpoint_url {
            let dynamo_config = aws_sdk_dynamodb::config::Builder::from(&sdk_config)
                .endpoint_url(endpoint)
                .build();
            Client::from_conf(dynamo_config)
        } else {
            Client::new(&sdk_config)
        };

        info!(table = %config.table, "Connected to DynamoDB");
        Ok(Self::with_client(client, config.table.clone()))
    }

    pub fn with_client(client: Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Create the table and its ordering index if missing, wait until it is
    /// ACTIVE, then enable TTL.
    pub async fn ensure_table(&self, deadline: Duration) -> Result<()> {
        let created = self
            .client
            .create_table()
            .table_name(&self.table_name)
            .billing_mode(BillingMode::PayPerRequest)
            .attribute_definitions(attribute(HASH_KEY)?)
            .attribute_definitions(attribute(RANGE_KEY)?)
            .attribute_definitions(attribute(ORDERING_KEY)?)
            .key_schema(key_element(HASH_KEY, KeyType::Hash)?)
            .key_schema(key_element(RANGE_KEY, KeyType::Range)?)
            .local_secondary_indexes(
                LocalSecondaryIndex::builder()
                    .index_name(ORDERING_INDEX)
                    .key_schema(key_element(HASH_KEY, KeyType::Hash)?)
                    .key_schema(key_element(ORDERING_KEY, KeyType::Range)?)
                    .projection(
                        Projection::builder()
                            .projection_type(ProjectionType::All)
                            .build(),
                    )
                    .build()
                    .map_err(build_error)?,
            )
            .send()
            .await;

        match created {
            Ok(_) => info!(table = %self.table_name, "Creating table"),
            Err(e) if error_code(&e) == Some(RESOURCE_IN_USE_EXCEPTION) => {
                debug!(table = %self.table_name, "Table already exists");
            }
            Err(e) => return Err(classify("create_table", e, None)),
        }

        wait_until(
            &format!("table {} to become ACTIVE", self.table_name),
            deadline,
            provisioning_backoff(),
            || async {
                let described = self
                    .client
                    .describe_table()
                    .table_name(&self.table_name)
                    .send()
                    .await
                    .map_err(|e| classify("describe_table", e, None))?;
                Ok(described
                    .table()
                    .and_then(|t| t.table_status())
                    .is_some_and(|s| *s == TableStatus::Active))
            },
        )
        .await?;

        self.enable_ttl().await?;
        info!(table = %self.table_name, "Table ready");
        Ok(())
    }

    async fn enable_ttl(&self) -> Result<()> {
        let spec = TimeToLiveSpecification::builder()
            .attribute_name(TTL_ATTRIBUTE)
            .enabled(true)
            .build()
            .map_err(build_error)?;
        match self
            .client
            .update_time_to_live()
            .table_name(&self.table_name)
            .time_to_live_specification(spec)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            // Re-enabling an already enabled TTL is a ValidationException.
            Err(e) if error_code(&e) == Some("ValidationException") => {
                debug!(table = %self.table_name, "TTL already enabled");
                Ok(())
            }
            Err(e) => Err(classify("update_time_to_live", e, None)),
        }
    }

    fn transact_item(&self, operation: Operation) -> Result<TransactWriteItem> {
        let item = match operation {
            Operation::Put { item, condition } => {
                let mut expr = Expression::default();
                let condition = condition.map(|c| expr.condition(&c));
                let put = Put::builder()
                    .table_name(&self.table_name)
                    .set_item(Some(to_dynamo_item(&item)))
                    .set_condition_expression(condition)
                    .set_expression_attribute_names(expr.names())
                    .build()
                    .map_err(build_error)?;
                TransactWriteItem::builder().put(put).build()
            }
            Operation::Update {
                key,
                update,
                condition,
            } => {
                let mut expr = Expression::default();
                let update_expression = expr.update(&update);
                let condition = condition.map(|c| expr.condition(&c));
                let update = DynamoUpdate::builder()
                    .table_name(&self.table_name)
                    .set_key(Some(to_dynamo_item(&key.to_item())))
                    .update_expression(update_expression)
                    .set_condition_expression(condition)
                    .set_expression_attribute_names(expr.names())
                    .set_expression_attribute_values(expr.values())
                    .build()
                    .map_err(build_error)?;
                TransactWriteItem::builder().update(update).build()
            }
            Operation::Delete { key, condition } => {
                let mut expr = Expression::default();
                let condition = condition.map(|c| expr.condition(&c));
                let delete = Delete::builder()
                    .table_name(&self.table_name)
                    .set_key(Some(to_dynamo_item(&key.to_item())))
                    .set_condition_expression(condition)
                    .set_expression_attribute_names(expr.names())
                    .build()
                    .map_err(build_error)?;
                TransactWriteItem::builder().delete(delete).build()
            }
            Operation::Check { key, condition } => {
                let mut expr = Expression::default();
                let condition = expr.condition(&condition);
                let check = ConditionCheck::builder()
                    .table_name(&self.table_name)
                    .set_key(Some(to_dynamo_item(&key.to_item())))
                    .condition_expression(condition)
                    .set_expression_attribute_names(expr.names())
                    .build()
                    .map_err(build_error)?;
                TransactWriteItem::builder().condition_check(check).build()
            }
        };
        Ok(item)
    }
}

#[async_trait]
impl Backend for DynamoBackend {
    async fn get_item(&self, key: &Key, consistent: bool) -> Result<Option<Item>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .set_key(Some(to_dynamo_item(&key.to_item())))
            .consistent_read(consistent)
            .send()
            .await
            .map_err(|e| classify("get_item", e, Some(key)))?;

        output.item().map(from_dynamo_item).transpose()
    }

    async fn put_item(&self, item: Item, condition: Option<Condition>) -> Result<()> {
        let key = Key::from_item(&item)?;
        let mut expr = Expression::default();
        let condition = condition.map(|c| expr.condition(&c));

        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(to_dynamo_item(&item)))
            .set_condition_expression(condition)
            .set_expression_attribute_names(expr.names())
            .send()
            .await
            .map_err(|e| classify("put_item", e, Some(&key)))?;

        debug!(key = %key, "Stored item in DynamoDB");
        Ok(())
    }

    async fn update_item(
        &self,
        key: &Key,
        update: Update,
        condition: Option<Condition>,
    ) -> Result<()> {
        let mut expr = Expression::default();
        let update_expression = expr.update(&update);
        let condition = condition.map(|c| expr.condition(&c));

        self.client
            .update_item()
            .table_name(&self.table_name)
            .set_key(Some(to_dynamo_item(&key.to_item())))
            .update_expression(update_expression)
            .set_condition_expression(condition)
            .set_expression_attribute_names(expr.names())
            .set_expression_attribute_values(expr.values())
            .send()
            .await
            .map_err(|e| classify("update_item", e, Some(key)))?;
        Ok(())
    }

    async fn delete_item(&self, key: &Key, condition: Option<Condition>) -> Result<()> {
        let mut expr = Expression::default();
        let condition = condition.map(|c| expr.condition(&c));

        self.client
            .delete_item()
            .table_name(&self.table_name)
            .set_key(Some(to_dynamo_item(&key.to_item())))
            .set_condition_expression(condition)
            .set_expression_attribute_names(expr.names())
            .send()
            .await
            .map_err(|e| classify("delete_item", e, Some(key)))?;
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<QueryPage> {
        let sort_attribute = match query.index.as_deref() {
            None => RANGE_KEY,
            Some(ORDERING_INDEX) => ORDERING_KEY,
            Some(other) => return Err(BackendError::Request(format!("unknown index {}", other))),
        };

        let mut expr = Expression::default();
        let hash = expr.name(HASH_KEY);
        let hash_value = expr.value(AttributeValue::S(query.hash_key.clone()));
        let mut key_condition = format!("{} = {}", hash, hash_value);
        match &query.range {
            Some(RangeCondition::Between(lo, hi)) => {
                let sort = expr.name(sort_attribute);
                let lo = expr.value(AttributeValue::S(lo.clone()));
                let hi = expr.value(AttributeValue::S(hi.clone()));
                key_condition.push_str(&format!(" AND {} BETWEEN {} AND {}", sort, lo, hi));
            }
            Some(RangeCondition::BeginsWith(prefix)) => {
                let sort = expr.name(sort_attribute);
                let prefix = expr.value(AttributeValue::S(prefix.clone()));
                key_condition.push_str(&format!(" AND begins_with({}, {})", sort, prefix));
            }
            None => {}
        }

        let output = self
            .client
            .query()
            .table_name(&self.table_name)
            .set_index_name(query.index.clone())
            .key_condition_expression(key_condition)
            .set_expression_attribute_names(expr.names())
            .set_expression_attribute_values(expr.values())
            .consistent_read(query.consistent)
            .scan_index_forward(query.forward)
            .set_limit(query.limit.map(|l| i32::try_from(l).unwrap_or(i32::MAX)))
            .set_exclusive_start_key(query.start_key.as_ref().map(to_dynamo_item))
            .send()
            .await
            .map_err(|e| classify("query", e, None))?;

        let items = output
            .items()
            .iter()
            .map(from_dynamo_item)
            .collect::<Result<Vec<_>>>()?;
        let last_key = output
            .last_evaluated_key()
            .map(from_dynamo_item)
            .transpose()?;

        Ok(QueryPage { items, last_key })
    }

    async fn transact_write(&self, operations: Vec<Operation>) -> Result<()> {
        let count = operations.len();
        let items = operations
            .into_iter()
            .map(|op| self.transact_item(op))
            .collect::<Result<Vec<_>>>()?;

        match self
            .client
            .transact_write_items()
            .set_transact_items(Some(items))
            .send()
            .await
        {
            Ok(_) => {
                debug!(operations = count, "Committed DynamoDB transaction");
                Ok(())
            }
            Err(e) => match e.as_service_error() {
                Some(TransactWriteItemsError::TransactionCanceledException(canceled)) => {
                    let reasons = canceled
                        .cancellation_reasons()
                        .iter()
                        .map(|r| r.code().filter(|c| *c != "None").map(str::to_string))
                        .collect();
                    Err(BackendError::TransactionCanceled { reasons })
                }
                _ => Err(classify("transact_write_items", e, None)),
            },
        }
    }
}

/// Placeholder names and values for one request's expressions.
#[derive(Default)]
struct Expression {
    names: HashMap<String, String>,
    values: HashMap<String, DynamoValue>,
}

impl Expression {
    fn name(&mut self, attribute: &str) -> String {
        if let Some((placeholder, _)) = self.names.iter().find(|(_, a)| *a == attribute) {
            return placeholder.clone();
        }
        let placeholder = format!("#a{}", self.names.len());
        self.names.insert(placeholder.clone(), attribute.to_string());
        placeholder
    }

    fn value(&mut self, value: AttributeValue) -> String {
        let placeholder = format!(":v{}", self.values.len());
        self.values.insert(placeholder.clone(), to_dynamo(&value));
        placeholder
    }

    fn condition(&mut self, condition: &Condition) -> String {
        match condition {
            Condition::Exists(attr) => format!("attribute_exists({})", self.name(attr)),
            Condition::NotExists(attr) => format!("attribute_not_exists({})", self.name(attr)),
            Condition::All(conditions) => {
                let parts: Vec<String> = conditions.iter().map(|c| self.condition(c)).collect();
                format!("({})", parts.join(" AND "))
            }
        }
    }

    fn update(&mut self, update: &Update) -> String {
        let assignments: Vec<String> = update
            .assignments()
            .iter()
            .map(|(name, value)| {
                let name = self.name(name);
                let value = self.value(value.clone());
                format!("{} = {}", name, value)
            })
            .collect();
        format!("SET {}", assignments.join(", "))
    }

    /// DynamoDB rejects empty placeholder maps, so these are `None` when unused.
    fn names(&self) -> Option<HashMap<String, String>> {
        (!self.names.is_empty()).then(|| self.names.clone())
    }

    fn values(&self) -> Option<HashMap<String, DynamoValue>> {
        (!self.values.is_empty()).then(|| self.values.clone())
    }
}

fn to_dynamo(value: &AttributeValue) -> DynamoValue {
    match value {
        AttributeValue::S(s) => DynamoValue::S(s.clone()),
        AttributeValue::N(n) => DynamoValue::N(n.to_string()),
        AttributeValue::B(b) => DynamoValue::B(Blob::new(b.clone())),
    }
}

fn from_dynamo(name: &str, value: &DynamoValue) -> Result<AttributeValue> {
    match value {
        DynamoValue::S(s) => Ok(AttributeValue::S(s.clone())),
        DynamoValue::N(n) => n
            .parse::<i64>()
            .map(AttributeValue::N)
            .map_err(|_| BackendError::Malformed(format!("{} is not an integer: {}", name, n))),
        DynamoValue::B(b) => Ok(AttributeValue::B(b.as_ref().to_vec())),
        other => Err(BackendError::Malformed(format!(
            "{} has unsupported type {:?}",
            name, other
        ))),
    }
}

fn to_dynamo_item(item: &Item) -> HashMap<String, DynamoValue> {
    item.iter()
        .map(|(name, value)| (name.clone(), to_dynamo(value)))
        .collect()
}

fn from_dynamo_item(item: &HashMap<String, DynamoValue>) -> Result<Item> {
    item.iter()
        .map(|(name, value)| Ok((name.clone(), from_dynamo(name, value)?)))
        .collect()
}

fn attribute(name: &str) -> Result<AttributeDefinition> {
    AttributeDefinition::builder()
        .attribute_name(name)
        .attribute_type(ScalarAttributeType::S)
        .build()
        .map_err(build_error)
}

fn key_element(name: &str, key_type: KeyType) -> Result<KeySchemaElement> {
    KeySchemaElement::builder()
        .attribute_name(name)
        .key_type(key_type)
        .build()
        .map_err(build_error)
}

fn build_error(e: aws_sdk_dynamodb::error::BuildError) -> BackendError {
    BackendError::Request(format!("invalid request: {}", e))
}

fn error_code<E, R>(err: &SdkError<E, R>) -> Option<&str>
where
    E: ProvideErrorMetadata,
{
    err.as_service_error().and_then(|e| e.code())
}

/// Map an SDK failure onto the backend taxonomy.
fn classify<E, R>(op: &str, err: SdkError<E, R>, key: Option<&Key>) -> BackendError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let code = error_code(&err).map(str::to_string);
    let message = format!("{} failed: {}", op, DisplayErrorContext(&err));
    match code.as_deref() {
        Some(CONDITIONAL_CHECK_FAILED_EXCEPTION) => BackendError::ConditionFailed {
            key: key.cloned(),
        },
        Some(c) if THROTTLING_CODES.contains(&c) => BackendError::Throttled(message),
        _ => match err {
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
                BackendError::Unavailable(message)
            }
            _ => BackendError::Request(message),
        },
    }
}
