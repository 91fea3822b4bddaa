//! Backend configuration types.

use serde::Deserialize;

/// Backend type discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    #[default]
    Memory,
    Dynamo,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendType::Memory => f.write_str("memory"),
            BackendType::Dynamo => f.write_str("dynamo"),
        }
    }
}

/// Backend configuration (discriminated union).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend type discriminator.
    #[serde(rename = "type")]
    pub backend_type: BackendType,
    /// In-memory backend configuration.
    pub memory: MemoryConfig,
    /// DynamoDB-specific configuration.
    pub dynamo: DynamoConfig,
}

/// In-memory backend configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Items per query page.
    pub page_size: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { page_size: 100 }
    }
}

/// DynamoDB-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DynamoConfig {
    /// Table name.
    pub table: String,
    /// Endpoint override, e.g. DynamoDB Local.
    pub endpoint_url: Option<String>,
    /// Create the table (and its ordering index) at startup if missing.
    pub create_table: bool,
    /// How long to wait for a created table to become ACTIVE.
    pub provision_timeout_secs: u64,
}

impl Default for DynamoConfig {
    fn default() -> Self {
        Self {
            table: "tidemark".to_string(),
            endpoint_url: None,
            create_table: false,
            provision_timeout_secs: 120,
        }
    }
}
