//! Credential store façade.
//!
//! Defines the [`Store`] trait the gateway core consumes, plus the two
//! concrete backends: [`memory::InMemoryStore`] (never encrypts, backs
//! tests) and [`sql::SqlStore`] (sqlite/postgres via `sqlx`'s `Any` driver).
//!
//! The core only interprets `providers` and `api_tokens`; the remaining
//! tables (`workflows`, `triggers`, `skills`, `variables`, `node_configs`)
//! belong to the out-of-scope DAG engine and are stored/returned as opaque
//! JSON blobs.

pub mod memory;
pub mod sql;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llmgate::config::ProviderConfig;
use crate::llmgate::error::GatewayError;

/// A persisted provider configuration, with store-level bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRecord {
    /// Unique key (duplicated from `config.key` for lookup convenience).
    pub key: String,
    /// The provider's configuration. Secrets are stored encrypted and
    /// decrypted on read when the store has an active encryption key.
    pub config: ProviderConfig,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// A persisted API token record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiTokenRecord {
    /// ULID identity.
    pub id: String,
    /// Human-readable label.
    pub name: String,
    /// Hash of the bearer secret, used for lookup; never the secret itself.
    pub token_hash: String,
    /// Short prefix of the secret shown in listings (e.g. `"sk-ab12"`).
    pub token_prefix: String,
    /// Allowed provider keys. `None` means unrestricted.
    pub allowed_providers: Option<Vec<String>>,
    /// Allowed `provider_key/model` strings. `None` means unrestricted.
    pub allowed_models: Option<Vec<String>>,
    /// Allowed webhook identifiers. `None` means unrestricted.
    pub allowed_webhooks: Option<Vec<String>>,
    /// Optional expiry.
    pub expires_at: Option<DateTime<Utc>>,
    /// Updated best-effort on every successful authorization.
    pub last_used_at: Option<DateTime<Utc>>,
}

/// An opaque, JSON-blob-backed record from one of the five tables the
/// gateway core does not interpret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpaqueRecord {
    /// Record identity (table-specific convention, usually a ULID).
    pub id: String,
    /// Arbitrary JSON payload, owned entirely by the out-of-scope consumer.
    pub data: serde_json::Value,
}

/// The five tables the gateway core stores but never interprets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpaqueTable {
    /// DAG workflow definitions.
    Workflows,
    /// Workflow triggers.
    Triggers,
    /// Reusable skill definitions.
    Skills,
    /// Named variables.
    Variables,
    /// Per-node configuration blobs.
    NodeConfigs,
}

impl OpaqueTable {
    /// Stable name used as the backing table/collection identifier.
    pub fn name(&self) -> &'static str {
        match self {
            OpaqueTable::Workflows => "workflows",
            OpaqueTable::Triggers => "triggers",
            OpaqueTable::Skills => "skills",
            OpaqueTable::Variables => "variables",
            OpaqueTable::NodeConfigs => "node_configs",
        }
    }
}

/// Storage façade the gateway core consumes. CRUD over
/// providers/api_tokens plus the five opaque tables, and the two
/// encryption-key operations.
#[async_trait]
pub trait Store: Send + Sync {
    /// List all provider records, decrypted.
    async fn list_providers(&self) -> Result<Vec<ProviderRecord>, GatewayError>;
    /// Fetch one provider by key. Not-found returns `Ok(None)`.
    async fn get_provider(&self, key: &str) -> Result<Option<ProviderRecord>, GatewayError>;
    /// Create or replace a provider record, encrypting its sensitive fields
    /// under the store's current key (if any).
    async fn put_provider(&self, record: ProviderRecord) -> Result<(), GatewayError>;
    /// Delete a provider record. Not-found is not an error.
    async fn delete_provider(&self, key: &str) -> Result<(), GatewayError>;

    /// List all API token records.
    async fn list_api_tokens(&self) -> Result<Vec<ApiTokenRecord>, GatewayError>;
    /// Fetch one token record by id. Not-found returns `Ok(None)`.
    async fn get_api_token(&self, id: &str) -> Result<Option<ApiTokenRecord>, GatewayError>;
    /// Fetch one token record by its stable hash. Not-found returns `Ok(None)`.
    async fn find_api_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<ApiTokenRecord>, GatewayError>;
    /// Create or replace a token record.
    async fn put_api_token(&self, record: ApiTokenRecord) -> Result<(), GatewayError>;
    /// Delete a token record. Not-found is not an error.
    async fn delete_api_token(&self, id: &str) -> Result<(), GatewayError>;
    /// Best-effort update of `last_used_at`. Failure must not propagate to
    /// the caller of the authorization path.
    async fn touch_api_token_last_used(&self, id: &str, at: DateTime<Utc>);

    /// List every opaque record in `table`.
    async fn list_opaque(&self, table: OpaqueTable) -> Result<Vec<OpaqueRecord>, GatewayError>;
    /// Fetch one opaque record by id.
    async fn get_opaque(
        &self,
        table: OpaqueTable,
        id: &str,
    ) -> Result<Option<OpaqueRecord>, GatewayError>;
    /// Create or replace an opaque record.
    async fn put_opaque(&self, table: OpaqueTable, record: OpaqueRecord)
        -> Result<(), GatewayError>;
    /// Delete an opaque record. Not-found is not an error.
    async fn delete_opaque(&self, table: OpaqueTable, id: &str) -> Result<(), GatewayError>;

    /// Re-encrypt every provider row under `new_key` (`None` disables
    /// encryption, storing plaintext) inside one transaction. On any
    /// failure the transaction rolls back and the in-memory key is
    /// unchanged.
    async fn rotate_encryption_key(&self, new_key: Option<String>) -> Result<(), GatewayError>;
    /// In-memory-only key swap, used by cluster peers after a remote
    /// rotation's broadcast.
    async fn set_encryption_key(&self, new_key: Option<String>);
}
