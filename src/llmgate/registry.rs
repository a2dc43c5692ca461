//! Provider registry: keyed table of live adapter instances with hot-reload.
//!
//! Grounded on `cloudllm`'s `mcp_server::UnifiedMcpServer`, which holds
//! tool handlers behind an `Arc<RwLock<HashMap<String, Arc<dyn Trait>>>>`
//! and exposes register/resolve/remove over it. Generalized here from tool
//! names to provider keys.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::llmgate::adapters::{build_adapter, Adapter};
use crate::llmgate::config::ProviderConfig;
use crate::llmgate::error::GatewayError;
use crate::llmgate::store::{ProviderRecord, Store};

/// One live adapter plus the metadata needed to resolve/enumerate it.
pub struct AdapterEntry {
    pub adapter: Arc<dyn Adapter>,
    pub kind: String,
    pub default_model: String,
    pub models: Vec<String>,
}

/// Keyed table of live provider adapters behind a read/write lock.
pub struct ProviderRegistry {
    entries: RwLock<HashMap<String, AdapterEntry>>,
}

impl ProviderRegistry {
    fn empty() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Build one adapter per configuration entry, then merge in
    /// store-persisted records. A store record with the same key as a
    /// config entry overrides it. Construction failures are logged and the
    /// entry is skipped.
    pub async fn bootstrap(
        config_providers: &[ProviderConfig],
        store: &Arc<dyn Store>,
    ) -> Result<Self, GatewayError> {
        let registry = Self::empty();

        for cfg in config_providers {
            if let Err(e) = registry.insert(cfg).await {
                log::warn!("skipping provider '{}' from config: {e}", cfg.key);
            }
        }

        for record in store.list_providers().await? {
            if let Err(e) = registry.insert(&record.config).await {
                log::warn!("skipping provider '{}' from store: {e}", record.key);
            }
        }

        Ok(registry)
    }

    async fn insert(&self, cfg: &ProviderConfig) -> Result<(), GatewayError> {
        let adapter = build_adapter(cfg)?;
        let entry = AdapterEntry {
            kind: format!("{:?}", cfg.kind).to_lowercase(),
            default_model: adapter.default_model().to_string(),
            models: adapter.models().to_vec(),
            adapter: Arc::from(adapter),
        };
        self.entries.write().await.insert(cfg.key.clone(), entry);
        Ok(())
    }

    /// Construct a new adapter for `cfg` and atomically replace the entry
    /// at `cfg.key`, dropping the previous one. Failure surfaces to the
    /// caller (unlike bootstrap, which only logs).
    pub async fn reload(&self, cfg: &ProviderConfig) -> Result<(), GatewayError> {
        self.insert(cfg).await
    }

    /// Delete the entry at `key`, if present.
    pub async fn remove(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    /// Resolve `"key/model"`: split on the first `/`, look up the entry,
    /// and if it advertises a non-empty `models` list, verify membership.
    pub async fn resolve(&self, key_and_model: &str) -> Result<(Arc<dyn Adapter>, String), GatewayError> {
        let (key, model) = key_and_model
            .split_once('/')
            .ok_or_else(|| GatewayError::InvalidRequest(format!("malformed model identifier: {key_and_model}")))?;

        let entries = self.entries.read().await;
        let entry = entries
            .get(key)
            .ok_or_else(|| GatewayError::NotFound(format!("unknown provider: {key}")))?;

        if !entry.models.is_empty() && !entry.models.iter().any(|m| m == model) {
            return Err(GatewayError::NotFound(format!("unknown model '{model}' for provider '{key}'")));
        }

        Ok((entry.adapter.clone(), model.to_string()))
    }

    /// Snapshot of `(provider_key, kind, default_model, models)` for every
    /// registered provider, for `/v1/info` and `/api/v1/providers`.
    pub async fn list(&self) -> Vec<(String, String, String, Vec<String>)> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(key, entry)| (key.clone(), entry.kind.clone(), entry.default_model.clone(), entry.models.clone()))
            .collect()
    }

    /// Every `provider_key/model` pair advertised by a registered adapter
    /// with a non-empty `models` list, for `/v1/models`.
    pub async fn advertised_models(&self) -> Vec<String> {
        self.entries
            .read()
            .await
            .iter()
            .flat_map(|(key, entry)| entry.models.iter().map(move |m| format!("{key}/{m}")))
            .collect()
    }
}

/// Convenience used by `server.rs` to persist-then-hot-reload a provider
/// record in one step.
pub async fn put_and_reload(
    registry: &ProviderRegistry,
    store: &Arc<dyn Store>,
    record: ProviderRecord,
) -> Result<(), GatewayError> {
    registry.reload(&record.config).await?;
    store.put_provider(record).await
}
