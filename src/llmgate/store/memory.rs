//! In-process store backend.
//!
//! Grounded in `cloudllm`'s `mcp_server::UnifiedMcpServer`: a
//! `RwLock<HashMap<...>>` guarding all state, reads under a read lock and
//! writes under a write lock, with no separate connection/transaction
//! machinery. Never encrypts; it exists for tests and for ephemeral
//! single-process deployments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{ApiTokenRecord, OpaqueRecord, OpaqueTable, ProviderRecord, Store};
use crate::llmgate::error::GatewayError;

#[derive(Default)]
struct State {
    providers: HashMap<String, ProviderRecord>,
    api_tokens: HashMap<String, ApiTokenRecord>,
    opaque: HashMap<&'static str, HashMap<String, OpaqueRecord>>,
}

/// An in-memory [`Store`] implementation. Cheap to clone (shares state via
/// `Arc`).
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    /// Construct an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn list_providers(&self) -> Result<Vec<ProviderRecord>, GatewayError> {
        let state = self.state.read().await;
        Ok(state.providers.values().cloned().collect())
    }

    async fn get_provider(&self, key: &str) -> Result<Option<ProviderRecord>, GatewayError> {
        let state = self.state.read().await;
        Ok(state.providers.get(key).cloned())
    }

    async fn put_provider(&self, record: ProviderRecord) -> Result<(), GatewayError> {
        let mut state = self.state.write().await;
        state.providers.insert(record.key.clone(), record);
        Ok(())
    }

    async fn delete_provider(&self, key: &str) -> Result<(), GatewayError> {
        let mut state = self.state.write().await;
        state.providers.remove(key);
        Ok(())
    }

    async fn list_api_tokens(&self) -> Result<Vec<ApiTokenRecord>, GatewayError> {
        let state = self.state.read().await;
        Ok(state.api_tokens.values().cloned().collect())
    }

    async fn get_api_token(&self, id: &str) -> Result<Option<ApiTokenRecord>, GatewayError> {
        let state = self.state.read().await;
        Ok(state.api_tokens.get(id).cloned())
    }

    async fn find_api_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<ApiTokenRecord>, GatewayError> {
        let state = self.state.read().await;
        Ok(state
            .api_tokens
            .values()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn put_api_token(&self, record: ApiTokenRecord) -> Result<(), GatewayError> {
        let mut state = self.state.write().await;
        state.api_tokens.insert(record.id.clone(), record);
        Ok(())
    }

    async fn delete_api_token(&self, id: &str) -> Result<(), GatewayError> {
        let mut state = self.state.write().await;
        state.api_tokens.remove(id);
        Ok(())
    }

    async fn touch_api_token_last_used(&self, id: &str, at: DateTime<Utc>) {
        let mut state = self.state.write().await;
        if let Some(token) = state.api_tokens.get_mut(id) {
            token.last_used_at = Some(at);
        }
    }

    async fn list_opaque(&self, table: OpaqueTable) -> Result<Vec<OpaqueRecord>, GatewayError> {
        let state = self.state.read().await;
        Ok(state
            .opaque
            .get(table.name())
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_opaque(
        &self,
        table: OpaqueTable,
        id: &str,
    ) -> Result<Option<OpaqueRecord>, GatewayError> {
        let state = self.state.read().await;
        Ok(state.opaque.get(table.name()).and_then(|m| m.get(id)).cloned())
    }

    async fn put_opaque(
        &self,
        table: OpaqueTable,
        record: OpaqueRecord,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.write().await;
        state
            .opaque
            .entry(table.name())
            .or_default()
            .insert(record.id.clone(), record);
        Ok(())
    }

    async fn delete_opaque(&self, table: OpaqueTable, id: &str) -> Result<(), GatewayError> {
        let mut state = self.state.write().await;
        if let Some(m) = state.opaque.get_mut(table.name()) {
            m.remove(id);
        }
        Ok(())
    }

    async fn rotate_encryption_key(&self, _new_key: Option<String>) -> Result<(), GatewayError> {
        // Nothing is ever encrypted in this backend; rotation is a no-op.
        Ok(())
    }

    async fn set_encryption_key(&self, _new_key: Option<String>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llmgate::config::{ProviderConfig, ProviderKind};

    fn sample_provider(key: &str) -> ProviderRecord {
        let now = chrono::DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        ProviderRecord {
            key: key.to_string(),
            config: ProviderConfig {
                key: key.to_string(),
                kind: ProviderKind::Openai,
                api_key: Some("sk-test".into()),
                base_url: None,
                model: None,
                models: vec![],
                extra_headers: HashMap::new(),
                auth_type: String::new(),
                proxy: None,
                insecure_skip_verify: false,
            },
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = InMemoryStore::new();
        store.put_provider(sample_provider("p1")).await.unwrap();
        let got = store.get_provider("p1").await.unwrap();
        assert!(got.is_some());
        assert_eq!(got.unwrap().key, "p1");
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let store = InMemoryStore::new();
        assert!(store.get_provider("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let store = InMemoryStore::new();
        store.put_provider(sample_provider("p1")).await.unwrap();
        store.delete_provider("p1").await.unwrap();
        assert!(store.get_provider("p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn opaque_tables_are_isolated_by_name() {
        let store = InMemoryStore::new();
        store
            .put_opaque(
                OpaqueTable::Workflows,
                OpaqueRecord {
                    id: "w1".into(),
                    data: serde_json::json!({"nodes": []}),
                },
            )
            .await
            .unwrap();
        assert!(store
            .get_opaque(OpaqueTable::Triggers, "w1")
            .await
            .unwrap()
            .is_none());
        assert!(store
            .get_opaque(OpaqueTable::Workflows, "w1")
            .await
            .unwrap()
            .is_some());
    }
}
