//! Token authorizer: bearer-token hashing, lookup, expiry, and scope checks.
//!
//! Hash is `Sha256`, hex-encoded for storage/lookup. Comparison against the
//! stored hash uses `subtle::ConstantTimeEq` since it guards a secret
//! value.

use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::llmgate::error::GatewayError;
use crate::llmgate::store::{ApiTokenRecord, Store};

/// Hash a bearer secret for storage/lookup. Hex-encoded SHA-256.
pub fn hash_token(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Authorizes incoming bearer tokens against the store and the statically
/// configured `gateway.auth_tokens`.
pub struct TokenAuthorizer {
    store: Arc<dyn Store>,
    /// Hashes of `config.gateway.auth_tokens`, counted toward the open-mode
    /// check and accepted as valid bearers alongside store-backed tokens.
    config_token_hashes: Vec<String>,
}

impl TokenAuthorizer {
    /// Build an authorizer over `store` with no statically configured
    /// tokens.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            config_token_hashes: Vec::new(),
        }
    }

    /// Build an authorizer over `store`, seeded with `config_tokens` (the
    /// raw secrets from `gateway.auth_tokens`). These hash into the same
    /// lookup space as store-issued tokens and count toward the
    /// no-tokens-anywhere open-mode check.
    pub fn with_config_tokens(store: Arc<dyn Store>, config_tokens: &[String]) -> Self {
        Self {
            store,
            config_token_hashes: config_tokens.iter().map(|t| hash_token(t)).collect(),
        }
    }

    /// Authorize a request for `provider_key` and `provider_key/model`
    /// given the raw bearer secret extracted from the `Authorization`
    /// header (without the `Bearer ` prefix).
    ///
    /// If no tokens exist anywhere — neither `gateway.auth_tokens` nor the
    /// store — the gateway runs in open mode and every request is accepted.
    pub async fn authorize(
        &self,
        bearer: Option<&str>,
        provider_key: &str,
        model: &str,
    ) -> Result<(), GatewayError> {
        let existing = self.store.list_api_tokens().await?;
        if existing.is_empty() && self.config_token_hashes.is_empty() {
            return Ok(());
        }

        let bearer = bearer.ok_or_else(|| GatewayError::Unauthenticated("missing bearer token".into()))?;
        let hash = hash_token(bearer);

        if self
            .config_token_hashes
            .iter()
            .any(|h| constant_time_eq(h, &hash))
        {
            return Ok(());
        }

        let record = self
            .store
            .find_api_token_by_hash(&hash)
            .await?
            .filter(|r| constant_time_eq(&r.token_hash, &hash))
            .ok_or_else(|| GatewayError::Unauthenticated("unknown bearer token".into()))?;

        self.check_expiry(&record)?;
        self.check_provider_scope(&record, provider_key)?;
        self.check_model_scope(&record, provider_key, model)?;

        let store = self.store.clone();
        let id = record.id.clone();
        tokio::spawn(async move {
            store.touch_api_token_last_used(&id, Utc::now()).await;
        });

        Ok(())
    }

    fn check_expiry(&self, record: &ApiTokenRecord) -> Result<(), GatewayError> {
        if let Some(expires_at) = record.expires_at {
            if expires_at < Utc::now() {
                return Err(GatewayError::Unauthenticated("token expired".into()));
            }
        }
        Ok(())
    }

    fn check_provider_scope(&self, record: &ApiTokenRecord, provider_key: &str) -> Result<(), GatewayError> {
        if let Some(allowed) = &record.allowed_providers {
            if !allowed.iter().any(|p| p == provider_key) {
                return Err(GatewayError::Forbidden(format!("token not scoped to provider '{provider_key}'")));
            }
        }
        Ok(())
    }

    fn check_model_scope(&self, record: &ApiTokenRecord, provider_key: &str, model: &str) -> Result<(), GatewayError> {
        if let Some(allowed) = &record.allowed_models {
            let full = format!("{provider_key}/{model}");
            if !allowed.iter().any(|m| m == &full) {
                return Err(GatewayError::Forbidden(format!("token not scoped to model '{full}'")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llmgate::store::memory::InMemoryStore;

    fn record(hash: &str) -> ApiTokenRecord {
        ApiTokenRecord {
            id: "tok1".into(),
            name: "test".into(),
            token_hash: hash.into(),
            token_prefix: "sk-ab".into(),
            allowed_providers: None,
            allowed_models: None,
            allowed_webhooks: None,
            expires_at: None,
            last_used_at: None,
        }
    }

    #[tokio::test]
    async fn open_mode_accepts_unauthenticated_requests_when_no_tokens_exist() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let authorizer = TokenAuthorizer::new(store);
        assert!(authorizer.authorize(None, "openai", "gpt-4o").await.is_ok());
    }

    #[tokio::test]
    async fn missing_bearer_rejected_once_tokens_exist() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        store.put_api_token(record(&hash_token("secret"))).await.unwrap();
        let authorizer = TokenAuthorizer::new(store);
        assert!(matches!(
            authorizer.authorize(None, "openai", "gpt-4o").await,
            Err(GatewayError::Unauthenticated(_))
        ));
    }

    #[tokio::test]
    async fn valid_bearer_is_accepted() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        store.put_api_token(record(&hash_token("secret"))).await.unwrap();
        let authorizer = TokenAuthorizer::new(store);
        assert!(authorizer.authorize(Some("secret"), "openai", "gpt-4o").await.is_ok());
    }

    #[tokio::test]
    async fn expired_token_rejected() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let mut rec = record(&hash_token("secret"));
        rec.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        store.put_api_token(rec).await.unwrap();
        let authorizer = TokenAuthorizer::new(store);
        assert!(matches!(
            authorizer.authorize(Some("secret"), "openai", "gpt-4o").await,
            Err(GatewayError::Unauthenticated(_))
        ));
    }

    #[tokio::test]
    async fn provider_scope_enforced() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let mut rec = record(&hash_token("secret"));
        rec.allowed_providers = Some(vec!["anthropic".into()]);
        store.put_api_token(rec).await.unwrap();
        let authorizer = TokenAuthorizer::new(store);
        assert!(matches!(
            authorizer.authorize(Some("secret"), "openai", "gpt-4o").await,
            Err(GatewayError::Forbidden(_))
        ));
        assert!(authorizer.authorize(Some("secret"), "anthropic", "claude-3").await.is_ok());
    }

    #[tokio::test]
    async fn config_token_counts_toward_open_mode_and_authorizes() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let authorizer = TokenAuthorizer::with_config_tokens(store, &["static-secret".to_string()]);

        // An empty store no longer means open mode once a config token exists.
        assert!(matches!(
            authorizer.authorize(None, "openai", "gpt-4o").await,
            Err(GatewayError::Unauthenticated(_))
        ));
        assert!(matches!(
            authorizer.authorize(Some("wrong"), "openai", "gpt-4o").await,
            Err(GatewayError::Unauthenticated(_))
        ));
        assert!(authorizer
            .authorize(Some("static-secret"), "openai", "gpt-4o")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn model_scope_enforced() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let mut rec = record(&hash_token("secret"));
        rec.allowed_models = Some(vec!["openai/gpt-4o".into()]);
        store.put_api_token(rec).await.unwrap();
        let authorizer = TokenAuthorizer::new(store);
        assert!(matches!(
            authorizer.authorize(Some("secret"), "openai", "gpt-3.5").await,
            Err(GatewayError::Forbidden(_))
        ));
        assert!(authorizer.authorize(Some("secret"), "openai", "gpt-4o").await.is_ok());
    }
}
