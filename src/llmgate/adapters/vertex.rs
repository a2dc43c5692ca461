//! Google Vertex AI adapter.
//!
//! `cloudllm` has no Vertex client at all. Vertex exposes an
//! OpenAI-compatible endpoint, so this delegates request building/response
//! parsing entirely to [`super::openai::OpenAiAdapter`] and supplies only
//! what differs: a `CloudDefault` token source scoped to
//! `https://www.googleapis.com/auth/cloud-platform`, fetched fresh on every
//! request rather than cached.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::openai::OpenAiAdapter;
use super::{Adapter, ChunkStream};
use crate::llmgate::config::ProviderConfig;
use crate::llmgate::error::GatewayError;
use crate::llmgate::model::{LLMResponse, Message, Tool};
use crate::llmgate::token_source::{
    CloudDefaultSource, GoogleServiceAccountSource, ServiceAccountKey, TokenSource, CLOUD_PLATFORM_SCOPE,
};

/// Vertex adapter: OpenAI-compatible wire, cloud-default auth.
///
/// `cfg.api_key` is expected to hold the service account key as JSON (the
/// conventional shape for a downloaded Google credentials file); if absent,
/// the adapter still constructs but every request will fail authentication
/// upstream, matching "cloud default credentials" falling through to
/// whatever ambient identity Google's SDKs would otherwise have found.
pub struct VertexAdapter {
    inner: OpenAiAdapter,
}

impl VertexAdapter {
    /// Build an adapter from a provider configuration.
    pub fn new(cfg: &ProviderConfig) -> Result<Self, GatewayError> {
        let token_source: Option<Arc<dyn TokenSource>> = match &cfg.api_key {
            Some(raw_key) => {
                let service_account: ServiceAccountKey = serde_json::from_str(raw_key)
                    .map_err(|e| GatewayError::InvalidRequest(format!("invalid vertex service account key: {e}")))?;
                let http = reqwest::Client::new();
                let credential_source = Arc::new(GoogleServiceAccountSource::new(service_account, http));
                Some(Arc::new(CloudDefaultSource::new(credential_source, CLOUD_PLATFORM_SCOPE)))
            }
            None => None,
        };
        let inner = OpenAiAdapter::with_token_source(cfg, token_source)?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl Adapter for VertexAdapter {
    async fn chat(&self, model: &str, messages: &[Message], tools: &[Tool]) -> Result<LLMResponse, GatewayError> {
        self.inner.chat(model, messages, tools).await
    }

    async fn chat_stream(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(ChunkStream, HashMap<String, String>), GatewayError> {
        self.inner.chat_stream(model, messages, tools).await
    }

    fn supports_streaming(&self) -> bool {
        self.inner.supports_streaming()
    }

    fn default_model(&self) -> &str {
        self.inner.default_model()
    }

    fn models(&self) -> &[String] {
        self.inner.models()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llmgate::config::ProviderKind;
    use std::collections::HashMap as StdHashMap;

    #[test]
    fn builds_without_a_configured_service_account() {
        let cfg = ProviderConfig {
            key: "vertex".into(),
            kind: ProviderKind::Vertex,
            api_key: None,
            base_url: Some("https://us-central1-aiplatform.googleapis.com/v1".into()),
            model: Some("gemini-pro".into()),
            models: vec![],
            extra_headers: StdHashMap::new(),
            auth_type: String::new(),
            proxy: None,
            insecure_skip_verify: false,
        };
        let adapter = VertexAdapter::new(&cfg).unwrap();
        assert_eq!(adapter.default_model(), "gemini-pro");
    }

    #[test]
    fn rejects_malformed_service_account_json() {
        let cfg = ProviderConfig {
            key: "vertex".into(),
            kind: ProviderKind::Vertex,
            api_key: Some("not json".into()),
            base_url: None,
            model: None,
            models: vec![],
            extra_headers: StdHashMap::new(),
            auth_type: String::new(),
            proxy: None,
            insecure_skip_verify: false,
        };
        assert!(VertexAdapter::new(&cfg).is_err());
    }
}
