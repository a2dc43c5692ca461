//! Provider adapters: translators between the canonical message model and
//! each upstream's native wire format.
//!
//! Generalizes `cloudllm`'s `client_wrapper::ClientWrapper` trait (`async
//! fn send_message`) into [`Adapter`], with streaming promoted from an
//! afterthought (`send_message_stream` defaulted to `Ok(None)`) to a
//! first-class, explicitly-queried capability: `supports_streaming()`
//! replaces a type-switch/downcast.

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod sanitize;
pub mod translate;
pub mod vertex;

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::llmgate::config::ProviderConfig;
use crate::llmgate::error::GatewayError;
use crate::llmgate::model::{LLMResponse, Message, StreamChunk, Tool};

/// A producer-closed sequence of [`StreamChunk`]s.
pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// Per-provider translator, constructed once by the [`crate::llmgate::registry::ProviderRegistry`]
/// and shared across every request that resolves to its provider key.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Send one non-streaming chat request. `model == ""` must be treated as
    /// "use the adapter's default model".
    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<LLMResponse, GatewayError>;

    /// Open a streaming chat request. Only called when [`Self::supports_streaming`]
    /// returns `true`; the default implementation is never invoked in that
    /// case, so it is fine for non-streaming adapters to leave it unimplemented.
    async fn chat_stream(
        &self,
        _model: &str,
        _messages: &[Message],
        _tools: &[Tool],
    ) -> Result<(ChunkStream, HashMap<String, String>), GatewayError> {
        Err(GatewayError::Internal(
            "adapter does not implement chat_stream".into(),
        ))
    }

    /// Whether [`Self::chat_stream`] is implemented for this adapter
    /// instance. The dispatcher (`server.rs`) queries this explicitly
    /// instead of attempting a trait-object downcast.
    fn supports_streaming(&self) -> bool;

    /// The model substituted when the caller passes an empty model string.
    fn default_model(&self) -> &str;

    /// The advertised model set, used by `/v1/models` and strict-model-set
    /// enforcement. Empty means unrestricted.
    fn models(&self) -> &[String];
}

/// Construct the adapter for `cfg`, dispatching on [`ProviderConfig::kind`].
/// Used by the registry's bootstrap/reload paths.
pub fn build_adapter(cfg: &ProviderConfig) -> Result<Box<dyn Adapter>, GatewayError> {
    use crate::llmgate::config::ProviderKind;
    match cfg.kind {
        ProviderKind::Openai => Ok(Box::new(openai::OpenAiAdapter::new(cfg)?)),
        ProviderKind::Anthropic => Ok(Box::new(anthropic::AnthropicAdapter::new(cfg)?)),
        ProviderKind::Vertex => Ok(Box::new(vertex::VertexAdapter::new(cfg)?)),
        ProviderKind::Gemini => Ok(Box::new(gemini::GeminiAdapter::new(cfg)?)),
    }
}
