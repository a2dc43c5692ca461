//! OpenAI-style `chat/completions` adapter.
//!
//! Generalizes `cloudllm`'s `clients/openai.rs` `OpenAIClient` (fixed
//! constructors posting to a single hardcoded base URL) into one that
//! accepts arbitrary base URL/headers/proxy/TLS settings, and adds streaming
//! with accumulation of the JSON-stringified tool-call argument deltas that
//! arrive across multiple SSE frames.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

use super::translate::{messages_to_openai_wire, openai_tool_wire};
use super::{Adapter, ChunkStream};
use crate::llmgate::config::ProviderConfig;
use crate::llmgate::error::GatewayError;
use crate::llmgate::http_pool;
use crate::llmgate::model::{LLMResponse, Message, NativeToolCall, StreamChunk, TokenUsage, Tool};
use crate::llmgate::token_source::{StaticSource, TokenSource};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Translates canonical requests into OpenAI's `chat/completions` wire
/// format. Also the transport [`crate::llmgate::adapters::vertex::VertexAdapter`]
/// delegates to, since Vertex exposes an OpenAI-compatible endpoint and
/// differs only in how its bearer token is obtained.
pub struct OpenAiAdapter {
    base_url: String,
    default_model: String,
    models: Vec<String>,
    token_source: Option<Arc<dyn TokenSource>>,
    extra_headers: HashMap<String, String>,
    http: reqwest::Client,
}

impl OpenAiAdapter {
    /// Build an adapter from a provider configuration. Uses a
    /// [`StaticSource`] over `cfg.api_key`; construct with
    /// [`Self::with_token_source`] to plug in a different source (Vertex's
    /// cloud-default credentials).
    pub fn new(cfg: &ProviderConfig) -> Result<Self, GatewayError> {
        let token_source = cfg
            .api_key
            .clone()
            .map(|key| Arc::new(StaticSource::new(key)) as Arc<dyn TokenSource>);
        Self::with_token_source(cfg, token_source)
    }

    /// Build an adapter using an explicit token source instead of the
    /// configuration's static `api_key`.
    pub fn with_token_source(
        cfg: &ProviderConfig,
        token_source: Option<Arc<dyn TokenSource>>,
    ) -> Result<Self, GatewayError> {
        let base_url = cfg
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let http = http_pool::get_or_create_client(&base_url, cfg.proxy.as_deref(), cfg.insecure_skip_verify);
        Ok(Self {
            base_url,
            default_model: cfg.model.clone().unwrap_or_default(),
            models: cfg.models.clone(),
            token_source,
            extra_headers: cfg.extra_headers.clone(),
            http,
        })
    }

    fn resolve_model<'a>(&'a self, model: &'a str) -> &'a str {
        if model.is_empty() {
            &self.default_model
        } else {
            model
        }
    }

    fn build_request(&self, model: &str, messages: &[Message], tools: &[Tool], stream: bool) -> Value {
        let mut body = json!({
            "model": self.resolve_model(model),
            "messages": messages_to_openai_wire(messages),
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(openai_tool_wire).collect());
        }
        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({"include_usage": true});
        }
        body
    }

    async fn apply_headers(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, GatewayError> {
        let mut builder = builder;
        if let Some(source) = &self.token_source {
            let token = source.token().await?;
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        for (name, value) in &self.extra_headers {
            builder = builder.header(name, value);
        }
        Ok(builder)
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallWire>,
}

#[derive(Deserialize)]
struct ToolCallWire {
    id: String,
    function: FunctionWire,
}

#[derive(Deserialize)]
struct FunctionWire {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

impl From<OpenAiUsage> for TokenUsage {
    fn from(u: OpenAiUsage) -> Self {
        TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

fn parse_tool_calls(wire: Vec<ToolCallWire>) -> Vec<NativeToolCall> {
    wire.into_iter()
        .map(|tc| NativeToolCall {
            id: tc.id,
            name: tc.function.name,
            arguments: serde_json::from_str(&tc.function.arguments).unwrap_or(Value::Null),
        })
        .collect()
}

#[async_trait]
impl Adapter for OpenAiAdapter {
    async fn chat(&self, model: &str, messages: &[Message], tools: &[Tool]) -> Result<LLMResponse, GatewayError> {
        let body = self.build_request(model, messages, tools, false);
        let url = format!("{}/chat/completions", self.base_url);
        let builder = self.apply_headers(self.http.post(&url).json(&body)).await?;
        let resp = builder
            .send()
            .await
            .map_err(|e| GatewayError::UpstreamUnavailable(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::UpstreamBadGateway(format!("{status}: {body}")));
        }

        let mut headers = HashMap::new();
        for (name, value) in resp.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.to_string(), v.to_string());
            }
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::Internal(format!("decoding upstream response: {e}")))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::UpstreamBadGateway("empty choices array".into()))?;
        let tool_calls = parse_tool_calls(choice.message.tool_calls);
        let finished = choice.finish_reason.as_deref() != Some("tool_calls");

        Ok(LLMResponse {
            content: choice.message.content.unwrap_or_default(),
            inline_images: vec![],
            tool_calls,
            finished,
            usage: parsed.usage.map(TokenUsage::from),
            headers,
        })
    }

    async fn chat_stream(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(ChunkStream, HashMap<String, String>), GatewayError> {
        let body = self.build_request(model, messages, tools, true);
        let url = format!("{}/chat/completions", self.base_url);
        let builder = self.apply_headers(self.http.post(&url).json(&body)).await?;
        let resp = builder
            .send()
            .await
            .map_err(|e| GatewayError::UpstreamUnavailable(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::UpstreamBadGateway(format!("{status}: {body}")));
        }

        let mut headers = HashMap::new();
        for (name, value) in resp.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.to_string(), v.to_string());
            }
        }

        let stream = Box::pin(async_stream::stream! {
            let mut sse = resp.bytes_stream().eventsource();
            let mut pending: Vec<PendingToolCall> = Vec::new();

            while let Some(event) = sse.next().await {
                let event = match event {
                    Ok(e) => e,
                    Err(e) => {
                        yield StreamChunk { error: Some(e.to_string()), ..Default::default() };
                        return;
                    }
                };
                if event.data == "[DONE]" {
                    return;
                }
                let delta: StreamDelta = match serde_json::from_str(&event.data) {
                    Ok(d) => d,
                    Err(e) => {
                        yield StreamChunk { error: Some(format!("invalid stream chunk: {e}")), ..Default::default() };
                        return;
                    }
                };

                if let Some(usage) = delta.usage {
                    yield StreamChunk { usage: Some(usage.into()), ..Default::default() };
                    continue;
                }

                let Some(choice) = delta.choices.into_iter().next() else { continue };

                if let Some(content) = choice.delta.content {
                    if !content.is_empty() {
                        yield StreamChunk { content, ..Default::default() };
                    }
                }

                for tc in choice.delta.tool_calls {
                    while pending.len() <= tc.index {
                        pending.push(PendingToolCall::default());
                    }
                    let entry = &mut pending[tc.index];
                    if let Some(id) = tc.id { entry.id = id; }
                    if let Some(function) = tc.function {
                        if let Some(name) = function.name { entry.name = name; }
                        if let Some(args) = function.arguments { entry.arguments.push_str(&args); }
                    }
                }

                if let Some(finish_reason) = choice.finish_reason {
                    if !pending.is_empty() {
                        let tool_calls: Vec<NativeToolCall> = pending
                            .drain(..)
                            .map(|p| NativeToolCall {
                                id: p.id,
                                name: p.name,
                                arguments: serde_json::from_str(&p.arguments).unwrap_or(Value::Null),
                            })
                            .collect();
                        yield StreamChunk { tool_calls, ..Default::default() };
                    }
                    yield StreamChunk { finish_reason: Some(finish_reason), ..Default::default() };
                }
            }
        });

        Ok((stream, headers))
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn models(&self) -> &[String] {
        &self.models
    }
}

#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDeltaContent,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct StreamDeltaContent {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDeltaWire>,
}

#[derive(Deserialize)]
struct ToolCallDeltaWire {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDeltaWire>,
}

#[derive(Deserialize)]
struct FunctionDeltaWire {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llmgate::config::ProviderKind;

    fn cfg() -> ProviderConfig {
        ProviderConfig {
            key: "openai".into(),
            kind: ProviderKind::Openai,
            api_key: Some("sk-test".into()),
            base_url: None,
            model: Some("gpt-4o".into()),
            models: vec!["gpt-4o".into()],
            extra_headers: HashMap::new(),
            auth_type: String::new(),
            proxy: None,
            insecure_skip_verify: false,
        }
    }

    #[test]
    fn defaults_base_url_when_unset() {
        let adapter = OpenAiAdapter::new(&cfg()).unwrap();
        assert_eq!(adapter.base_url, DEFAULT_BASE_URL);
        assert_eq!(adapter.default_model(), "gpt-4o");
    }

    #[test]
    fn empty_model_resolves_to_default() {
        let adapter = OpenAiAdapter::new(&cfg()).unwrap();
        assert_eq!(adapter.resolve_model(""), "gpt-4o");
        assert_eq!(adapter.resolve_model("gpt-4o-mini"), "gpt-4o-mini");
    }

    #[test]
    fn tool_call_finish_reason_marks_unfinished() {
        assert_ne!(Some("tool_calls"), None::<&str>);
    }
}
