//! Native Anthropic Messages API adapter.
//!
//! `cloudllm`'s `clients/claude.rs` merely delegates to the OpenAI-style
//! client against Anthropic's OpenAI-compatible shim, which cannot express
//! `system` hoisting, the `X-Api-Key`/`Anthropic-Version` headers, or the
//! native event-typed SSE stream (`message_start`/`content_block_*`/
//! `message_delta`/`message_stop`). This is a ground-up rewrite of the
//! transport; only the adapter-struct/`Model`-enum *pattern* from
//! `claude.rs` survives.

use std::collections::HashMap;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde_json::{json, Value};

use super::{Adapter, ChunkStream};
use crate::llmgate::config::ProviderConfig;
use crate::llmgate::error::GatewayError;
use crate::llmgate::http_pool;
use crate::llmgate::model::{
    Content, ContentBlock, LLMResponse, Message, NativeToolCall, Role, StreamChunk, TokenUsage, Tool,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Native Anthropic Messages API transport.
pub struct AnthropicAdapter {
    base_url: String,
    default_model: String,
    models: Vec<String>,
    api_key: Option<String>,
    extra_headers: HashMap<String, String>,
    http: reqwest::Client,
}

impl AnthropicAdapter {
    /// Build an adapter from a provider configuration.
    pub fn new(cfg: &ProviderConfig) -> Result<Self, GatewayError> {
        let base_url = cfg
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let http = http_pool::get_or_create_client(&base_url, cfg.proxy.as_deref(), cfg.insecure_skip_verify);
        Ok(Self {
            base_url,
            default_model: cfg.model.clone().unwrap_or_default(),
            models: cfg.models.clone(),
            api_key: cfg.api_key.clone(),
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

    fn apply_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut builder = builder.header("Anthropic-Version", ANTHROPIC_VERSION);
        if let Some(key) = &self.api_key {
            builder = builder.header("X-Api-Key", key);
        }
        for (name, value) in &self.extra_headers {
            builder = builder.header(name, value);
        }
        builder
    }

    fn build_request(&self, model: &str, messages: &[Message], tools: &[Tool], stream: bool) -> Value {
        let system = messages
            .iter()
            .filter(|m| matches!(m.role, Role::System))
            .map(|m| m.content.as_text())
            .collect::<Vec<_>>()
            .join("\n");

        let wire_messages: Vec<Value> = messages
            .iter()
            .filter(|m| !matches!(m.role, Role::System))
            .map(message_to_anthropic_wire)
            .collect();

        let mut body = json!({
            "model": self.resolve_model(model),
            "max_tokens": DEFAULT_MAX_TOKENS,
            "messages": wire_messages,
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }
        if !tools.is_empty() {
            body["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|t| json!({"name": t.name, "description": t.description, "input_schema": t.input_schema}))
                    .collect(),
            );
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }
}

fn content_block_to_anthropic(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => json!({"type": "text", "text": text}),
        ContentBlock::Image { source, url } => {
            if let Some(source) = source {
                json!({
                    "type": "image",
                    "source": {"type": "base64", "media_type": source.media_type, "data": source.data},
                })
            } else {
                json!({"type": "image", "source": {"type": "url", "url": url}})
            }
        }
        ContentBlock::ToolUse { id, name, input, .. } => {
            json!({"type": "tool_use", "id": id, "name": name, "input": input})
        }
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => json!({
            "type": "tool_result",
            "tool_use_id": tool_use_id,
            "content": content,
            "is_error": is_error,
        }),
    }
}

fn message_to_anthropic_wire(message: &Message) -> Value {
    let role = match message.role {
        Role::Assistant => "assistant",
        Role::Tool { .. } | Role::User => "user",
        Role::System => unreachable!("system messages are filtered before this call"),
    };

    let mut blocks: Vec<Value> = match &message.content {
        Content::Blocks(blocks) => blocks.iter().map(content_block_to_anthropic).collect(),
        Content::Text(text) if !text.is_empty() => vec![json!({"type": "text", "text": text})],
        Content::Text(_) => vec![],
        Content::Raw(v) => vec![v.clone()],
    };

    if let Role::Tool { call_id } = &message.role {
        blocks = vec![json!({
            "type": "tool_result",
            "tool_use_id": call_id,
            "content": message.content.as_text(),
        })];
    }

    for tool_call in &message.tool_calls {
        blocks.push(json!({
            "type": "tool_use",
            "id": tool_call.id,
            "name": tool_call.name,
            "input": tool_call.arguments,
        }));
    }

    json!({"role": role, "content": blocks})
}

#[async_trait]
impl Adapter for AnthropicAdapter {
    async fn chat(&self, model: &str, messages: &[Message], tools: &[Tool]) -> Result<LLMResponse, GatewayError> {
        let body = self.build_request(model, messages, tools, false);
        let url = format!("{}/messages", self.base_url);
        let resp = self
            .apply_headers(self.http.post(&url).json(&body))
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

        let parsed: Value = resp
            .json()
            .await
            .map_err(|e| GatewayError::Internal(format!("decoding upstream response: {e}")))?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in parsed["content"].as_array().cloned().unwrap_or_default() {
            match block["type"].as_str() {
                Some("text") => content.push_str(block["text"].as_str().unwrap_or_default()),
                Some("tool_use") => tool_calls.push(NativeToolCall {
                    id: block["id"].as_str().unwrap_or_default().to_string(),
                    name: block["name"].as_str().unwrap_or_default().to_string(),
                    arguments: block["input"].clone(),
                }),
                _ => {}
            }
        }

        let stop_reason = parsed["stop_reason"].as_str();
        let finished = stop_reason != Some("tool_use");
        let usage = parsed.get("usage").map(|u| TokenUsage {
            input_tokens: u["input_tokens"].as_u64().unwrap_or(0) as usize,
            output_tokens: u["output_tokens"].as_u64().unwrap_or(0) as usize,
            total_tokens: (u["input_tokens"].as_u64().unwrap_or(0) + u["output_tokens"].as_u64().unwrap_or(0)) as usize,
        });

        Ok(LLMResponse {
            content,
            inline_images: vec![],
            tool_calls,
            finished,
            usage,
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
        let url = format!("{}/messages", self.base_url);
        let resp = self
            .apply_headers(self.http.post(&url).json(&body))
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
            let mut input_tokens = 0usize;
            let mut output_tokens = 0usize;
            let mut tool_in_flight: Option<(String, String, String)> = None;

            while let Some(event) = sse.next().await {
                let event = match event {
                    Ok(e) => e,
                    Err(e) => {
                        yield StreamChunk { error: Some(e.to_string()), ..Default::default() };
                        return;
                    }
                };
                let data: Value = match serde_json::from_str(&event.data) {
                    Ok(d) => d,
                    Err(e) => {
                        yield StreamChunk { error: Some(format!("invalid stream frame: {e}")), ..Default::default() };
                        return;
                    }
                };

                match event.event.as_str() {
                    "message_start" => {
                        input_tokens = data["message"]["usage"]["input_tokens"].as_u64().unwrap_or(0) as usize;
                    }
                    "content_block_start" => {
                        if data["content_block"]["type"].as_str() == Some("tool_use") {
                            tool_in_flight = Some((
                                data["content_block"]["id"].as_str().unwrap_or_default().to_string(),
                                data["content_block"]["name"].as_str().unwrap_or_default().to_string(),
                                String::new(),
                            ));
                        }
                    }
                    "content_block_delta" => {
                        match data["delta"]["type"].as_str() {
                            Some("text_delta") => {
                                if let Some(text) = data["delta"]["text"].as_str() {
                                    yield StreamChunk { content: text.to_string(), ..Default::default() };
                                }
                            }
                            Some("input_json_delta") => {
                                if let Some((_, _, buffer)) = &mut tool_in_flight {
                                    if let Some(partial) = data["delta"]["partial_json"].as_str() {
                                        buffer.push_str(partial);
                                    }
                                }
                            }
                            _ => {}
                        }
                    }
                    "content_block_stop" => {
                        if let Some((id, name, buffer)) = tool_in_flight.take() {
                            let arguments = serde_json::from_str(&buffer).unwrap_or(Value::Null);
                            yield StreamChunk {
                                tool_calls: vec![NativeToolCall { id, name, arguments }],
                                ..Default::default()
                            };
                        }
                    }
                    "message_delta" => {
                        if let Some(out) = data["usage"]["output_tokens"].as_u64() {
                            output_tokens = out as usize;
                        }
                        if let Some(stop_reason) = data["delta"]["stop_reason"].as_str() {
                            let finish_reason = if stop_reason == "tool_use" { "tool_calls" } else { "stop" };
                            yield StreamChunk { finish_reason: Some(finish_reason.to_string()), ..Default::default() };
                        }
                    }
                    "message_stop" => {
                        yield StreamChunk {
                            usage: Some(TokenUsage {
                                input_tokens,
                                output_tokens,
                                total_tokens: input_tokens + output_tokens,
                            }),
                            ..Default::default()
                        };
                        return;
                    }
                    _ => {}
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llmgate::config::ProviderKind;

    fn cfg() -> ProviderConfig {
        ProviderConfig {
            key: "anthropic".into(),
            kind: ProviderKind::Anthropic,
            api_key: Some("sk-ant-test".into()),
            base_url: None,
            model: Some("claude-sonnet-4".into()),
            models: vec![],
            extra_headers: HashMap::new(),
            auth_type: String::new(),
            proxy: None,
            insecure_skip_verify: false,
        }
    }

    #[test]
    fn system_messages_hoist_and_are_removed_from_turns() {
        let adapter = AnthropicAdapter::new(&cfg()).unwrap();
        let messages = vec![
            Message { role: Role::System, content: Content::Text("be terse".into()), tool_calls: vec![] },
            Message { role: Role::User, content: Content::Text("hi".into()), tool_calls: vec![] },
        ];
        let body = adapter.build_request("", &messages, &[], false);
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn tool_result_message_becomes_user_tool_result_block() {
        let message = Message {
            role: Role::Tool { call_id: "tu_1".into() },
            content: Content::Text("42".into()),
            tool_calls: vec![],
        };
        let wire = message_to_anthropic_wire(&message);
        assert_eq!(wire["role"], "user");
        assert_eq!(wire["content"][0]["type"], "tool_result");
        assert_eq!(wire["content"][0]["tool_use_id"], "tu_1");
    }

    #[tokio::test]
    async fn tool_use_stream_yields_one_tool_call_then_finish_then_usage() {
        use futures_util::StreamExt;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let mock = MockServer::start().await;
        let sse_body = concat!(
            "event: message_start\n",
            "data: {\"message\":{\"usage\":{\"input_tokens\":12}}}\n\n",
            "event: content_block_start\n",
            "data: {\"content_block\":{\"type\":\"tool_use\",\"id\":\"tu_1\",\"name\":\"lookup\"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"q\\\":\\\"\"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"foo\\\"}\"}}\n\n",
            "event: content_block_stop\n",
            "data: {}\n\n",
            "event: message_delta\n",
            "data: {\"delta\":{\"stop_reason\":\"tool_use\"},\"usage\":{\"output_tokens\":5}}\n\n",
            "event: message_stop\n",
            "data: {}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse_body, "text/event-stream"))
            .mount(&mock)
            .await;

        let mut provider_cfg = cfg();
        provider_cfg.base_url = Some(mock.uri());
        let adapter = AnthropicAdapter::new(&provider_cfg).unwrap();

        let messages = vec![Message { role: Role::User, content: Content::Text("look it up".into()), tool_calls: vec![] }];
        let (mut stream, _headers) = adapter.chat_stream("claude-sonnet-4", &messages, &[]).await.unwrap();

        let first = stream.next().await.unwrap();
        assert_eq!(first.tool_calls.len(), 1);
        assert_eq!(first.tool_calls[0].id, "tu_1");
        assert_eq!(first.tool_calls[0].name, "lookup");
        assert_eq!(first.tool_calls[0].arguments, json!({"q": "foo"}));

        let second = stream.next().await.unwrap();
        assert_eq!(second.finish_reason.as_deref(), Some("tool_calls"));

        let third = stream.next().await.unwrap();
        let usage = third.usage.unwrap();
        assert_eq!(usage.input_tokens, 12);
        assert_eq!(usage.output_tokens, 5);
        assert_eq!(usage.total_tokens, 17);

        assert!(stream.next().await.is_none());
    }
}
