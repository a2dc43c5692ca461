//! Native Google Gemini `generateContent` adapter.
//!
//! `cloudllm`'s `clients/gemini.rs` also delegates to the OpenAI-compatible
//! surface, which cannot express Gemini's native `systemInstruction`/`parts`/
//! `functionCall` wire shapes. Ground-up rewrite; only the `Model`-enum/
//! `model_to_string` convention survives.

use std::collections::HashMap;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde_json::{json, Value};

use super::sanitize::sanitize_schema;
use super::{Adapter, ChunkStream};
use crate::llmgate::config::ProviderConfig;
use crate::llmgate::error::GatewayError;
use crate::llmgate::http_pool;
use crate::llmgate::model::{
    Content, ContentBlock, LLMResponse, Message, NativeToolCall, Role, StreamChunk, TokenUsage, Tool,
};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Native Gemini `:generateContent` / `:streamGenerateContent` transport.
pub struct GeminiAdapter {
    base_url: String,
    default_model: String,
    models: Vec<String>,
    api_key: Option<String>,
    extra_headers: HashMap<String, String>,
    http: reqwest::Client,
}

impl GeminiAdapter {
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
        let mut builder = builder;
        if let Some(key) = &self.api_key {
            builder = builder.header("x-goog-api-key", key);
        }
        for (name, value) in &self.extra_headers {
            builder = builder.header(name, value);
        }
        builder
    }

    fn build_request(&self, messages: &[Message], tools: &[Tool]) -> Value {
        let system_text = messages
            .iter()
            .filter(|m| matches!(m.role, Role::System))
            .map(|m| m.content.as_text())
            .collect::<Vec<_>>()
            .join("\n");

        let contents: Vec<Value> = messages
            .iter()
            .filter(|m| !matches!(m.role, Role::System))
            .map(message_to_gemini_content)
            .collect();

        let mut body = json!({ "contents": contents });
        if !system_text.is_empty() {
            body["systemInstruction"] = json!({"parts": [{"text": system_text}]});
        }
        if !tools.is_empty() {
            let declarations: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": sanitize_schema(&t.input_schema),
                    })
                })
                .collect();
            body["tools"] = json!([{"functionDeclarations": declarations}]);
        }
        body
    }
}

fn content_block_to_gemini_part(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => json!({"text": text}),
        ContentBlock::Image { source, url } => {
            if let Some(source) = source {
                json!({"inlineData": {"mimeType": source.media_type, "data": source.data}})
            } else if let Some((media_type, data)) = url.as_deref().and_then(super::translate::parse_data_url) {
                json!({"inlineData": {"mimeType": media_type, "data": data}})
            } else {
                json!({"text": url.clone().unwrap_or_default()})
            }
        }
        ContentBlock::ToolUse { name, input, .. } => {
            json!({"functionCall": {"name": name, "args": input}})
        }
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            ..
        } => {
            let name = tool_use_id.strip_prefix("call_").unwrap_or(tool_use_id);
            json!({"functionResponse": {"name": name, "response": {"result": content}}})
        }
    }
}

fn message_to_gemini_content(message: &Message) -> Value {
    let role = match message.role {
        Role::Assistant => "model",
        Role::Tool { .. } | Role::User => "user",
        Role::System => unreachable!("system messages are filtered before this call"),
    };

    let mut parts: Vec<Value> = match &message.content {
        Content::Blocks(blocks) => blocks.iter().map(content_block_to_gemini_part).collect(),
        Content::Text(text) if !text.is_empty() => vec![json!({"text": text})],
        Content::Text(_) => vec![],
        Content::Raw(v) => vec![v.clone()],
    };

    if let Role::Tool { call_id } = &message.role {
        let name = call_id.strip_prefix("call_").unwrap_or(call_id);
        parts = vec![json!({
            "functionResponse": {"name": name, "response": {"result": message.content.as_text()}},
        })];
    }

    for tool_call in &message.tool_calls {
        parts.push(json!({"functionCall": {"name": tool_call.name, "args": tool_call.arguments}}));
    }

    json!({"role": role, "parts": parts})
}

fn synthesize_call_id(name: &str) -> String {
    format!("call_{name}")
}

fn finish_reason_from_gemini(raw: Option<&str>, has_tool_call: bool) -> (String, bool) {
    if has_tool_call {
        ("tool_calls".to_string(), false)
    } else {
        let _ = raw;
        ("stop".to_string(), true)
    }
}

fn usage_from_metadata(metadata: &Value) -> Option<TokenUsage> {
    if metadata.is_null() {
        return None;
    }
    Some(TokenUsage {
        input_tokens: metadata["promptTokenCount"].as_u64().unwrap_or(0) as usize,
        output_tokens: metadata["candidatesTokenCount"].as_u64().unwrap_or(0) as usize,
        total_tokens: metadata["totalTokenCount"].as_u64().unwrap_or(0) as usize,
    })
}

#[async_trait]
impl Adapter for GeminiAdapter {
    async fn chat(&self, model: &str, messages: &[Message], tools: &[Tool]) -> Result<LLMResponse, GatewayError> {
        let body = self.build_request(messages, tools);
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url,
            self.resolve_model(model)
        );
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

        let candidate = parsed["candidates"]
            .as_array()
            .and_then(|c| c.first())
            .ok_or_else(|| GatewayError::UpstreamBadGateway("empty candidates array".into()))?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for part in candidate["content"]["parts"].as_array().cloned().unwrap_or_default() {
            if let Some(text) = part["text"].as_str() {
                content.push_str(text);
            } else if part.get("functionCall").is_some() {
                let name = part["functionCall"]["name"].as_str().unwrap_or_default().to_string();
                tool_calls.push(NativeToolCall {
                    id: synthesize_call_id(&name),
                    name,
                    arguments: part["functionCall"]["args"].clone(),
                });
            }
        }

        let (_, finished) = finish_reason_from_gemini(candidate["finishReason"].as_str(), !tool_calls.is_empty());

        Ok(LLMResponse {
            content,
            inline_images: vec![],
            tool_calls,
            finished,
            usage: usage_from_metadata(&parsed["usageMetadata"]),
            headers,
        })
    }

    async fn chat_stream(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(ChunkStream, HashMap<String, String>), GatewayError> {
        let body = self.build_request(messages, tools);
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url,
            self.resolve_model(model)
        );
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
                        yield StreamChunk { error: Some(format!("invalid stream chunk: {e}")), ..Default::default() };
                        return;
                    }
                };

                let Some(candidate) = data["candidates"].as_array().and_then(|c| c.first()) else { continue };

                let mut tool_calls = Vec::new();
                let mut text = String::new();
                for part in candidate["content"]["parts"].as_array().cloned().unwrap_or_default() {
                    if let Some(t) = part["text"].as_str() {
                        text.push_str(t);
                    } else if part.get("functionCall").is_some() {
                        let name = part["functionCall"]["name"].as_str().unwrap_or_default().to_string();
                        tool_calls.push(NativeToolCall {
                            id: synthesize_call_id(&name),
                            name,
                            arguments: part["functionCall"]["args"].clone(),
                        });
                    }
                }
                if !text.is_empty() {
                    yield StreamChunk { content: text, ..Default::default() };
                }
                if !tool_calls.is_empty() {
                    yield StreamChunk { tool_calls, ..Default::default() };
                }

                if let Some(finish_reason) = candidate["finishReason"].as_str() {
                    let has_tool_call = candidate["content"]["parts"]
                        .as_array()
                        .map(|parts| parts.iter().any(|p| p.get("functionCall").is_some()))
                        .unwrap_or(false);
                    let (reason, _) = finish_reason_from_gemini(Some(finish_reason), has_tool_call);
                    yield StreamChunk { finish_reason: Some(reason), ..Default::default() };
                }

                if let Some(usage) = usage_from_metadata(&data["usageMetadata"]) {
                    yield StreamChunk { usage: Some(usage), ..Default::default() };
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
            key: "gemini".into(),
            kind: ProviderKind::Gemini,
            api_key: Some("goog-key".into()),
            base_url: None,
            model: Some("gemini-1.5-pro".into()),
            models: vec![],
            extra_headers: HashMap::new(),
            auth_type: String::new(),
            proxy: None,
            insecure_skip_verify: false,
        }
    }

    #[test]
    fn system_messages_become_system_instruction() {
        let adapter = GeminiAdapter::new(&cfg()).unwrap();
        let messages = vec![
            Message { role: Role::System, content: Content::Text("be terse".into()), tool_calls: vec![] },
            Message { role: Role::User, content: Content::Text("hi".into()), tool_calls: vec![] },
        ];
        let body = adapter.build_request(&messages, &[]);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be terse");
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
        assert_eq!(body["contents"][0]["role"], "user");
    }

    #[test]
    fn assistant_role_maps_to_model() {
        let message = Message { role: Role::Assistant, content: Content::Text("pong".into()), tool_calls: vec![] };
        let content = message_to_gemini_content(&message);
        assert_eq!(content["role"], "model");
    }

    #[test]
    fn tool_call_ids_are_synthesized() {
        assert_eq!(synthesize_call_id("lookup"), "call_lookup");
    }

    #[test]
    fn tool_result_recovers_name_from_synthesized_id() {
        let message = Message {
            role: Role::Tool { call_id: "call_lookup".into() },
            content: Content::Text("42".into()),
            tool_calls: vec![],
        };
        let content = message_to_gemini_content(&message);
        assert_eq!(content["parts"][0]["functionResponse"]["name"], "lookup");
    }
}
