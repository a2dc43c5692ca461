//! Canonical request/response model shared by every provider adapter.
//!
//! Applications never construct these types by hand; the gateway's HTTP
//! layer (see [`crate::llmgate::server`]) decodes the OpenAI wire JSON
//! straight into them, and each [`crate::llmgate::adapters::Adapter`]
//! translates them into (and back out of) its upstream's native format.
//!
//! # Example
//!
//! ```rust
//! use llmgate::model::{Content, Message, Role};
//!
//! let messages = vec![
//!     Message { role: Role::System, content: Content::Text("be terse".into()), tool_calls: vec![] },
//!     Message { role: Role::User, content: Content::Text("ping".into()), tool_calls: vec![] },
//! ];
//! assert_eq!(messages.len(), 2);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Role of a canonical [`Message`].
#[derive(Debug, Clone, PartialEq)]
pub enum Role {
    /// A system authored message that primes or constrains assistant behaviour.
    System,
    /// A user authored message.
    User,
    /// An assistant authored message (model responses).
    Assistant,
    /// A tool-result message correlating with a prior [`NativeToolCall`].
    Tool {
        /// The `id` of the [`NativeToolCall`] this result answers.
        call_id: String,
    },
}

/// A single tool call requested by the assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeToolCall {
    /// Provider-assigned (or, for Gemini, synthesized) call id.
    pub id: String,
    /// Tool name, matching one of the [`Tool`]s sent in the request.
    pub name: String,
    /// Parsed JSON arguments.
    pub arguments: serde_json::Value,
}

/// Provider-agnostic tool schema forwarded to the upstream's function-calling API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Tool name as it will appear in the upstream `tools` array.
    pub name: String,
    /// Human readable description surfaced to the model.
    pub description: String,
    /// JSON-Schema object describing the accepted parameters.
    pub input_schema: serde_json::Value,
}

/// Anthropic-style embedded image source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSource {
    /// MIME type, e.g. `"image/png"`.
    pub media_type: String,
    /// Base64-encoded image bytes.
    pub data: String,
}

/// One block inside a multi-part [`Content::Blocks`] message.
///
/// Mirrors the Anthropic / OpenAI multi-part content shapes, plus the
/// Gemini `thought_signature` passthrough field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text segment.
    Text {
        /// Text content.
        text: String,
    },
    /// Inline or referenced image.
    Image {
        /// Anthropic-style `{media_type, data}` source, when present.
        #[serde(skip_serializing_if = "Option::is_none")]
        source: Option<ImageSource>,
        /// OpenAI-style `image_url.url`, when present (may be a `data:` URL).
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    /// An assistant-issued tool invocation.
    ToolUse {
        /// Call id (provider-assigned or synthesized).
        id: String,
        /// Tool name.
        name: String,
        /// Parsed JSON arguments.
        input: serde_json::Value,
        /// Opaque Gemini "thought signature" carried end-to-end, uninterpreted.
        #[serde(skip_serializing_if = "Option::is_none")]
        thought_signature: Option<String>,
    },
    /// The result of a prior [`ContentBlock::ToolUse`].
    ToolResult {
        /// Matching [`ContentBlock::ToolUse::id`].
        tool_use_id: String,
        /// Result payload, generally text.
        content: String,
        /// Whether the tool execution failed.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

/// The body of a [`Message`]: a plain string, a structured block array, or a
/// pre-built wire map passed through verbatim.
///
/// This tagged variant replaces a dynamically-typed "string, or array of
/// blocks, or map" content field so each adapter can pattern-match instead
/// of type-switching on an `any`.
#[derive(Debug, Clone)]
pub enum Content {
    /// A plain string body.
    Text(String),
    /// A structured sequence of content blocks.
    Blocks(Vec<ContentBlock>),
    /// A pre-built, adapter-specific wire message passed straight through by
    /// OpenAI-style adapters.
    Raw(serde_json::Value),
}

impl Content {
    /// Best-effort flattening to plain text, concatenating every
    /// [`ContentBlock::Text`] block. Used when an upstream format has no
    /// room for structured content (e.g. Anthropic `system`).
    pub fn as_text(&self) -> String {
        match self {
            Content::Text(s) => s.clone(),
            Content::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
            Content::Raw(v) => v.as_str().map(str::to_owned).unwrap_or_default(),
        }
    }
}

/// A canonical chat message, independent of any upstream wire format.
#[derive(Debug, Clone)]
pub struct Message {
    /// Author role.
    pub role: Role,
    /// Message body.
    pub content: Content,
    /// Native tool calls carried by this message (non-empty only on
    /// assistant messages that requested tool use).
    pub tool_calls: Vec<NativeToolCall>,
}

/// How many tokens a request/response pair consumed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt/input tokens billed by the provider.
    pub input_tokens: usize,
    /// Generated/output tokens billed by the provider.
    pub output_tokens: usize,
    /// Convenience total, normally `input_tokens + output_tokens`.
    pub total_tokens: usize,
}

/// A base64-encoded inline image returned by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineImage {
    /// MIME type, e.g. `"image/png"`.
    pub mime_type: String,
    /// Base64-encoded bytes.
    pub data: String,
}

/// The full (non-streaming) result of [`crate::llmgate::adapters::Adapter::chat`].
#[derive(Debug, Clone, Default)]
pub struct LLMResponse {
    /// Assistant text content.
    pub content: String,
    /// Inline images returned alongside the text, if any.
    pub inline_images: Vec<InlineImage>,
    /// Tool calls the assistant requested.
    pub tool_calls: Vec<NativeToolCall>,
    /// `false` iff the upstream signalled a tool-use stop (the caller is
    /// expected to invoke the tools and continue the conversation).
    pub finished: bool,
    /// Token accounting, when the upstream reported it.
    pub usage: Option<TokenUsage>,
    /// Response headers worth surfacing to the caller (rate-limit hints etc).
    pub headers: HashMap<String, String>,
}

impl LLMResponse {
    /// Construct a finished response carrying only text — the common case
    /// for upstreams that returned no tool calls.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finished: true,
            ..Default::default()
        }
    }
}

/// One increment of a streaming response.
///
/// Each chunk is at-most-once text, at-most-once tool-call set, optionally a
/// terminal `finish_reason`, optionally a terminal `usage`, optionally a
/// terminal `error`. Consumers must read until the channel closes.
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    /// Incremental text delta. Empty for chunks carrying only metadata.
    pub content: String,
    /// Tool call delta, emitted once fully assembled.
    pub tool_calls: Vec<NativeToolCall>,
    /// Inline images, if the provider streams them.
    pub inline_images: Vec<InlineImage>,
    /// Terminal completion reason (`"stop"`, `"tool_calls"`, ...).
    pub finish_reason: Option<String>,
    /// Terminal token usage summary.
    pub usage: Option<TokenUsage>,
    /// Terminal error, surfaced to the client as an SSE error frame instead
    /// of `[DONE]`.
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_as_text_flattens_blocks() {
        let content = Content::Blocks(vec![
            ContentBlock::Text { text: "a".into() },
            ContentBlock::ToolUse {
                id: "1".into(),
                name: "x".into(),
                input: serde_json::json!({}),
                thought_signature: None,
            },
            ContentBlock::Text { text: "b".into() },
        ]);
        assert_eq!(content.as_text(), "ab");
    }

    #[test]
    fn llm_response_text_is_finished() {
        let resp = LLMResponse::text("pong");
        assert!(resp.finished);
        assert_eq!(resp.content, "pong");
    }
}
