//! Canonical message translation helpers shared by the OpenAI-style and
//! Vertex adapters (both speak OpenAI wire), plus the data-URL codec used by
//! every adapter that embeds images.

use serde_json::{json, Value};

use crate::llmgate::model::{Content, ContentBlock, Message, NativeToolCall, Role, Tool};

/// Build a `data:<mime>;base64,<b64>` URL from raw parts.
pub fn data_url(media_type: &str, data: &str) -> String {
    format!("data:{media_type};base64,{data}")
}

/// Parse a `data:<mime>;base64,<b64>` URL back into `(media_type, data)`.
/// Returns `None` for any other URL shape.
pub fn parse_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (header, data) = rest.split_once(',')?;
    let media_type = header.strip_suffix(";base64")?;
    Some((media_type.to_string(), data.to_string()))
}

/// Render a [`Tool`] as the OpenAI `{type:"function", function:{...}}` wire shape.
pub fn openai_tool_wire(tool: &Tool) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema,
        }
    })
}

fn content_block_to_openai_part(block: &ContentBlock) -> Option<Value> {
    match block {
        ContentBlock::Text { text } => Some(json!({"type": "text", "text": text})),
        ContentBlock::Image { source, url } => {
            let resolved_url = if let Some(source) = source {
                data_url(&source.media_type, &source.data)
            } else {
                url.clone()?
            };
            Some(json!({"type": "image_url", "image_url": {"url": resolved_url}}))
        }
        // tool_use/tool_result blocks are handled by the message-level split
        // below, not rendered as content parts.
        ContentBlock::ToolUse { .. } | ContentBlock::ToolResult { .. } => None,
    }
}

fn blocks_to_openai_content(blocks: &[ContentBlock]) -> Value {
    let parts: Vec<Value> = blocks.iter().filter_map(content_block_to_openai_part).collect();
    if parts.len() == 1 {
        if let Some(text) = parts[0].get("text") {
            return text.clone();
        }
    }
    Value::Array(parts)
}

fn tool_calls_wire(tool_calls: &[NativeToolCall]) -> Value {
    Value::Array(
        tool_calls
            .iter()
            .map(|tc| {
                json!({
                    "id": tc.id,
                    "type": "function",
                    "function": {
                        "name": tc.name,
                        "arguments": serde_json::to_string(&tc.arguments).unwrap_or_default(),
                    }
                })
            })
            .collect(),
    )
}

/// Translate canonical messages into the OpenAI `messages` array, applying
/// the tool-call/tool-result splitting and stringification rules OpenAI's
/// wire format requires. Shared by the OpenAI-style and Vertex adapters
/// (Vertex speaks the same wire format).
pub fn messages_to_openai_wire(messages: &[Message]) -> Vec<Value> {
    let mut wire = Vec::with_capacity(messages.len());

    for message in messages {
        if let Content::Raw(v) = &message.content {
            wire.push(v.clone());
            continue;
        }

        match &message.role {
            Role::System => {
                wire.push(json!({"role": "system", "content": message.content.as_text()}));
            }
            Role::Tool { call_id } => {
                wire.push(json!({
                    "role": "tool",
                    "tool_call_id": call_id,
                    "content": message.content.as_text(),
                }));
            }
            Role::Assistant => {
                let mut entry = json!({
                    "role": "assistant",
                    "content": message.content.as_text(),
                });
                if !message.tool_calls.is_empty() {
                    entry["tool_calls"] = tool_calls_wire(&message.tool_calls);
                }
                wire.push(entry);
            }
            Role::User => match &message.content {
                Content::Blocks(blocks) if blocks.iter().any(|b| matches!(b, ContentBlock::ToolResult { .. })) => {
                    let text_blocks: Vec<&ContentBlock> = blocks
                        .iter()
                        .filter(|b| matches!(b, ContentBlock::Text { .. }))
                        .collect();
                    if !text_blocks.is_empty() {
                        let text: String = text_blocks
                            .iter()
                            .filter_map(|b| match b {
                                ContentBlock::Text { text } => Some(text.as_str()),
                                _ => None,
                            })
                            .collect();
                        wire.push(json!({"role": "user", "content": text}));
                    }
                    for block in blocks {
                        if let ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            ..
                        } = block
                        {
                            wire.push(json!({
                                "role": "tool",
                                "tool_call_id": tool_use_id,
                                "content": content,
                            }));
                        }
                    }
                }
                Content::Blocks(blocks) => {
                    wire.push(json!({"role": "user", "content": blocks_to_openai_content(blocks)}));
                }
                Content::Text(text) => {
                    wire.push(json!({"role": "user", "content": text}));
                }
                Content::Raw(_) => unreachable!("handled above"),
            },
        }
    }

    wire
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llmgate::model::ImageSource;

    #[test]
    fn data_url_round_trips() {
        let url = data_url("image/png", "QUJD");
        let (media_type, data) = parse_data_url(&url).unwrap();
        assert_eq!(media_type, "image/png");
        assert_eq!(data, "QUJD");
    }

    #[test]
    fn plain_text_turns_translate_losslessly() {
        let messages = vec![
            Message {
                role: Role::User,
                content: Content::Text("hi".into()),
                tool_calls: vec![],
            },
            Message {
                role: Role::Assistant,
                content: Content::Text("hello".into()),
                tool_calls: vec![],
            },
        ];
        let wire = messages_to_openai_wire(&messages);
        assert_eq!(wire[0]["role"], "user");
        assert_eq!(wire[0]["content"], "hi");
        assert_eq!(wire[1]["role"], "assistant");
        assert_eq!(wire[1]["content"], "hello");
    }

    #[test]
    fn assistant_tool_calls_are_stringified() {
        let messages = vec![Message {
            role: Role::Assistant,
            content: Content::Text(String::new()),
            tool_calls: vec![NativeToolCall {
                id: "call_1".into(),
                name: "lookup".into(),
                arguments: json!({"q": "foo"}),
            }],
        }];
        let wire = messages_to_openai_wire(&messages);
        let arguments = wire[0]["tool_calls"][0]["function"]["arguments"].as_str().unwrap();
        assert_eq!(arguments, r#"{"q":"foo"}"#);
    }

    #[test]
    fn tool_result_blocks_split_with_preceding_text() {
        let messages = vec![Message {
            role: Role::User,
            content: Content::Blocks(vec![
                ContentBlock::Text { text: "see result:".into() },
                ContentBlock::ToolResult {
                    tool_use_id: "tu_1".into(),
                    content: "42".into(),
                    is_error: false,
                },
            ]),
            tool_calls: vec![],
        }];
        let wire = messages_to_openai_wire(&messages);
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0]["role"], "user");
        assert_eq!(wire[0]["content"], "see result:");
        assert_eq!(wire[1]["role"], "tool");
        assert_eq!(wire[1]["tool_call_id"], "tu_1");
        assert_eq!(wire[1]["content"], "42");
    }

    #[test]
    fn image_source_becomes_data_url() {
        let messages = vec![Message {
            role: Role::User,
            content: Content::Blocks(vec![ContentBlock::Image {
                source: Some(ImageSource {
                    media_type: "image/png".into(),
                    data: "QUJD".into(),
                }),
                url: None,
            }]),
            tool_calls: vec![],
        }];
        let wire = messages_to_openai_wire(&messages);
        let url = wire[0]["content"][0]["image_url"]["url"].as_str().unwrap();
        assert_eq!(url, "data:image/png;base64,QUJD");
    }
}
