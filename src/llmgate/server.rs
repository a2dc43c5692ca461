//! HTTP surface: axum router, `AppState`, and every gateway/admin handler.
//!
//! `cloudllm` ships an unwired `axum`/`tower` dependency pair; this is the
//! first thing in the codebase that stands up a real server. Routing and
//! `State`/`Json` extractor shape follow `binn-yang-llm-gateway`'s
//! `handlers/chat_completions.rs`. SSE responses are driven by a producer
//! task writing to a bounded `tokio::sync::mpsc` channel, consumed by
//! `axum::response::sse::Sse`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::llmgate::adapters::{build_adapter, Adapter};
use crate::llmgate::auth::{hash_token, TokenAuthorizer};
use crate::llmgate::cluster::ClusterPort;
use crate::llmgate::config::{AppConfig, ProviderConfig, StoreConfig};
use crate::llmgate::device_flow::DeviceFlowCoordinator;
use crate::llmgate::error::GatewayError;
use crate::llmgate::model::{Content, ContentBlock, ImageSource, Message, NativeToolCall, Role, StreamChunk, Tool};
use crate::llmgate::registry::ProviderRegistry;
use crate::llmgate::rotation::RotationCoordinator;
use crate::llmgate::store::{ApiTokenRecord, ProviderRecord, Store};

const CHUNK_CHANNEL_CAPACITY: usize = 64;

/// Shared application state handed to every handler via `State`.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ProviderRegistry>,
    pub store: Arc<dyn Store>,
    pub authorizer: Arc<TokenAuthorizer>,
    pub device_flow: Arc<DeviceFlowCoordinator>,
    pub rotation: Arc<RotationCoordinator>,
    pub admin_token: Option<String>,
    pub store_kind: &'static str,
}

impl AppState {
    /// Assemble application state from a loaded configuration, an already
    /// bootstrapped registry, and a constructed store.
    pub fn new(
        config: &AppConfig,
        registry: Arc<ProviderRegistry>,
        store: Arc<dyn Store>,
        cluster: Arc<dyn ClusterPort>,
    ) -> Self {
        let store_kind = match config.store {
            StoreConfig::Sqlite { .. } => "sqlite",
            StoreConfig::Postgres { .. } => "postgres",
            StoreConfig::Memory => "memory",
        };
        Self {
            authorizer: Arc::new(TokenAuthorizer::with_config_tokens(
                store.clone(),
                &config.gateway.auth_tokens,
            )),
            device_flow: Arc::new(DeviceFlowCoordinator::new()),
            rotation: Arc::new(RotationCoordinator::new(store.clone(), cluster)),
            registry,
            store,
            admin_token: config.server.admin_token.clone(),
            store_kind,
        }
    }
}

/// Build the full router, mounted at the application root (the caller
/// applies `config.server.base_path` as a prefix if non-`/`).
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/gateway/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .route("/v1/info", get(info))
        .route("/api/v1/providers", get(list_providers).post(create_provider))
        .route(
            "/api/v1/providers/{key}",
            get(get_provider).put(update_provider).delete(delete_provider),
        )
        .route("/api/v1/providers/discover-models", post(discover_models))
        .route("/api/v1/providers/device-auth", post(device_auth))
        .route("/api/v1/providers/device-auth-status", get(device_auth_status))
        .route("/api/v1/api-tokens", get(list_api_tokens).post(create_api_token))
        .route("/api/v1/api-tokens/{id}", put(update_api_token).delete(delete_api_token))
        .route("/api/v1/admin/rotate-key", post(rotate_key))
        .with_state(state)
}

fn bearer_from_header(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn require_admin(state: &AppState, headers: &axum::http::HeaderMap) -> Result<(), GatewayError> {
    match &state.admin_token {
        None => Ok(()),
        Some(expected) => {
            let provided = bearer_from_header(headers).unwrap_or_default();
            if provided == expected {
                Ok(())
            } else {
                Err(GatewayError::Forbidden("admin bearer token required".into()))
            }
        }
    }
}

// ---- request/response wire shapes (OpenAI chat/completions convention) ----

#[derive(Debug, Deserialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Value>,
    #[serde(default)]
    tools: Vec<WireTool>,
    #[serde(default)]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct WireTool {
    #[serde(rename = "type")]
    #[serde(default)]
    _kind: Option<String>,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    parameters: Value,
}

impl From<WireTool> for Tool {
    fn from(w: WireTool) -> Self {
        Tool {
            name: w.function.name,
            description: w.function.description,
            input_schema: w.function.parameters,
        }
    }
}

fn parse_incoming_messages(raw: &[Value]) -> Result<Vec<Message>, GatewayError> {
    raw.iter().map(parse_incoming_message).collect()
}

fn parse_incoming_message(raw: &Value) -> Result<Message, GatewayError> {
    let role_str = raw["role"]
        .as_str()
        .ok_or_else(|| GatewayError::InvalidRequest("message missing 'role'".into()))?;

    let tool_calls = raw["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .map(|c| {
                    let arguments_str = c["function"]["arguments"].as_str().unwrap_or("{}");
                    let arguments = serde_json::from_str(arguments_str).unwrap_or(json!({}));
                    NativeToolCall {
                        id: c["id"].as_str().unwrap_or_default().to_string(),
                        name: c["function"]["name"].as_str().unwrap_or_default().to_string(),
                        arguments,
                    }
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let role = match role_str {
        "system" => Role::System,
        "user" => Role::User,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool {
            call_id: raw["tool_call_id"].as_str().unwrap_or_default().to_string(),
        },
        other => return Err(GatewayError::InvalidRequest(format!("unknown role '{other}'"))),
    };

    let content = parse_incoming_content(&raw["content"]);

    Ok(Message { role, content, tool_calls })
}

fn parse_incoming_content(value: &Value) -> Content {
    match value {
        Value::String(s) => Content::Text(s.clone()),
        Value::Array(parts) => Content::Blocks(parts.iter().map(parse_incoming_part).collect()),
        Value::Null => Content::Text(String::new()),
        other => Content::Raw(other.clone()),
    }
}

fn parse_incoming_part(part: &Value) -> ContentBlock {
    match part["type"].as_str().unwrap_or("text") {
        "image_url" => ContentBlock::Image {
            source: None,
            url: part["image_url"]["url"].as_str().map(String::from),
        },
        "image" => ContentBlock::Image {
            source: Some(ImageSource {
                media_type: part["source"]["media_type"].as_str().unwrap_or_default().to_string(),
                data: part["source"]["data"].as_str().unwrap_or_default().to_string(),
            }),
            url: None,
        },
        _ => ContentBlock::Text {
            text: part["text"].as_str().unwrap_or_default().to_string(),
        },
    }
}

fn openai_response_body(model: &str, resp: &crate::llmgate::model::LLMResponse) -> Value {
    let finish_reason = if !resp.tool_calls.is_empty() {
        "tool_calls"
    } else if resp.finished {
        "stop"
    } else {
        "length"
    };
    let tool_calls: Vec<Value> = resp
        .tool_calls
        .iter()
        .map(|tc| {
            json!({
                "id": tc.id,
                "type": "function",
                "function": {"name": tc.name, "arguments": tc.arguments.to_string()},
            })
        })
        .collect();
    let mut message = json!({"role": "assistant", "content": resp.content});
    if !tool_calls.is_empty() {
        message["tool_calls"] = json!(tool_calls);
    }
    json!({
        "id": format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        "object": "chat.completion",
        "model": model,
        "choices": [{"index": 0, "message": message, "finish_reason": finish_reason}],
        "usage": resp.usage.map(|u| json!({
            "prompt_tokens": u.input_tokens,
            "completion_tokens": u.output_tokens,
            "total_tokens": u.total_tokens,
        })),
    })
}

fn sse_chunk_frame(model: &str, delta: Value, finish_reason: Option<&str>) -> String {
    let body = json!({
        "id": format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        "object": "chat.completion.chunk",
        "model": model,
        "choices": [{"index": 0, "delta": delta, "finish_reason": finish_reason}],
    });
    body.to_string()
}

fn sse_usage_frame(model: &str, usage: crate::llmgate::model::TokenUsage) -> String {
    json!({
        "id": format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        "object": "chat.completion.chunk",
        "model": model,
        "choices": [],
        "usage": {
            "prompt_tokens": usage.input_tokens,
            "completion_tokens": usage.output_tokens,
            "total_tokens": usage.total_tokens,
        },
    })
    .to_string()
}

fn stream_chunk_to_delta(chunk: &StreamChunk) -> Value {
    let mut delta = json!({});
    if !chunk.content.is_empty() {
        delta["content"] = json!(chunk.content);
    }
    if !chunk.tool_calls.is_empty() {
        let tool_calls: Vec<Value> = chunk
            .tool_calls
            .iter()
            .enumerate()
            .map(|(i, tc)| {
                json!({
                    "index": i,
                    "id": tc.id,
                    "type": "function",
                    "function": {"name": tc.name, "arguments": tc.arguments.to_string()},
                })
            })
            .collect();
        delta["tool_calls"] = json!(tool_calls);
    }
    delta
}

/// Adapts an `mpsc::Receiver` into a `Stream`, draining it until the
/// producer task closes its sending half.
fn receiver_stream(
    mut rx: mpsc::Receiver<Result<Event, std::convert::Infallible>>,
) -> impl futures_util::Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        while let Some(item) = rx.recv().await {
            yield item;
        }
    }
}

/// `POST /gateway/v1/chat/completions`: parse, authorize, resolve, dispatch.
async fn chat_completions(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(req): Json<ChatCompletionRequest>,
) -> Result<Response, GatewayError> {
    let (provider_key, model) = req
        .model
        .split_once('/')
        .ok_or_else(|| GatewayError::InvalidRequest(format!("malformed model identifier: {}", req.model)))?;

    state
        .authorizer
        .authorize(bearer_from_header(&headers), provider_key, model)
        .await?;

    let (adapter, model) = state.registry.resolve(&req.model).await?;
    let messages = parse_incoming_messages(&req.messages)?;
    let tools: Vec<Tool> = req.tools.into_iter().map(Tool::from).collect();

    if !req.stream {
        let resp = adapter.chat(&model, &messages, &tools).await?;
        return Ok(Json(openai_response_body(&req.model, &resp)).into_response());
    }

    if adapter.supports_streaming() {
        Ok(native_stream_response(adapter, model, req.model.clone(), messages, tools).await)
    } else {
        Ok(fake_stream_response(adapter, model, req.model.clone(), messages, tools).await)
    }
}

async fn native_stream_response(
    adapter: Arc<dyn Adapter>,
    model: String,
    full_model: String,
    messages: Vec<Message>,
    tools: Vec<Tool>,
) -> Response {
    let (tx, rx) = mpsc::channel::<Result<Event, std::convert::Infallible>>(CHUNK_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let (mut stream, _headers) = match adapter.chat_stream(&model, &messages, &tools).await {
            Ok(pair) => pair,
            Err(e) => {
                let frame = json!({"error": {"message": e.to_string()}}).to_string();
                let _ = tx.send(Ok(Event::default().data(frame))).await;
                return;
            }
        };

        while let Some(chunk) = stream.next().await {
            if let Some(error) = &chunk.error {
                let frame = json!({"error": {"message": error}}).to_string();
                let _ = tx.send(Ok(Event::default().data(frame))).await;
                return;
            }

            if !chunk.content.is_empty() || !chunk.tool_calls.is_empty() {
                let delta = stream_chunk_to_delta(&chunk);
                let frame = sse_chunk_frame(&full_model, delta, None);
                if tx.send(Ok(Event::default().data(frame))).await.is_err() {
                    return;
                }
            }

            if let Some(reason) = &chunk.finish_reason {
                let frame = sse_chunk_frame(&full_model, json!({}), Some(reason));
                if tx.send(Ok(Event::default().data(frame))).await.is_err() {
                    return;
                }
            }

            if let Some(usage) = chunk.usage {
                let frame = sse_usage_frame(&full_model, usage);
                if tx.send(Ok(Event::default().data(frame))).await.is_err() {
                    return;
                }
            }
        }

        let _ = tx.send(Ok(Event::default().data("[DONE]"))).await;
    });

    Sse::new(receiver_stream(rx)).keep_alive(KeepAlive::default()).into_response()
}

async fn fake_stream_response(
    adapter: Arc<dyn Adapter>,
    model: String,
    full_model: String,
    messages: Vec<Message>,
    tools: Vec<Tool>,
) -> Response {
    let (tx, rx) = mpsc::channel::<Result<Event, std::convert::Infallible>>(CHUNK_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        match adapter.chat(&model, &messages, &tools).await {
            Ok(resp) => {
                let content_frame = sse_chunk_frame(&full_model, json!({"content": resp.content}), None);
                if tx.send(Ok(Event::default().data(content_frame))).await.is_err() {
                    return;
                }
                let finish_reason = if resp.finished { "stop" } else { "tool_calls" };
                let finish_frame = sse_chunk_frame(&full_model, json!({}), Some(finish_reason));
                if tx.send(Ok(Event::default().data(finish_frame))).await.is_err() {
                    return;
                }
                let _ = tx.send(Ok(Event::default().data("[DONE]"))).await;
            }
            Err(e) => {
                let frame = json!({"error": {"message": e.to_string()}}).to_string();
                let _ = tx.send(Ok(Event::default().data(frame))).await;
            }
        }
    });

    Sse::new(receiver_stream(rx)).keep_alive(KeepAlive::default()).into_response()
}

/// `GET /v1/models`
async fn list_models(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "object": "list", "data": state.registry.advertised_models().await }))
}

/// `GET /v1/info`
async fn info(State(state): State<AppState>) -> Json<Value> {
    let providers = state
        .registry
        .list()
        .await
        .into_iter()
        .map(|(key, kind, default_model, models)| json!({"key": key, "kind": kind, "default_model": default_model, "models": models}))
        .collect::<Vec<_>>();
    Json(json!({ "providers": providers, "store": state.store_kind }))
}

/// `GET /api/v1/providers`
async fn list_providers(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<Vec<ProviderRecord>>, GatewayError> {
    require_admin(&state, &headers)?;
    Ok(Json(state.store.list_providers().await?))
}

/// `GET /api/v1/providers/{key}`
async fn get_provider(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Path(key): Path<String>,
) -> Result<Json<ProviderRecord>, GatewayError> {
    require_admin(&state, &headers)?;
    state
        .store
        .get_provider(&key)
        .await?
        .map(Json)
        .ok_or_else(|| GatewayError::NotFound(format!("provider {key}")))
}

/// `POST /api/v1/providers`
async fn create_provider(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(cfg): Json<ProviderConfig>,
) -> Result<Json<ProviderRecord>, GatewayError> {
    require_admin(&state, &headers)?;
    if state.store.get_provider(&cfg.key).await?.is_some() {
        return Err(GatewayError::Conflict(format!("provider '{}' already exists", cfg.key)));
    }
    let now = Utc::now();
    let record = ProviderRecord { key: cfg.key.clone(), config: cfg, created_at: now, updated_at: now };
    state.registry.reload(&record.config).await?;
    state.store.put_provider(record.clone()).await?;
    Ok(Json(record))
}

/// `PUT /api/v1/providers/{key}`
async fn update_provider(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Path(key): Path<String>,
    Json(cfg): Json<ProviderConfig>,
) -> Result<Json<ProviderRecord>, GatewayError> {
    require_admin(&state, &headers)?;
    let existing = state
        .store
        .get_provider(&key)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("provider {key}")))?;
    let record = ProviderRecord {
        key: key.clone(),
        config: cfg,
        created_at: existing.created_at,
        updated_at: Utc::now(),
    };
    state.registry.reload(&record.config).await?;
    state.store.put_provider(record.clone()).await?;
    Ok(Json(record))
}

/// `DELETE /api/v1/providers/{key}`
async fn delete_provider(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Path(key): Path<String>,
) -> Result<(), GatewayError> {
    require_admin(&state, &headers)?;
    state.registry.remove(&key).await;
    state.store.delete_provider(&key).await
}

/// `POST /api/v1/providers/discover-models`
async fn discover_models(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(cfg): Json<ProviderConfig>,
) -> Result<Json<Vec<String>>, GatewayError> {
    require_admin(&state, &headers)?;
    let adapter = build_adapter(&cfg)?;
    Ok(Json(adapter.models().to_vec()))
}

#[derive(Deserialize)]
struct DeviceAuthRequest {
    provider_key: String,
}

/// `POST /api/v1/providers/device-auth`
async fn device_auth(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(req): Json<DeviceAuthRequest>,
) -> Result<Json<crate::llmgate::device_flow::DeviceAuthResponse>, GatewayError> {
    require_admin(&state, &headers)?;
    let record = state
        .store
        .get_provider(&req.provider_key)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("provider {}", req.provider_key)))?;
    if record.config.auth_type != "copilot" {
        return Err(GatewayError::InvalidRequest("device flow requires auth_type=\"copilot\"".into()));
    }
    let resp = state
        .device_flow
        .initiate(&req.provider_key, state.store.clone(), state.registry.clone())
        .await?;
    Ok(Json(resp))
}

#[derive(Deserialize)]
struct DeviceAuthStatusQuery {
    provider_key: String,
}

/// `GET /api/v1/providers/device-auth-status`
async fn device_auth_status(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    axum::extract::Query(query): axum::extract::Query<DeviceAuthStatusQuery>,
) -> Result<Json<crate::llmgate::device_flow::FlowState>, GatewayError> {
    require_admin(&state, &headers)?;
    Ok(Json(state.device_flow.status(&query.provider_key).await))
}

#[derive(Deserialize)]
struct CreateApiTokenRequest {
    name: String,
    #[serde(default)]
    allowed_providers: Option<Vec<String>>,
    #[serde(default)]
    allowed_models: Option<Vec<String>>,
    #[serde(default)]
    allowed_webhooks: Option<Vec<String>>,
    #[serde(default)]
    expires_at: Option<chrono::DateTime<Utc>>,
}

#[derive(Serialize)]
struct CreateApiTokenResponse {
    #[serde(flatten)]
    record: ApiTokenRecord,
    /// Full bearer secret, returned exactly once.
    secret: String,
}

/// `GET /api/v1/api-tokens`
async fn list_api_tokens(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<Vec<ApiTokenRecord>>, GatewayError> {
    require_admin(&state, &headers)?;
    Ok(Json(state.store.list_api_tokens().await?))
}

/// `POST /api/v1/api-tokens`
async fn create_api_token(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(req): Json<CreateApiTokenRequest>,
) -> Result<Json<CreateApiTokenResponse>, GatewayError> {
    require_admin(&state, &headers)?;
    let secret = format!("sk-{}", ulid::Ulid::new());
    let token_hash = hash_token(&secret);
    let record = ApiTokenRecord {
        id: ulid::Ulid::new().to_string(),
        name: req.name,
        token_hash,
        token_prefix: secret.chars().take(8).collect(),
        allowed_providers: req.allowed_providers,
        allowed_models: req.allowed_models,
        allowed_webhooks: req.allowed_webhooks,
        expires_at: req.expires_at,
        last_used_at: None,
    };
    state.store.put_api_token(record.clone()).await?;
    Ok(Json(CreateApiTokenResponse { record, secret }))
}

#[derive(Deserialize)]
struct UpdateApiTokenRequest {
    name: String,
    #[serde(default)]
    allowed_providers: Option<Vec<String>>,
    #[serde(default)]
    allowed_models: Option<Vec<String>>,
    #[serde(default)]
    allowed_webhooks: Option<Vec<String>>,
    #[serde(default)]
    expires_at: Option<chrono::DateTime<Utc>>,
}

/// `PUT /api/v1/api-tokens/{id}`
async fn update_api_token(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<UpdateApiTokenRequest>,
) -> Result<Json<ApiTokenRecord>, GatewayError> {
    require_admin(&state, &headers)?;
    let mut existing = state
        .store
        .get_api_token(&id)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("api token {id}")))?;
    existing.name = req.name;
    existing.allowed_providers = req.allowed_providers;
    existing.allowed_models = req.allowed_models;
    existing.allowed_webhooks = req.allowed_webhooks;
    existing.expires_at = req.expires_at;
    state.store.put_api_token(existing.clone()).await?;
    Ok(Json(existing))
}

/// `DELETE /api/v1/api-tokens/{id}`
async fn delete_api_token(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Path(id): Path<String>,
) -> Result<(), GatewayError> {
    require_admin(&state, &headers)?;
    state.store.delete_api_token(&id).await
}

#[derive(Deserialize)]
struct RotateKeyRequest {
    #[serde(default)]
    encryption_key: String,
}

/// `POST /api/v1/admin/rotate-key`
async fn rotate_key(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(req): Json<RotateKeyRequest>,
) -> Result<(), GatewayError> {
    require_admin(&state, &headers)?;
    state.rotation.rotate(&req.encryption_key).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llmgate::cluster::LocalCluster;
    use crate::llmgate::config::{GatewayConfig, ProviderKind, ServerConfig, TelemetryConfig};
    use crate::llmgate::store::memory::InMemoryStore;

    fn test_config() -> AppConfig {
        AppConfig {
            log_level: "info".into(),
            providers: HashMap::new(),
            gateway: GatewayConfig::default(),
            store: StoreConfig::Memory,
            server: ServerConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }

    #[tokio::test]
    async fn router_builds_without_panicking() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let registry = Arc::new(ProviderRegistry::bootstrap(&[], &store).await.unwrap());
        let state = AppState::new(&test_config(), registry, store, Arc::new(LocalCluster));
        let _router = router(state);
    }

    #[test]
    fn parses_plain_text_conversation() {
        let raw = vec![
            json!({"role": "system", "content": "be terse"}),
            json!({"role": "user", "content": "ping"}),
        ];
        let messages = parse_incoming_messages(&raw).unwrap();
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0].role, Role::System));
        assert_eq!(messages[1].content.as_text(), "ping");
    }

    #[test]
    fn parses_assistant_tool_calls() {
        let raw = vec![json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{"id": "tu_1", "function": {"name": "lookup", "arguments": "{\"q\":\"foo\"}"}}],
        })];
        let messages = parse_incoming_messages(&raw).unwrap();
        assert_eq!(messages[0].tool_calls.len(), 1);
        assert_eq!(messages[0].tool_calls[0].name, "lookup");
    }

    #[test]
    fn rejects_message_without_role() {
        let raw = vec![json!({"content": "hi"})];
        assert!(parse_incoming_messages(&raw).is_err());
    }

    #[tokio::test]
    async fn strict_model_set_rejects_unknown_model_with_404() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let cfg = ProviderConfig {
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
        };
        let registry = Arc::new(ProviderRegistry::bootstrap(&[cfg], &store).await.unwrap());
        assert!(registry.resolve("openai/o1-preview").await.is_err());
    }

    struct NonStreamingStub;

    #[async_trait::async_trait]
    impl crate::llmgate::adapters::Adapter for NonStreamingStub {
        async fn chat(
            &self,
            _model: &str,
            _messages: &[Message],
            _tools: &[crate::llmgate::model::Tool],
        ) -> Result<crate::llmgate::model::LLMResponse, GatewayError> {
            Ok(crate::llmgate::model::LLMResponse::text("pong"))
        }

        fn supports_streaming(&self) -> bool {
            false
        }

        fn default_model(&self) -> &str {
            "stub"
        }

        fn models(&self) -> &[String] {
            &[]
        }
    }

    #[tokio::test]
    async fn fake_stream_emits_content_then_finish_then_done() {
        let adapter: Arc<dyn Adapter> = Arc::new(NonStreamingStub);
        let response = fake_stream_response(adapter, "stub".into(), "stub/stub".into(), vec![], vec![]).await;

        let body = response.into_body();
        let bytes = http_body_util::BodyExt::collect(body).await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let frames: Vec<&str> = text
            .split("\n\n")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        assert_eq!(frames.len(), 3, "expected exactly 3 SSE frames, got: {text:?}");
        assert!(frames[0].contains("\"content\":\"pong\""));
        assert!(frames[1].contains("finish_reason"));
        assert_eq!(frames[2], "data: [DONE]");
    }
}
