//! Drives the real axum router over a mocked upstream, exercising the
//! sync chat-completion path end to end instead of unit-testing the
//! handler in isolation.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use llmgate::llmgate::cluster::LocalCluster;
use llmgate::llmgate::config::{AppConfig, GatewayConfig, ProviderConfig, ProviderKind, ServerConfig, StoreConfig, TelemetryConfig};
use llmgate::llmgate::registry::ProviderRegistry;
use llmgate::llmgate::server::{router, AppState};
use llmgate::llmgate::store::memory::InMemoryStore;
use llmgate::Store;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn openai_provider(base_url: &str) -> ProviderConfig {
    ProviderConfig {
        key: "openai".into(),
        kind: ProviderKind::Openai,
        api_key: Some("sk-test".into()),
        base_url: Some(base_url.to_string()),
        model: Some("gpt-4o".into()),
        models: vec![],
        extra_headers: HashMap::new(),
        auth_type: String::new(),
        proxy: None,
        insecure_skip_verify: false,
    }
}

async fn build_router(providers: &[ProviderConfig]) -> axum::Router {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let registry = Arc::new(ProviderRegistry::bootstrap(providers, &store).await.unwrap());
    let config = AppConfig {
        log_level: "info".into(),
        providers: HashMap::new(),
        gateway: GatewayConfig::default(),
        store: StoreConfig::Memory,
        server: ServerConfig::default(),
        telemetry: TelemetryConfig::default(),
    };
    let state = AppState::new(&config, registry, store, Arc::new(LocalCluster));
    router(state)
}

#[tokio::test]
async fn sync_chat_completion_round_trips_through_a_mocked_upstream() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {"content": "pong"},
                "finish_reason": "stop",
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4},
        })))
        .mount(&mock)
        .await;

    let app = build_router(&[openai_provider(&mock.uri())]).await;

    let request = Request::post("/gateway/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "model": "openai/gpt-4o",
                "messages": [{"role": "user", "content": "ping"}],
            })
            .to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let parsed: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["choices"][0]["message"]["content"], "pong");
    assert_eq!(parsed["choices"][0]["finish_reason"], "stop");
    assert_eq!(parsed["usage"]["total_tokens"], 4);
}

#[tokio::test]
async fn unscoped_request_to_an_unknown_provider_returns_not_found() {
    let app = build_router(&[]).await;

    let request = Request::post("/gateway/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "model": "openai/gpt-4o",
                "messages": [{"role": "user", "content": "ping"}],
            })
            .to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upstream_500_surfaces_as_a_bad_gateway() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&mock)
        .await;

    let app = build_router(&[openai_provider(&mock.uri())]).await;

    let request = Request::post("/gateway/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "model": "openai/gpt-4o",
                "messages": [{"role": "user", "content": "ping"}],
            })
            .to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}
