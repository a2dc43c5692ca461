//! Configuration for the gateway.
//!
//! Loaded from a TOML file layered with `AT_`-prefixed environment
//! overrides via the [`config`] crate. Nested keys are addressed with a
//! double underscore, e.g.
//! `AT_SERVER__PORT=9000` or `AT_STORE__ENCRYPTION_KEY=...`.
//!
//! # Example
//!
//! ```no_run
//! use llmgate::config::AppConfig;
//!
//! let config = AppConfig::load("gateway.toml").expect("config");
//! println!("listening on {}:{}", config.server.host, config.server.port);
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Top-level configuration root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// `env_logger` filter string (e.g. `"info"`, `"llmgate=debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Statically declared providers, keyed by `ProviderConfig::key`.
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    /// Caller-facing gateway auth settings.
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Credential store backend settings.
    pub store: StoreConfig,
    /// HTTP server bind settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Telemetry/observability settings.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// One statically configured upstream provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique provider key, used as the left half of the
    /// `provider_key/model` routing identifier.
    pub key: String,
    /// Upstream wire protocol family.
    pub kind: ProviderKind,
    /// Provider API key. May be `enc:`-prefixed ciphertext once persisted
    /// through the store; plaintext here is only expected at first load.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Base URL override (defaults to the provider's public endpoint).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Default model used when a request does not name one explicitly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Advertised model set for `/v1/models`.
    #[serde(default)]
    pub models: Vec<String>,
    /// Extra headers forwarded verbatim on every upstream request. Values
    /// may be `enc:`-fenced the same as `api_key`.
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
    /// Non-bearer auth scheme, e.g. `"copilot"` for GitHub device flow.
    #[serde(default)]
    pub auth_type: String,
    /// Outbound proxy URL (HTTP/HTTPS/SOCKS5).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// Skip TLS certificate verification for this provider's client.
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

/// Upstream wire protocol family a [`ProviderConfig`] speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI-compatible chat/completions wire format.
    Openai,
    /// Native Anthropic Messages API.
    Anthropic,
    /// Google Vertex AI (OpenAI-compatible wire, cloud-default auth).
    Vertex,
    /// Native Google Gemini `generateContent` API.
    Gemini,
}

/// Caller-authorization settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Statically configured bearer tokens. Empty + no store tokens means
    /// the gateway runs in open (unauthenticated) mode.
    #[serde(default)]
    pub auth_tokens: Vec<String>,
}

/// Credential store backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreConfig {
    /// File-backed SQLite store.
    Sqlite {
        /// Path to the SQLite database file.
        path: String,
        /// Passphrase used to derive the at-rest encryption key. `None`
        /// stores secrets in plaintext.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        encryption_key: Option<String>,
    },
    /// Postgres-backed store for cluster deployments.
    Postgres {
        /// `postgres://` connection string.
        url: String,
        /// Passphrase used to derive the at-rest encryption key.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        encryption_key: Option<String>,
    },
    /// In-process store, never encrypts. Intended for tests.
    Memory,
}

/// HTTP server bind and routing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Path prefix under which all routes are mounted (e.g. `"/"`).
    pub base_path: String,
    /// Bearer token required for the `/api/v1/*` admin surface, separate
    /// from the caller-facing `gateway.auth_tokens`.
    pub admin_token: Option<String>,
    /// Header name a trusted upstream proxy uses to assert caller identity.
    pub user_header: Option<String>,
    /// Whether to trust `user_header` without independently verifying a
    /// bearer token (forward-auth mode).
    pub forward_auth: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            base_path: "/".to_string(),
            admin_token: None,
            user_header: None,
            forward_auth: false,
        }
    }
}

/// Observability settings. Billing/metrics are out of scope for this
/// gateway, but structured logging configuration still lives here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Emit one structured log line per completed request.
    #[serde(default)]
    pub request_logging: bool,
}

/// Errors produced while loading or deserializing [`AppConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The underlying `config` crate failed to build or deserialize the
    /// layered sources.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

impl AppConfig {
    /// Load configuration from `path` (TOML), layered with environment
    /// variables prefixed `AT_` (double underscore separates nested keys).
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let raw = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("AT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let parsed: AppConfig = raw.try_deserialize()?;
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_server_config_binds_all_interfaces() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 8080);
        assert!(!server.forward_auth);
    }

    #[test]
    fn default_log_level_is_info() {
        assert_eq!(default_log_level(), "info");
    }
}
