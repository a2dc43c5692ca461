//! Per-request credential acquisition for provider adapters.
//!
//! Grounded in `stencila-stencila/rust/auth/src/auth.rs`'s `AuthCredential`
//! trait and its `OAuthToken` auto-refreshing cache: a read-locked fast path
//! for the common case, a write-locked slow path that double-checks before
//! doing any I/O, and a single-flight refresh that concurrent callers wait
//! out instead of racing.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::llmgate::error::GatewayError;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Buffer subtracted from an expiry so a token is refreshed slightly before
/// it actually lapses.
const EXPIRY_BUFFER_MS: i64 = 5 * 60 * 1000;

/// Abstracts how an adapter obtains the bearer value it sets on outgoing
/// requests.
#[async_trait::async_trait]
pub trait TokenSource: Send + Sync {
    /// Return the current token, refreshing it first if necessary.
    async fn token(&self) -> Result<String, GatewayError>;
}

/// Returns a fixed, never-refreshed API key.
pub struct StaticSource {
    key: String,
}

impl StaticSource {
    /// Wrap a configured API key verbatim.
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

#[async_trait::async_trait]
impl TokenSource for StaticSource {
    async fn token(&self) -> Result<String, GatewayError> {
        Ok(self.key.clone())
    }
}

/// Pluggable issuer of a cloud access token, injected so tests can swap in a
/// fake without minting real service-account JWTs.
#[async_trait::async_trait]
pub trait CloudCredentialSource: Send + Sync {
    /// Obtain a fresh access token scoped for `scope`. Implementations are
    /// expected to cache internally if the underlying flow has its own
    /// expiry; `CloudDefaultSource` calls this once per request regardless.
    async fn fetch_token(&self, scope: &str) -> Result<String, GatewayError>;
}

/// A Google service account, as found in a downloaded JSON key file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    /// Email identifying the service account; the JWT `iss`/`sub` claim.
    pub client_email: String,
    /// PEM-encoded RSA private key used to sign the JWT.
    pub private_key: String,
}

const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

#[derive(Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    scope: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Mints a Google OAuth2 access token from a service account key, one JWT
/// exchange per call. Grounded on `dfft546-gproxy`'s
/// `provider/vertex/mod.rs::fetch_access_token`.
pub struct GoogleServiceAccountSource {
    key: ServiceAccountKey,
    http: reqwest::Client,
}

impl GoogleServiceAccountSource {
    /// Build a source from an already-parsed service account key.
    pub fn new(key: ServiceAccountKey, http: reqwest::Client) -> Self {
        Self { key, http }
    }
}

#[async_trait::async_trait]
impl CloudCredentialSource for GoogleServiceAccountSource {
    async fn fetch_token(&self, scope: &str) -> Result<String, GatewayError> {
        let now = Utc::now().timestamp();
        let claims = JwtClaims {
            iss: &self.key.client_email,
            sub: &self.key.client_email,
            aud: GOOGLE_TOKEN_URI,
            scope,
            iat: now,
            exp: now + 3600,
        };
        let header = Header::new(Algorithm::RS256);
        let encoding_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|e| GatewayError::Internal(format!("invalid service account key: {e}")))?;
        let jwt = jsonwebtoken::encode(&header, &claims, &encoding_key)
            .map_err(|e| GatewayError::Internal(format!("jwt signing failed: {e}")))?;

        let params = [
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", jwt.as_str()),
        ];
        let resp = self
            .http
            .post(GOOGLE_TOKEN_URI)
            .form(&params)
            .send()
            .await
            .map_err(|e| GatewayError::UpstreamUnavailable(format!("token exchange: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::UpstreamBadGateway(format!(
                "token exchange failed ({status}): {body}"
            )));
        }
        let parsed: TokenResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::Internal(format!("token exchange response: {e}")))?;
        Ok(parsed.access_token)
    }
}

/// OAuth2 scope Vertex adapters request.
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Cloud-default token source: calls its injected [`CloudCredentialSource`]
/// once per request. Never caches beyond the source's own expiry.
pub struct CloudDefaultSource {
    inner: Arc<dyn CloudCredentialSource>,
    scope: String,
}

impl CloudDefaultSource {
    /// Wrap a credential source for the given OAuth scope.
    pub fn new(inner: Arc<dyn CloudCredentialSource>, scope: impl Into<String>) -> Self {
        Self {
            inner,
            scope: scope.into(),
        }
    }
}

#[async_trait::async_trait]
impl TokenSource for CloudDefaultSource {
    async fn token(&self) -> Result<String, GatewayError> {
        self.inner.fetch_token(&self.scope).await
    }
}

/// A cached, refreshable credential: what the `Device-Flow-Cached` token
/// source holds between exchanges.
#[derive(Debug, Clone)]
struct CachedJwt {
    jwt: String,
    expires_at_ms: i64,
}

struct RefreshState {
    cached: Option<CachedJwt>,
    refreshing: bool,
}

/// Exchanges a long-lived OAuth token for a short-lived JWT and caches it
/// until `expires_at - 5min`, serializing concurrent refreshes under a
/// single-flight lock. Grounded on
/// `stencila-stencila/rust/auth/src/auth.rs::OAuthToken::get_token`.
pub struct DeviceFlowCachedSource {
    oauth_token: String,
    exchange_url: String,
    http: reqwest::Client,
    state: RwLock<RefreshState>,
}

#[derive(Deserialize)]
struct ExchangeResponse {
    token: String,
    expires_at: i64,
}

impl DeviceFlowCachedSource {
    /// Wrap a long-lived GitHub Copilot OAuth token and the endpoint used to
    /// exchange it for short-lived JWTs.
    pub fn new(oauth_token: impl Into<String>, exchange_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            oauth_token: oauth_token.into(),
            exchange_url: exchange_url.into(),
            http,
            state: RwLock::new(RefreshState {
                cached: None,
                refreshing: false,
            }),
        }
    }

    fn is_expired(cached: &CachedJwt) -> bool {
        Utc::now().timestamp_millis() + EXPIRY_BUFFER_MS >= cached.expires_at_ms
    }

    async fn exchange(&self) -> Result<CachedJwt, GatewayError> {
        let resp = self
            .http
            .get(&self.exchange_url)
            .header("Authorization", format!("token {}", self.oauth_token))
            .send()
            .await
            .map_err(|e| GatewayError::UpstreamUnavailable(format!("jwt exchange: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            return Err(GatewayError::UpstreamBadGateway(format!(
                "jwt exchange failed: {status}"
            )));
        }
        let parsed: ExchangeResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::Internal(format!("jwt exchange response: {e}")))?;
        Ok(CachedJwt {
            jwt: parsed.token,
            expires_at_ms: parsed.expires_at * 1000,
        })
    }
}

#[async_trait::async_trait]
impl TokenSource for DeviceFlowCachedSource {
    async fn token(&self) -> Result<String, GatewayError> {
        loop {
            {
                let state = self.state.read().await;
                if !state.refreshing {
                    if let Some(cached) = &state.cached {
                        if !Self::is_expired(cached) {
                            return Ok(cached.jwt.clone());
                        }
                    }
                } else {
                    drop(state);
                    tokio::task::yield_now().await;
                    continue;
                }
            }

            let mut state = self.state.write().await;
            if let Some(cached) = &state.cached {
                if !Self::is_expired(cached) {
                    return Ok(cached.jwt.clone());
                }
            }
            if state.refreshing {
                drop(state);
                tokio::task::yield_now().await;
                continue;
            }
            state.refreshing = true;
            drop(state);

            let result = self.exchange().await;
            let mut state = self.state.write().await;
            state.refreshing = false;
            match result {
                Ok(cached) => {
                    state.cached = Some(cached.clone());
                    return Ok(cached.jwt);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_source_returns_configured_key() {
        let source = StaticSource::new("sk-abc");
        assert_eq!(source.token().await.unwrap(), "sk-abc");
    }

    struct FixedCredentialSource(&'static str);

    #[async_trait::async_trait]
    impl CloudCredentialSource for FixedCredentialSource {
        async fn fetch_token(&self, _scope: &str) -> Result<String, GatewayError> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn cloud_default_delegates_every_call() {
        let source = CloudDefaultSource::new(
            Arc::new(FixedCredentialSource("ya29.fresh-token")),
            CLOUD_PLATFORM_SCOPE,
        );
        assert_eq!(source.token().await.unwrap(), "ya29.fresh-token");
        assert_eq!(source.token().await.unwrap(), "ya29.fresh-token");
    }

    #[test]
    fn expiry_buffer_triggers_before_literal_expiry() {
        let cached = CachedJwt {
            jwt: "x".into(),
            expires_at_ms: Utc::now().timestamp_millis() + EXPIRY_BUFFER_MS - 1,
        };
        assert!(DeviceFlowCachedSource::is_expired(&cached));
    }
}
