//! GitHub OAuth device-flow coordinator for Copilot-backed providers.
//!
//! A process-singleton table owned by the server and passed by reference to
//! the two HTTP handlers that consume it (`/providers/device-auth` and
//! `/providers/device-auth-status`). One pending flow per provider key,
//! mutex-guarded, matching the "serialize under a mutex" idiom in
//! `stencila-stencila/rust/auth/src/pkce.rs`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::llmgate::error::GatewayError;
use crate::llmgate::registry::ProviderRegistry;
use crate::llmgate::store::Store;

const DEVICE_CODE_URL: &str = "https://github.com/login/device/code";
const ACCESS_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
/// Reused from the editor plugins that ship this same client id — it is
/// documented behaviour of the GitHub device-flow endpoint, not a secret.
const COPILOT_CLIENT_ID: &str = "Iv1.b507a08c87ecfe98";
const SCOPE: &str = "read:user";
const GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Current state of a provider's device-authorization flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    /// No flow has ever run, or the flow was cleaned up after completion.
    None,
    /// A device code was issued and polling is underway.
    Pending,
    /// Polling succeeded; the provider's `api_key` was updated.
    Authorized,
    /// `expires_in` elapsed with no success.
    Expired,
    /// GitHub reported a terminal error (`expired_token`/`access_denied`) or
    /// a transport failure occurred.
    Error,
}

/// Snapshot returned by the status-poll endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct FlowState {
    /// Current status.
    pub status: FlowStatus,
    /// Present only when `status == Error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response from the device-code initiation POST.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceAuthResponse {
    /// Code the user types in at `verification_uri`.
    pub user_code: String,
    /// URL the user visits to authorize the device.
    pub verification_uri: String,
    /// Seconds until the device code itself expires.
    pub expires_in: u64,
    /// Minimum seconds to wait between polls.
    pub interval: u64,
}

#[derive(Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    expires_in: u64,
    interval: u64,
}

#[derive(Deserialize)]
struct AccessTokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: String,
}

struct Entry {
    state: FlowState,
}

/// Owns every provider key's device-flow state. One instance is created by
/// the server and shared (via `Arc`) between the initiate/status handlers
/// and the background poll tasks they spawn.
pub struct DeviceFlowCoordinator {
    http: reqwest::Client,
    flows: Mutex<HashMap<String, Entry>>,
}

impl Default for DeviceFlowCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceFlowCoordinator {
    /// Construct an empty coordinator.
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            flows: Mutex::new(HashMap::new()),
        }
    }

    /// Current status for `provider_key`, defaulting to `None` if no flow
    /// was ever started.
    pub async fn status(&self, provider_key: &str) -> FlowState {
        let flows = self.flows.lock().await;
        flows
            .get(provider_key)
            .map(|e| e.state.clone())
            .unwrap_or(FlowState {
                status: FlowStatus::None,
                error: None,
            })
    }

    /// Start a device flow for `provider_key`. Rejects with `Conflict` if a
    /// flow is already pending for that key. Spawns the background poller
    /// and returns the device-code response the caller shows to the user.
    pub async fn initiate(
        self: &Arc<Self>,
        provider_key: &str,
        store: Arc<dyn Store>,
        registry: Arc<ProviderRegistry>,
    ) -> Result<DeviceAuthResponse, GatewayError> {
        {
            let mut flows = self.flows.lock().await;
            if let Some(entry) = flows.get(provider_key) {
                if entry.state.status == FlowStatus::Pending {
                    return Err(GatewayError::Conflict(format!(
                        "device flow already pending for {provider_key}"
                    )));
                }
            }
            flows.insert(
                provider_key.to_string(),
                Entry {
                    state: FlowState {
                        status: FlowStatus::Pending,
                        error: None,
                    },
                },
            );
        }

        let resp = self
            .http
            .post(DEVICE_CODE_URL)
            .header("Accept", "application/json")
            .form(&[("client_id", COPILOT_CLIENT_ID), ("scope", SCOPE)])
            .send()
            .await
            .map_err(|e| GatewayError::UpstreamUnavailable(format!("device code request: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            self.set_error(provider_key, format!("device code request failed: {status}"))
                .await;
            return Err(GatewayError::UpstreamBadGateway(format!(
                "device code request failed: {status}"
            )));
        }
        let parsed: DeviceCodeResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::Internal(format!("device code response: {e}")))?;

        let coordinator = Arc::clone(self);
        let key = provider_key.to_string();
        let device_code = parsed.device_code.clone();
        let interval = parsed.interval.max(5);
        let expires_in = parsed.expires_in;
        tokio::spawn(async move {
            coordinator
                .poll_until_complete(key, device_code, interval, expires_in, store, registry)
                .await;
        });

        Ok(DeviceAuthResponse {
            user_code: parsed.user_code,
            verification_uri: parsed.verification_uri,
            expires_in: parsed.expires_in,
            interval: parsed.interval,
        })
    }

    async fn set_error(&self, provider_key: &str, message: String) {
        let mut flows = self.flows.lock().await;
        flows.insert(
            provider_key.to_string(),
            Entry {
                state: FlowState {
                    status: FlowStatus::Error,
                    error: Some(message),
                },
            },
        );
    }

    async fn poll_until_complete(
        self: Arc<Self>,
        provider_key: String,
        device_code: String,
        interval: u64,
        expires_in: u64,
        store: Arc<dyn Store>,
        registry: Arc<ProviderRegistry>,
    ) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(expires_in);
        let mut wait = Duration::from_secs(interval);

        loop {
            tokio::time::sleep(wait).await;
            if tokio::time::Instant::now() >= deadline {
                let mut flows = self.flows.lock().await;
                flows.insert(
                    provider_key.clone(),
                    Entry {
                        state: FlowState {
                            status: FlowStatus::Expired,
                            error: None,
                        },
                    },
                );
                return;
            }

            let resp = match self
                .http
                .post(ACCESS_TOKEN_URL)
                .header("Accept", "application/json")
                .form(&[
                    ("client_id", COPILOT_CLIENT_ID),
                    ("device_code", device_code.as_str()),
                    ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
                ])
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    self.set_error(&provider_key, format!("poll failed: {e}")).await;
                    return;
                }
            };

            let parsed: AccessTokenResponse = match resp.json().await {
                Ok(p) => p,
                Err(e) => {
                    self.set_error(&provider_key, format!("poll response: {e}")).await;
                    return;
                }
            };

            match parsed.error.as_str() {
                "" => {
                    let Some(token) = parsed.access_token else {
                        self.set_error(&provider_key, "missing access_token".into()).await;
                        return;
                    };
                    if let Err(e) = self.complete(&provider_key, token, store, registry).await {
                        self.set_error(&provider_key, e.to_string()).await;
                        return;
                    }
                    self.schedule_cleanup(provider_key);
                    return;
                }
                "authorization_pending" => continue,
                "slow_down" => {
                    wait += Duration::from_secs(5);
                    continue;
                }
                "expired_token" | "access_denied" => {
                    let mut flows = self.flows.lock().await;
                    flows.insert(
                        provider_key.clone(),
                        Entry {
                            state: FlowState {
                                status: if parsed.error == "expired_token" {
                                    FlowStatus::Expired
                                } else {
                                    FlowStatus::Error
                                },
                                error: Some(parsed.error.clone()),
                            },
                        },
                    );
                    return;
                }
                other => {
                    self.set_error(&provider_key, format!("unexpected device-flow error: {other}"))
                        .await;
                    return;
                }
            }
        }
    }

    async fn complete(
        &self,
        provider_key: &str,
        oauth_token: String,
        store: Arc<dyn Store>,
        registry: Arc<ProviderRegistry>,
    ) -> Result<(), GatewayError> {
        let mut record = store
            .get_provider(provider_key)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("provider {provider_key}")))?;
        record.config.api_key = Some(oauth_token);
        record.updated_at = chrono::Utc::now();
        registry.reload(&record.config).await?;
        store.put_provider(record).await?;

        let mut flows = self.flows.lock().await;
        flows.insert(
            provider_key.to_string(),
            Entry {
                state: FlowState {
                    status: FlowStatus::Authorized,
                    error: None,
                },
            },
        );
        Ok(())
    }

    fn schedule_cleanup(self: Arc<Self>, provider_key: String) {
        tokio::spawn(async move {
            tokio::time::sleep(GRACE_PERIOD).await;
            let mut flows = self.flows.lock().await;
            flows.remove(&provider_key);
        });
    }
}
