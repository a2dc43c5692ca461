//! HTTP client pool for outbound provider connections.
//!
//! Maintains one configured `reqwest::Client` per distinct combination of
//! base URL, proxy, and TLS verification setting, so providers that share
//! none of those don't share a connection pool, while identical
//! configurations reuse pooled connections instead of paying DNS/TLS setup
//! on every request.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::time::Duration;

/// Key identifying a distinct client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PoolKey {
    base_url: String,
    proxy: Option<String>,
    insecure_skip_verify: bool,
}

static CLIENT_POOL: Lazy<DashMap<PoolKey, reqwest::Client>> = Lazy::new(DashMap::new);

/// Retrieve (or lazily build) a shared client for `base_url` with the given
/// `proxy` and TLS verification setting.
///
/// The client is configured with:
/// - Up to 100 idle connections per host
/// - A 90-second idle timeout for persistent connections
/// - TCP keepalive to maintain long-lived connections
/// - A 30-second connection timeout
pub fn get_or_create_client(
    base_url: &str,
    proxy: Option<&str>,
    insecure_skip_verify: bool,
) -> reqwest::Client {
    let key = PoolKey {
        base_url: base_url.to_string(),
        proxy: proxy.map(str::to_string),
        insecure_skip_verify,
    };
    CLIENT_POOL
        .entry(key.clone())
        .or_insert_with(|| build_client(&key))
        .clone()
}

fn build_client(key: &PoolKey) -> reqwest::Client {
    let mut builder = reqwest::ClientBuilder::new()
        .pool_max_idle_per_host(100)
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .connect_timeout(Duration::from_secs(30))
        .danger_accept_invalid_certs(key.insecure_skip_verify);

    if let Some(proxy_url) = &key.proxy {
        match reqwest::Proxy::all(proxy_url) {
            Ok(proxy) => builder = builder.proxy(proxy),
            Err(err) => {
                log::error!("invalid proxy url {proxy_url}: {err}");
            }
        }
    }

    builder.build().expect("failed to build HTTP client")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_same_instance_for_identical_config() {
        let url = "https://api.openai.com/v1";
        let _client1 = get_or_create_client(url, None, false);
        let _client2 = get_or_create_client(url, None, false);
        assert!(CLIENT_POOL.contains_key(&PoolKey {
            base_url: url.to_string(),
            proxy: None,
            insecure_skip_verify: false,
        }));
    }

    #[test]
    fn distinguishes_by_proxy_and_tls_setting() {
        let url = "https://api.anthropic.com/v1";
        let _plain = get_or_create_client(url, None, false);
        let _insecure = get_or_create_client(url, None, true);
        let _proxied = get_or_create_client(url, Some("http://127.0.0.1:8888"), false);

        assert!(CLIENT_POOL.contains_key(&PoolKey {
            base_url: url.to_string(),
            proxy: None,
            insecure_skip_verify: false,
        }));
        assert!(CLIENT_POOL.contains_key(&PoolKey {
            base_url: url.to_string(),
            proxy: None,
            insecure_skip_verify: true,
        }));
        assert!(CLIENT_POOL.contains_key(&PoolKey {
            base_url: url.to_string(),
            proxy: Some("http://127.0.0.1:8888".to_string()),
            insecure_skip_verify: false,
        }));
    }

    #[test]
    fn multiple_base_urls_create_separate_pools() {
        let openai_url = "https://api.openai.com/v1";
        let gemini_url = "https://generativelanguage.googleapis.com/v1beta/";

        let _c1 = get_or_create_client(openai_url, None, false);
        let _c2 = get_or_create_client(gemini_url, None, false);

        assert!(CLIENT_POOL.contains_key(&PoolKey {
            base_url: openai_url.to_string(),
            proxy: None,
            insecure_skip_verify: false,
        }));
        assert!(CLIENT_POOL.contains_key(&PoolKey {
            base_url: gemini_url.to_string(),
            proxy: None,
            insecure_skip_verify: false,
        }));
    }
}
