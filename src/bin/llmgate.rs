//! Gateway process entry point: load configuration, construct the store and
//! registry, and serve the HTTP surface.

use std::env;
use std::sync::Arc;

use llmgate::llmgate::cluster::LocalCluster;
use llmgate::llmgate::config::{AppConfig, StoreConfig};
use llmgate::llmgate::registry::ProviderRegistry;
use llmgate::llmgate::server::{router, AppState};
use llmgate::llmgate::store::memory::InMemoryStore;
use llmgate::llmgate::store::sql::SqlStore;
use llmgate::llmgate::store::Store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = env::args().nth(1).unwrap_or_else(|| "gateway.toml".to_string());
    let config = AppConfig::load(&config_path)?;

    env_logger::Builder::new().parse_filters(&config.log_level).init();

    let store: Arc<dyn Store> = match &config.store {
        StoreConfig::Memory => Arc::new(InMemoryStore::new()),
        StoreConfig::Sqlite { path, encryption_key } => {
            Arc::new(SqlStore::connect(&format!("sqlite://{path}"), encryption_key.clone()).await?)
        }
        StoreConfig::Postgres { url, encryption_key } => {
            Arc::new(SqlStore::connect(url, encryption_key.clone()).await?)
        }
    };

    let config_providers: Vec<_> = config.providers.values().cloned().collect();
    let registry = Arc::new(ProviderRegistry::bootstrap(&config_providers, &store).await?);

    let state = AppState::new(&config, registry, store, Arc::new(LocalCluster));
    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    log::info!("llmgate listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
