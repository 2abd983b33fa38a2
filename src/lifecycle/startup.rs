//! Startup orchestration.
//!
//! Subsystems are built in dependency order and any failure is fatal:
//! stores first, then the engine, then the monitor registry. Listeners are
//! bound by the caller once the state exists.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::catalog::{CatalogError, MemoryRouteStore, RouteStore};
use crate::config::{ProxyConfig, StoreBackend};
use crate::http::AppState;
use crate::kv::{KeyValueStore, KvError, MemoryStore, RedisStore};
use crate::monitor::{MonitorLogStore, MonitorRegistry};
use crate::proxy::{OriginClient, Proxy, ProxySettings};
use crate::secrets::{PlaintextCipher, SecretCipher};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("catalog: {0}")]
    Catalog(#[from] CatalogError),

    #[error("key-value store: {0}")]
    Store(#[from] KvError),

    #[error("origin client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("configuration: {0}")]
    Config(String),
}

/// Connect the configured key-value backend.
pub async fn connect_kv(config: &ProxyConfig) -> Result<Arc<dyn KeyValueStore>, StartupError> {
    match config.store.backend {
        StoreBackend::Memory => {
            tracing::info!("Using in-memory key-value store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Redis => {
            let url = config
                .store
                .redis_url
                .as_deref()
                .ok_or_else(|| StartupError::Config("store.redis_url is not set".into()))?;
            Ok(Arc::new(RedisStore::connect(url).await?))
        }
    }
}

/// Assemble the engine and its collaborators.
pub fn build_state(
    config: &ProxyConfig,
    routes: Arc<MemoryRouteStore>,
    kv: Arc<dyn KeyValueStore>,
) -> Result<AppState, StartupError> {
    let routes: Arc<dyn RouteStore> = routes;
    let cipher: Arc<dyn SecretCipher> = Arc::new(PlaintextCipher);
    let origin = OriginClient::new(
        Duration::from_secs(config.timeouts.connect_secs),
        Duration::from_secs(config.timeouts.request_secs),
    )?;

    let monitors = Arc::new(MonitorRegistry::new(
        routes.clone(),
        cipher.clone(),
        origin.probe_client(),
        Arc::new(MonitorLogStore::new()),
    ));
    let proxy = Arc::new(Proxy::new(
        routes.clone(),
        kv,
        cipher,
        origin,
        ProxySettings::from_config(&config.proxy),
    ));
    tracing::info!(stages = ?proxy.stage_names(), "Engine ready");

    Ok(AppState {
        proxy,
        routes,
        monitors,
        admin: config.admin.clone(),
    })
}
