//! Diode proxy server.
//!
//! ```text
//!   client ──▶ /api/v1/{route}/... ──▶ restriction ─▶ rate limit ─▶ cache read
//!                                                                      │
//!   client ◀── relay ◀── cache write ◀── image ◀── partial query ◀── origin
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use diode_proxy::catalog::{load_catalog, MemoryRouteStore};
use diode_proxy::config::{load_config, CatalogWatcher, ProxyConfig};
use diode_proxy::lifecycle::{build_state, connect_kv, wait_for_signal, Shutdown};
use diode_proxy::monitor::MonitorRegistry;
use diode_proxy::observability::{logging, metrics};
use diode_proxy::HttpServer;

#[derive(Parser, Debug)]
#[command(name = "diode-proxy", version, about = "API route forwarding proxy")]
struct Args {
    /// Path to the proxy configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Catalog file; overrides `catalog.path`
    #[arg(long)]
    catalog: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(path) = &args.catalog {
        config.catalog.path = path.display().to_string();
    }

    logging::init_tracing(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "diode-proxy starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let catalog_path = PathBuf::from(&config.catalog.path);
    let catalog = load_catalog(&catalog_path)?;
    let routes = Arc::new(MemoryRouteStore::from_catalog(catalog));
    let kv = connect_kv(&config).await?;
    let state = build_state(&config, routes.clone(), kv)?;

    state.monitors.start_all().await?;

    // kept alive for the lifetime of the process
    let _watcher = if config.catalog.watch {
        let (watcher, mut updates) = CatalogWatcher::new(&catalog_path);
        let handle = watcher.run()?;
        let routes = routes.clone();
        let monitors = state.monitors.clone();
        tokio::spawn(async move {
            while let Some(catalog) = updates.recv().await {
                routes.replace_catalog(catalog);
                reschedule(&monitors).await;
            }
        });
        Some(handle)
    } else {
        None
    };

    let shutdown = Shutdown::new();
    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = HttpServer::new(&config, state.clone());
    let server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    wait_for_signal().await;
    shutdown.trigger();
    state.monitors.shutdown();

    server_task.await??;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn reschedule(monitors: &MonitorRegistry) {
    if let Err(e) = monitors.start_all().await {
        tracing::error!(error = %e, "Failed to reschedule monitors after reload");
    }
}
