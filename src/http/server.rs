//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the Axum router: the proxy surface under `/api/v1` and, when
//!   enabled, the admin API under `/admin`
//! - Wire up tower-http layers (timeout, request ID, tracing)
//! - Serve until the shutdown channel fires

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::Response,
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin;
use crate::catalog::RouteStore;
use crate::config::{AdminConfig, ProxyConfig};
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::monitor::MonitorRegistry;
use crate::proxy::{Proxy, PROXY_PREFIX};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<Proxy>,
    pub routes: Arc<dyn RouteStore>,
    pub monitors: Arc<MonitorRegistry>,
    pub admin: AdminConfig,
}

/// HTTP server for the proxy.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: &ProxyConfig, state: AppState) -> Self {
        Self {
            router: Self::build_router(config, state),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        let mut router = Router::new()
            .route(PROXY_PREFIX, any(proxy_handler))
            .route(&format!("{PROXY_PREFIX}/"), any(proxy_handler))
            .route(&format!("{PROXY_PREFIX}/{{*path}}"), any(proxy_handler));

        if state.admin.enabled {
            router = router.nest("/admin", admin::router(state.clone()));
        }

        // outermost first: the ID is set before the trace span opens
        router.with_state(state).layer(
            ServiceBuilder::new()
                .layer(set_request_id_layer())
                .layer(TraceLayer::new_for_http())
                .layer(propagate_request_id_layer())
                .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
        )
    }

    /// The router without a listener, for in-process tests.
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Serve on `listener` until a value arrives on `shutdown`.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    tracing::debug!(
        method = %request.method(),
        path = %request.uri().path(),
        peer = %peer,
        "Proxying request"
    );
    state.proxy.handle(request, peer).await
}
