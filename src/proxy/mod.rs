//! The forwarding engine.
//!
//! # Data Flow
//! ```text
//! inbound request (under /api/v1)
//!     → resolver.rs (route id → route + project secrets; forwarding policy)
//!     → method check, body buffering
//!     → RequestContext (context.rs)
//!     → middleware::Chain (restriction … origin.rs … cache write)
//!     → http/response.rs relay
//!     → stats.rs (success/fail counters, moving average latency)
//! ```
//!
//! # Design Decisions
//! - One `Proxy` per process, shared by reference; all per-request state
//!   lives in the context and is dropped with it
//! - Errors become responses here and nowhere else
//! - Statistics are recorded after the response is assembled, from the
//!   origin outcome only

pub mod builder;
pub mod context;
pub mod error;
pub mod origin;
pub mod resolver;
pub mod stats;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

use crate::catalog::RouteStore;
use crate::config::EngineConfig;
use crate::http::request::{client_ip, request_id};
use crate::http::response::{apply_headers, relay};
use crate::kv::KeyValueStore;
use crate::middleware::cache::{CacheReadStage, CacheWriteStage};
use crate::middleware::image_transform::{ImageTransformStage, PARAM_KEYS};
use crate::middleware::partial_query::{FieldMask, PartialQueryStage};
use crate::middleware::rate_limit::RateLimitStage;
use crate::middleware::restriction::RestrictionStage;
use crate::middleware::{Chain, Stage};
use crate::observability::metrics;
use crate::secrets::{decrypt_secrets, SecretCipher};

pub use context::{OriginOutcome, ProxyResult, RequestContext, ResultBody};
pub use error::ProxyError;
pub use origin::OriginClient;
pub use resolver::PROXY_PREFIX;

/// Engine settings derived from configuration.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub filter_param: String,
    pub rate_limit_status: StatusCode,
    pub trusted_proxies: Vec<IpAddr>,
    pub max_body_size: usize,
}

impl ProxySettings {
    /// Values are assumed validated (see `config::validate_config`).
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            filter_param: config.filter_param.clone(),
            rate_limit_status: StatusCode::from_u16(config.rate_limit_status)
                .unwrap_or(StatusCode::SERVICE_UNAVAILABLE),
            trusted_proxies: config
                .trusted_proxies
                .iter()
                .filter_map(|p| p.parse().ok())
                .collect(),
            max_body_size: config.max_body_size,
        }
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

pub struct Proxy {
    routes: Arc<dyn RouteStore>,
    cipher: Arc<dyn SecretCipher>,
    chain: Chain,
    settings: ProxySettings,
}

impl Proxy {
    pub fn new(
        routes: Arc<dyn RouteStore>,
        kv: Arc<dyn KeyValueStore>,
        cipher: Arc<dyn SecretCipher>,
        origin: OriginClient,
        settings: ProxySettings,
    ) -> Self {
        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(RestrictionStage),
            Arc::new(RateLimitStage::new(kv.clone(), settings.rate_limit_status)),
            Arc::new(CacheReadStage::new(kv.clone())),
            Arc::new(origin::OriginStage::new(origin)),
            Arc::new(PartialQueryStage),
            Arc::new(ImageTransformStage),
            Arc::new(CacheWriteStage::new(kv)),
        ];
        Self {
            routes,
            cipher,
            chain: Chain::new(stages),
            settings,
        }
    }

    pub fn settings(&self) -> &ProxySettings {
        &self.settings
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.chain.names()
    }

    /// Serve one request received from `peer`.
    pub async fn handle(&self, request: Request<Body>, peer: SocketAddr) -> Response {
        let started = Instant::now();
        let request_id = request_id(request.headers()).to_string();
        let path = request.uri().path().to_string();

        let mut ctx = match self.prepare(request, peer, started).await {
            Ok(ctx) => ctx,
            Err(e) => {
                log_error(&request_id, "-", &path, &e);
                metrics::record_rejection(e.reason());
                let response = e.into_response();
                metrics::record_request("-", response.status().as_u16(), started);
                return response;
            }
        };

        let mut response = match self.chain.run(&mut ctx).await {
            Ok(Some(response)) => response,
            Ok(None) => match ctx.result.take() {
                Some(result) => relay(result),
                None => {
                    ProxyError::Configuration("chain completed without a result".into())
                        .into_response()
                }
            },
            Err(e) => {
                log_error(&request_id, &ctx.route.id, &path, &e);
                e.into_response()
            }
        };
        apply_headers(&mut response, &ctx.response_headers);

        stats::record(self.routes.as_ref(), &ctx.route.id, ctx.outcome).await;
        metrics::record_request(&ctx.route.id, response.status().as_u16(), started);
        response
    }

    async fn prepare(
        &self,
        request: Request<Body>,
        peer: SocketAddr,
        started: Instant,
    ) -> Result<RequestContext, ProxyError> {
        let (parts, body) = request.into_parts();
        let (resolved, remaining_path) = resolver::resolve(self.routes.as_ref(), parts.uri.path()).await?;
        let route = resolved.route;

        if parts.method != Method::OPTIONS && !route.method.matches(&parts.method) {
            return Err(ProxyError::MethodNotAllowed);
        }

        let declared = parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > self.settings.max_body_size) {
            return Err(ProxyError::PayloadTooLarge);
        }
        let body = axum::body::to_bytes(body, self.settings.max_body_size)
            .await
            .map_err(|_| ProxyError::PayloadTooLarge)?;

        let client_ip = client_ip(&parts.headers, peer.ip(), &self.settings.trusted_proxies);
        let secrets = decrypt_secrets(self.cipher.as_ref(), &resolved.secrets)?;
        let (query, headers) = resolver::inbound_data(&route, &parts.uri, parts.headers);

        let mut ctx = RequestContext {
            route,
            method: parts.method,
            uri: parts.uri,
            remaining_path,
            query,
            headers,
            body,
            client_ip,
            secrets,
            filter: None,
            control_params: Vec::new(),
            response_headers: Default::default(),
            cache_key: None,
            result: None,
            outcome: None,
            started,
        };

        if ctx.route.partial_query.enabled {
            ctx.filter = self.select_filter(&ctx);
            ctx.control_params.push(self.settings.filter_param.clone());
        }
        if ctx.route.image_transformation.enabled {
            ctx.control_params
                .extend(PARAM_KEYS.iter().map(|k| k.to_string()));
        }
        Ok(ctx)
    }

    /// The caller's mask wins over the route default; a malformed caller
    /// mask disables filtering for the request.
    fn select_filter(&self, ctx: &RequestContext) -> Option<FieldMask> {
        match ctx.query_value(&self.settings.filter_param) {
            Some(expr) => match FieldMask::parse(expr) {
                Ok(mask) => Some(mask),
                Err(e) => {
                    warn!(route = %ctx.route.id, error = %e, "Ignoring malformed filter");
                    None
                }
            },
            None => ctx.route.partial_query.default_filter.clone(),
        }
    }
}

fn log_error(request_id: &str, route: &str, path: &str, e: &ProxyError) {
    if e.status().is_server_error() {
        error!(request_id = %request_id, route = %route, path = %path, error = %e, "Request failed");
    } else {
        warn!(
            request_id = %request_id,
            route = %route,
            path = %path,
            status = e.status().as_u16(),
            reason = e.reason(),
            "Request rejected"
        );
    }
}
