//! Fixed-window rate limiting backed by the shared key-value store.
//!
//! # Design Decisions
//! - One counter per route and client IP (`{route_id}:{ip}`), so limits hold
//!   across every engine instance sharing the store
//! - The window starts at the first request; its expiry is set once, when the
//!   counter is created
//! - Rejection status is configurable (503 by default, 429 optional)

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use tracing::warn;

use crate::kv::KeyValueStore;
use crate::middleware::{Flow, Stage};
use crate::observability::metrics;
use crate::proxy::context::RequestContext;
use crate::proxy::error::ProxyError;

pub struct RateLimitStage {
    store: Arc<dyn KeyValueStore>,
    status: StatusCode,
}

impl RateLimitStage {
    pub fn new(store: Arc<dyn KeyValueStore>, status: StatusCode) -> Self {
        Self { store, status }
    }
}

pub fn counter_key(route_id: &str, client: &std::net::IpAddr) -> String {
    format!("{}:{}", route_id, client)
}

#[async_trait]
impl Stage for RateLimitStage {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, ProxyError> {
        let options = &ctx.route.rate_limiting;
        if !options.enabled {
            return Ok(Flow::Next);
        }

        let key = counter_key(&ctx.route.id, &ctx.client_ip);
        let count = self.store.incr(&key).await?;
        if count == 1 {
            self.store.expire(&key, options.window_size).await?;
        }

        let limit = i64::try_from(options.max_requests).unwrap_or(i64::MAX);
        if count > limit {
            warn!(
                route = %ctx.route.id,
                client = %ctx.client_ip,
                count,
                limit = options.max_requests,
                "Rate limit exceeded"
            );
            metrics::record_rejection("rate_limit");
            return Err(ProxyError::RateLimited {
                status: self.status,
            });
        }

        Ok(Flow::Next)
    }
}
