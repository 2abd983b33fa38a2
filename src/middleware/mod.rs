//! The ordered middleware chain.
//!
//! # Data Flow
//! ```text
//! RequestContext
//!     → restriction.rs     (IP allow-list / CORS, preflight)
//!     → rate_limit.rs      (fixed window per route + client IP)
//!     → cache.rs (read)    (short-circuit on a fresh entry)
//!     → proxy/origin.rs    (call the origin, fill ctx.result)
//!     → partial_query.rs   (JSON field mask)
//!     → image_transform.rs (resize / adjust / re-encode)
//!     → cache.rs (write)   (store the final result)
//! ```
//!
//! # Design Decisions
//! - Stages are trait objects built once per engine, not per request
//! - A stage either passes control on, answers the request itself, or fails;
//!   the first answer or failure ends the chain
//! - Stages disabled for a route return `Flow::Next` immediately

pub mod cache;
pub mod image_transform;
pub mod partial_query;
pub mod rate_limit;
pub mod restriction;

use std::sync::Arc;

use async_trait::async_trait;
use axum::response::Response;
use tracing::debug;

use crate::proxy::context::RequestContext;
use crate::proxy::error::ProxyError;

/// What the chain does after a stage.
pub enum Flow {
    Next,
    Respond(Response),
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, ProxyError>;
}

/// Stages in execution order.
#[derive(Clone)]
pub struct Chain {
    stages: Vec<Arc<dyn Stage>>,
}

impl Chain {
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self { stages }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage until one answers or fails.
    ///
    /// `Ok(None)` means the chain completed and the response is `ctx.result`.
    pub async fn run(&self, ctx: &mut RequestContext) -> Result<Option<Response>, ProxyError> {
        for stage in &self.stages {
            match stage.run(ctx).await {
                Ok(Flow::Next) => {}
                Ok(Flow::Respond(response)) => {
                    debug!(stage = stage.name(), route = %ctx.route.id, "Stage answered request");
                    return Ok(Some(response));
                }
                Err(e) => {
                    debug!(stage = stage.name(), route = %ctx.route.id, error = %e, "Stage failed");
                    return Err(e);
                }
            }
        }
        Ok(None)
    }
}
