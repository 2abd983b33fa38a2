//! Per-request state threaded through the middleware chain.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use bytes::Bytes;

use crate::catalog::{Pairs, Route};
use crate::middleware::partial_query::FieldMask;
use crate::proxy::error::ProxyError;

/// What happened when the origin was called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginOutcome {
    /// Any HTTP response; `elapsed_ms` runs from request start to response head.
    Success { elapsed_ms: u64 },
    /// Transport failure, no response.
    Failure,
}

/// Body of a result, streamed from the origin until a stage needs it whole.
pub enum ResultBody {
    Stream(Body),
    Buffered(Bytes),
}

/// The response being assembled for the caller.
pub struct ProxyResult {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResultBody,
}

impl ProxyResult {
    pub fn buffered(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body: ResultBody::Buffered(body),
        }
    }

    /// Materialize the body, collecting the stream on first use.
    pub async fn bytes(&mut self) -> Result<Bytes, ProxyError> {
        let bytes = match std::mem::replace(&mut self.body, ResultBody::Buffered(Bytes::new())) {
            ResultBody::Buffered(bytes) => bytes,
            ResultBody::Stream(body) => axum::body::to_bytes(body, usize::MAX)
                .await
                .map_err(|e| ProxyError::UpstreamBody(e.to_string()))?,
        };
        self.body = ResultBody::Buffered(bytes.clone());
        Ok(bytes)
    }

    /// Replace the body with rewritten content of the given type.
    pub fn replace_body(&mut self, body: Bytes, content_type: &'static str) {
        self.body = ResultBody::Buffered(body);
        self.headers.remove(header::CONTENT_LENGTH);
        self.headers.remove(header::CONTENT_ENCODING);
        self.headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
}

/// Request state owned by one engine invocation.
pub struct RequestContext {
    pub route: Arc<Route>,
    /// Inbound method (may be OPTIONS for a preflight).
    pub method: Method,
    pub uri: Uri,
    /// Path left after the route id, without a leading slash.
    pub remaining_path: String,
    /// Inbound query pairs, after the forwarding policy.
    pub query: Pairs,
    /// Inbound headers, after the forwarding policy.
    pub headers: HeaderMap,
    pub body: Bytes,
    pub client_ip: IpAddr,
    /// Plaintext secrets of the route's project.
    pub secrets: HashMap<String, String>,
    /// Mask to apply to the origin response, if any.
    pub filter: Option<FieldMask>,
    /// Query keys consumed by the engine and not forwarded.
    pub control_params: Vec<String>,
    /// Headers added to whatever response the request ends with.
    pub response_headers: HeaderMap,
    pub cache_key: Option<String>,
    pub result: Option<ProxyResult>,
    pub outcome: Option<OriginOutcome>,
    pub started: Instant,
}

impl RequestContext {
    /// First inbound value of a query key.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Whether a body-rewriting stage will run, so the origin body must be decoded.
    pub fn rewrites_body(&self) -> bool {
        (self.route.partial_query.enabled && self.filter.is_some())
            || self.route.image_transformation.enabled
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}
