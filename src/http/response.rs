//! Response relay.
//!
//! # Responsibilities
//! - Turn an engine result into the response sent to the caller
//! - Strip hop-by-hop headers that must not cross the proxy
//! - Drop origin CORS headers; the restriction stage owns that policy
//!
//! # Design Decisions
//! - Streamed origin bodies are passed through without buffering
//! - Rewritten bodies drop the origin `Content-Length`; the server recomputes it

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName};
use axum::response::Response;

use crate::proxy::context::{ProxyResult, ResultBody};

/// Connection-scoped headers (RFC 9110 §7.6.1) plus the legacy proxy variant.
pub const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.iter().any(|h| *h == name.as_str())
}

pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let names: Vec<HeaderName> = headers
        .keys()
        .filter(|name| is_hop_by_hop(name))
        .cloned()
        .collect();
    for name in names {
        headers.remove(name);
    }
}

/// Remove every `access-control-*` header.
pub fn strip_cors_headers(headers: &mut HeaderMap) {
    let names: Vec<HeaderName> = headers
        .keys()
        .filter(|name| name.as_str().starts_with("access-control-"))
        .cloned()
        .collect();
    for name in names {
        headers.remove(name);
    }
}

/// Build the caller-facing response for an engine result.
pub fn relay(result: ProxyResult) -> Response {
    let ProxyResult {
        status,
        mut headers,
        body,
    } = result;

    strip_hop_by_hop(&mut headers);
    let body = match body {
        ResultBody::Stream(body) => body,
        ResultBody::Buffered(bytes) => {
            headers.remove(header::CONTENT_LENGTH);
            Body::from(bytes)
        }
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Add engine-level headers (CORS) to a finished response, replacing any
/// value already present.
pub fn apply_headers(response: &mut Response, extra: &HeaderMap) {
    for name in extra.keys() {
        response.headers_mut().remove(name);
    }
    for (name, value) in extra {
        response.headers_mut().append(name.clone(), value.clone());
    }
}
