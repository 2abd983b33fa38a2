//! Request identification and client addressing.
//!
//! # Responsibilities
//! - Attach a request ID (UUID v4) as early as possible and echo it back
//! - Determine the client IP used by restriction and rate limiting
//!
//! # Design Decisions
//! - Forwarding headers are trusted only when the TCP peer is a configured
//!   trusted proxy; otherwise the peer address is the client
//! - `X-Forwarded-For` wins over `X-Real-IP`; its left-most entry is the client

use std::net::IpAddr;

use axum::http::{HeaderMap, HeaderName};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::middleware::restriction::canonical;

pub const X_REQUEST_ID: &str = "x-request-id";
const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID), MakeRequestUuid)
}

pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID))
}

pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// Resolve the client address for a request received from `peer`.
pub fn client_ip(headers: &HeaderMap, peer: IpAddr, trusted_proxies: &[IpAddr]) -> IpAddr {
    let peer = canonical(peer);
    if !trusted_proxies.iter().any(|p| canonical(*p) == peer) {
        return peer;
    }

    let forwarded = headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok());
    let real_ip = || {
        headers
            .get(X_REAL_IP)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    };

    match forwarded.or_else(real_ip) {
        Some(ip) => {
            tracing::debug!(peer = %peer, client = %ip, "Using forwarded client address");
            canonical(ip)
        }
        None => peer,
    }
}
