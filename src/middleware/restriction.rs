//! Access restriction: IP allow-lists and browser-origin (CORS) policies.
//!
//! # Responsibilities
//! - Reject callers outside a route's IP allow-list before any other work
//! - Emit CORS headers according to the route's origin policy
//! - Answer preflight (OPTIONS) requests without reaching the origin
//!
//! # Design Decisions
//! - Allow-list entries are exact addresses, `*` octet wildcards or CIDR
//!   blocks; IPv4-mapped IPv6 addresses compare as IPv4
//! - An origin outside the allowed list gets no CORS headers but the request
//!   itself is still served; enforcement is the browser's job
//! - Routes without a restriction get permissive `*` CORS headers

use std::fmt;
use std::net::IpAddr;

use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::warn;

use crate::catalog::Restriction;
use crate::middleware::{Flow, Stage};
use crate::observability::metrics;
use crate::proxy::context::RequestContext;
use crate::proxy::error::ProxyError;

const PERMISSIVE_METHODS: &str = "GET,HEAD,PUT,PATCH,POST,DELETE";

#[derive(Debug, Error)]
#[error("invalid IP rule '{rule}': {reason}")]
pub struct IpRuleError {
    rule: String,
    reason: &'static str,
}

/// One allow-list entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpRule {
    Exact(IpAddr),
    /// IPv4 with `*` octets, e.g. `192.168.*.*`.
    Wildcard([Option<u8>; 4]),
    Cidr { network: IpAddr, prefix: u8 },
}

impl IpRule {
    pub fn parse(entry: &str) -> Result<Self, IpRuleError> {
        let entry = entry.trim();
        let fail = |reason| IpRuleError {
            rule: entry.to_string(),
            reason,
        };

        if let Some((addr, prefix)) = entry.split_once('/') {
            let network: IpAddr = addr.trim().parse().map_err(|_| fail("bad network address"))?;
            let network = canonical(network);
            let prefix: u8 = prefix.trim().parse().map_err(|_| fail("bad prefix length"))?;
            let max = if network.is_ipv4() { 32 } else { 128 };
            if prefix > max {
                return Err(fail("prefix length out of range"));
            }
            return Ok(IpRule::Cidr { network, prefix });
        }

        if entry.contains('*') {
            let parts: Vec<&str> = entry.split('.').collect();
            if parts.len() != 4 {
                return Err(fail("wildcards need four IPv4 octets"));
            }
            let mut octets = [None; 4];
            for (slot, part) in octets.iter_mut().zip(parts) {
                *slot = match part {
                    "*" => None,
                    n => Some(n.parse().map_err(|_| fail("bad octet"))?),
                };
            }
            return Ok(IpRule::Wildcard(octets));
        }

        let addr: IpAddr = entry.parse().map_err(|_| fail("not an IP address"))?;
        Ok(IpRule::Exact(canonical(addr)))
    }

    pub fn matches(&self, ip: IpAddr) -> bool {
        let ip = canonical(ip);
        match self {
            IpRule::Exact(addr) => *addr == ip,
            IpRule::Wildcard(pattern) => match ip {
                IpAddr::V4(v4) => pattern
                    .iter()
                    .zip(v4.octets())
                    .all(|(want, got)| want.map_or(true, |w| w == got)),
                IpAddr::V6(_) => false,
            },
            IpRule::Cidr { network, prefix } => match (network, ip) {
                (IpAddr::V4(net), IpAddr::V4(addr)) => {
                    prefix_eq(u32::from(*net) as u128, u32::from(addr) as u128, *prefix, 32)
                }
                (IpAddr::V6(net), IpAddr::V6(addr)) => {
                    prefix_eq(u128::from(*net), u128::from(addr), *prefix, 128)
                }
                _ => false,
            },
        }
    }
}

impl fmt::Display for IpRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpRule::Exact(addr) => write!(f, "{}", addr),
            IpRule::Wildcard(octets) => {
                let parts: Vec<String> = octets
                    .iter()
                    .map(|o| o.map_or_else(|| "*".to_string(), |n| n.to_string()))
                    .collect();
                f.write_str(&parts.join("."))
            }
            IpRule::Cidr { network, prefix } => write!(f, "{}/{}", network, prefix),
        }
    }
}

fn prefix_eq(a: u128, b: u128, prefix: u8, width: u8) -> bool {
    if prefix == 0 {
        return true;
    }
    let shift = (width - prefix) as u32;
    (a >> shift) == (b >> shift)
}

/// Collapse IPv4-mapped IPv6 (`::ffff:a.b.c.d`) to plain IPv4.
pub fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

pub struct RestrictionStage;

#[async_trait]
impl Stage for RestrictionStage {
    fn name(&self) -> &'static str {
        "restriction"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, ProxyError> {
        let route = ctx.route.clone();
        let preflight = ctx.method == Method::OPTIONS;

        match &route.restriction {
            Restriction::Disabled => {
                ctx.response_headers.insert(
                    header::ACCESS_CONTROL_ALLOW_ORIGIN,
                    HeaderValue::from_static("*"),
                );
                if preflight {
                    let methods = HeaderValue::from_static(PERMISSIVE_METHODS);
                    return Ok(Flow::Respond(preflight_response(&ctx.headers, methods)));
                }
            }
            Restriction::Ip(rules) => {
                if !rules.iter().any(|rule| rule.matches(ctx.client_ip)) {
                    warn!(route = %route.id, client = %ctx.client_ip, "Client IP not in allow-list");
                    metrics::record_rejection("restriction");
                    return Err(ProxyError::AccessDenied(ctx.client_ip));
                }
                if preflight {
                    return Ok(Flow::Respond(StatusCode::NO_CONTENT.into_response()));
                }
            }
            Restriction::Http(allowed) => {
                let origin = ctx
                    .headers
                    .get(header::ORIGIN)
                    .and_then(|v| v.to_str().ok())
                    .filter(|origin| allowed.iter().any(|a| a == origin))
                    .map(str::to_string);

                ctx.response_headers
                    .insert(header::VARY, HeaderValue::from_static("Origin"));
                let origin_value = origin.and_then(|o| HeaderValue::from_str(&o).ok());
                if let Some(value) = &origin_value {
                    ctx.response_headers
                        .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value.clone());
                }
                if preflight {
                    if origin_value.is_none() {
                        return Ok(Flow::Respond(StatusCode::NO_CONTENT.into_response()));
                    }
                    let methods = HeaderValue::from_static(route.method.as_str());
                    return Ok(Flow::Respond(preflight_response(&ctx.headers, methods)));
                }
            }
        }

        Ok(Flow::Next)
    }
}

/// 204 with method/header allowances; origin headers are added by the engine.
fn preflight_response(request_headers: &HeaderMap, methods: HeaderValue) -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, methods);
    if let Some(requested) = request_headers.get(header::ACCESS_CONTROL_REQUEST_HEADERS) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
        headers.append(header::VARY, HeaderValue::from_static("Access-Control-Request-Headers"));
    }
    response
}
