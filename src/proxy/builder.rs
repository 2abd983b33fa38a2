//! Upstream request construction.
//!
//! URL: rendered origin base, then `/` + remaining path, then configured query
//! pairs followed by inbound ones. Headers: configured first, inbound after,
//! both kept when names repeat.

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method};
use bytes::Bytes;
use url::Url;

use crate::catalog::ApiMethod;
use crate::http::response::is_hop_by_hop;
use crate::proxy::context::RequestContext;
use crate::proxy::error::ProxyError;
use crate::secrets::{render, render_pairs};

#[derive(Debug)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

pub fn build_url(
    origin: &str,
    remaining_path: &str,
    configured: &[(String, String)],
    inbound: &[(String, String)],
) -> Result<Url, ProxyError> {
    let base = if remaining_path.is_empty() {
        origin.to_string()
    } else {
        format!(
            "{}/{}",
            origin.trim_end_matches('/'),
            remaining_path.trim_start_matches('/')
        )
    };
    // the message must not echo the URL, it may carry rendered secrets
    let mut url = Url::parse(&base)
        .map_err(|e| ProxyError::Configuration(format!("invalid origin URL: {}", e)))?;

    if !configured.is_empty() || !inbound.is_empty() {
        let mut query = url.query_pairs_mut();
        for (name, value) in configured.iter().chain(inbound) {
            query.append_pair(name, value);
        }
    }
    Ok(url)
}

pub fn build_headers(
    configured: &[(String, String)],
    inbound: &HeaderMap,
    decode: bool,
) -> Result<HeaderMap, ProxyError> {
    let mut headers = HeaderMap::new();
    for (name, value) in configured {
        let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|_| {
            ProxyError::Configuration(format!("invalid configured header name '{}'", name))
        })?;
        let value = HeaderValue::from_str(value).map_err(|_| {
            ProxyError::Configuration(format!("invalid value for configured header '{}'", name))
        })?;
        headers.append(name, value);
    }

    for (name, value) in inbound {
        if name == header::HOST || name == header::CONTENT_LENGTH || is_hop_by_hop(name) {
            continue;
        }
        // the decoding client negotiates its own encodings
        if decode && name == header::ACCEPT_ENCODING {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    Ok(headers)
}

/// Assemble the origin request for a context.
///
/// Engine control parameters are removed from the forwarded query. GET routes
/// send no body.
pub fn build_request(ctx: &RequestContext, decode: bool) -> Result<UpstreamRequest, ProxyError> {
    let route = &ctx.route;
    let origin = render(&route.api_url, &ctx.secrets);
    let configured_query = render_pairs(&route.query_params, &ctx.secrets);
    let inbound_query: Vec<(String, String)> = ctx
        .query
        .iter()
        .filter(|(name, _)| !ctx.control_params.contains(name))
        .cloned()
        .collect();

    let url = build_url(&origin, &ctx.remaining_path, &configured_query, &inbound_query)?;
    let headers = build_headers(&render_pairs(&route.headers, &ctx.secrets), &ctx.headers, decode)?;
    let body = (route.method != ApiMethod::Get).then(|| ctx.body.clone());

    Ok(UpstreamRequest {
        method: route.method.as_method(),
        url,
        headers,
        body,
    })
}
