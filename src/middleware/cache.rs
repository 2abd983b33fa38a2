//! Response caching in the shared key-value store.
//!
//! Entries are two keys written together with the same TTL:
//! `cache:{METHOD}:{path?query}:headers` holds the response headers as JSON
//! (name → list of values) and `...:response` holds the final body bytes.
//!
//! Only GET routes are cached, and only 200 results. The stored body is the
//! one the caller received, after partial-query and image stages ran.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use bytes::Bytes;
use tracing::{debug, warn};

use crate::catalog::ApiMethod;
use crate::http::response::{relay, strip_cors_headers};
use crate::kv::KeyValueStore;
use crate::middleware::{Flow, Stage};
use crate::observability::metrics;
use crate::proxy::context::{ProxyResult, RequestContext};
use crate::proxy::error::ProxyError;

pub fn cache_key(ctx: &RequestContext) -> String {
    let target = ctx
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| ctx.uri.path());
    format!("cache:{}:{}", ctx.route.method, target)
}

fn headers_key(base: &str) -> String {
    format!("{}:headers", base)
}

fn body_key(base: &str) -> String {
    format!("{}:response", base)
}

fn cacheable(ctx: &RequestContext) -> bool {
    ctx.route.caching.enabled && ctx.route.method == ApiMethod::Get
}

fn max_age(secs: i64) -> HeaderValue {
    // digits only, always a valid header value
    HeaderValue::from_str(&format!("max-age={}", secs.max(0)))
        .unwrap_or_else(|_| HeaderValue::from_static("max-age=0"))
}

/// Serialize headers as `{"name": ["v1", "v2"]}`; non-UTF-8 values are skipped.
pub fn encode_headers(headers: &HeaderMap) -> Result<String, serde_json::Error> {
    let mut map: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            map.entry(name.as_str()).or_default().push(value);
        }
    }
    serde_json::to_string(&map)
}

pub fn decode_headers(text: &str) -> Result<HeaderMap, serde_json::Error> {
    let map: BTreeMap<String, Vec<String>> = serde_json::from_str(text)?;
    let mut headers = HeaderMap::new();
    for (name, values) in map {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        for value in values {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.append(name.clone(), value);
            }
        }
    }
    Ok(headers)
}

pub struct CacheReadStage {
    store: Arc<dyn KeyValueStore>,
}

impl CacheReadStage {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Stage for CacheReadStage {
    fn name(&self) -> &'static str {
        "cache_read"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, ProxyError> {
        if !cacheable(ctx) {
            return Ok(Flow::Next);
        }

        let key = cache_key(ctx);
        let (hkey, bkey) = (headers_key(&key), body_key(&key));
        ctx.cache_key = Some(key);

        let (headers, ttl, body) = tokio::join!(
            self.store.get(&hkey),
            self.store.ttl(&hkey),
            self.store.get_bytes(&bkey)
        );

        let (headers, ttl, body) = match (headers, ttl, body) {
            (Ok(Some(headers)), Ok(ttl), Ok(Some(body))) => (headers, ttl, body),
            (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
                warn!(route = %ctx.route.id, error = %e, "Cache read failed, calling origin");
                metrics::record_cache("miss");
                return Ok(Flow::Next);
            }
            _ => {
                metrics::record_cache("miss");
                return Ok(Flow::Next);
            }
        };

        let mut headers = match decode_headers(&headers) {
            Ok(headers) => headers,
            Err(e) => {
                warn!(route = %ctx.route.id, error = %e, "Corrupt cached headers, calling origin");
                metrics::record_cache("miss");
                return Ok(Flow::Next);
            }
        };
        strip_cors_headers(&mut headers);
        headers.insert(header::CACHE_CONTROL, max_age(ttl));

        debug!(route = %ctx.route.id, ttl, "Serving cached response");
        metrics::record_cache("hit");
        Ok(Flow::Respond(relay(ProxyResult::buffered(
            StatusCode::OK,
            headers,
            body,
        ))))
    }
}

pub struct CacheWriteStage {
    store: Arc<dyn KeyValueStore>,
}

impl CacheWriteStage {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Stage for CacheWriteStage {
    fn name(&self) -> &'static str {
        "cache_write"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, ProxyError> {
        if !cacheable(ctx) {
            return Ok(Flow::Next);
        }
        let Some(key) = ctx.cache_key.clone() else {
            return Ok(Flow::Next);
        };
        let duration = ctx.route.caching.duration;
        let Some(result) = ctx.result.as_mut() else {
            return Ok(Flow::Next);
        };
        if result.status != StatusCode::OK {
            return Ok(Flow::Next);
        }

        result.headers.insert(
            header::CACHE_CONTROL,
            max_age(i64::try_from(duration).unwrap_or(i64::MAX)),
        );
        let body = result.bytes().await?;

        let encoded = match encode_headers(&result.headers) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(route = %ctx.route.id, error = %e, "Failed to encode headers for cache");
                return Ok(Flow::Next);
            }
        };

        let entries = [
            (headers_key(&key), Bytes::from(encoded)),
            (body_key(&key), body),
        ];
        if let Err(e) = self.store.set_many_with_ttl(&entries, duration).await {
            // the caller still gets the response
            warn!(route = %ctx.route.id, error = %e, "Cache write failed");
        }

        Ok(Flow::Next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use crate::middleware::testing;
    use axum::http::Method;

    fn cached_route() -> Arc<crate::catalog::Route> {
        testing::route(
            r#"
            [routes.caching]
            enabled = true
            duration = 30
            "#,
        )
    }

    fn origin_result(status: StatusCode) -> ProxyResult {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.append("x-multi", HeaderValue::from_static("a"));
        headers.append("x-multi", HeaderValue::from_static("b"));
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("https://origin.test"),
        );
        ProxyResult::buffered(status, headers, Bytes::from_static(b"{\"ok\":true}"))
    }

    #[test]
    fn test_header_encoding_keeps_repeats() {
        let result = origin_result(StatusCode::OK);
        let encoded = encode_headers(&result.headers).unwrap();
        let decoded = decode_headers(&encoded).unwrap();
        let multi: Vec<_> = decoded.get_all("x-multi").iter().collect();
        assert_eq!(multi, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_huge_duration_keeps_max_age_positive() {
        let mut route = (*cached_route()).clone();
        route.caching.duration = u64::MAX;
        let store = Arc::new(MemoryStore::new());
        let read = CacheReadStage::new(store.clone());
        let write = CacheWriteStage::new(store.clone());

        let mut ctx = testing::context(Arc::new(route), Method::GET, "/api/v1/r1");
        read.run(&mut ctx).await.unwrap();
        ctx.result = Some(origin_result(StatusCode::OK));
        write.run(&mut ctx).await.unwrap();
        assert_eq!(
            ctx.result.as_ref().unwrap().headers[header::CACHE_CONTROL],
            format!("max-age={}", i64::MAX).as_str()
        );
        assert!(!store.is_empty());
    }

    #[test]
    fn test_key_includes_method_and_query() {
        let ctx = testing::context(cached_route(), Method::GET, "/api/v1/r1/items?page=2");
        assert_eq!(cache_key(&ctx), "cache:GET:/api/v1/r1/items?page=2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_then_hit() {
        let store = Arc::new(MemoryStore::new());
        let read = CacheReadStage::new(store.clone());
        let write = CacheWriteStage::new(store.clone());

        let mut first = testing::context(cached_route(), Method::GET, "/api/v1/r1?q=1");
        assert!(matches!(read.run(&mut first).await.unwrap(), Flow::Next));
        first.result = Some(origin_result(StatusCode::OK));
        write.run(&mut first).await.unwrap();
        assert_eq!(
            first.result.as_ref().unwrap().headers[header::CACHE_CONTROL],
            "max-age=30"
        );

        tokio::time::advance(std::time::Duration::from_secs(12)).await;

        let mut second = testing::context(cached_route(), Method::GET, "/api/v1/r1?q=1");
        let response = match read.run(&mut second).await.unwrap() {
            Flow::Respond(response) => response,
            Flow::Next => panic!("expected a cache hit"),
        };
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "max-age=18");
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"{\"ok\":true}");

        // a different query string is a different entry
        let mut other = testing::context(cached_route(), Method::GET, "/api/v1/r1?q=2");
        assert!(matches!(read.run(&mut other).await.unwrap(), Flow::Next));
    }

    #[tokio::test]
    async fn test_non_200_is_not_stored() {
        let store = Arc::new(MemoryStore::new());
        let read = CacheReadStage::new(store.clone());
        let write = CacheWriteStage::new(store.clone());

        let mut ctx = testing::context(cached_route(), Method::GET, "/api/v1/r1");
        read.run(&mut ctx).await.unwrap();
        ctx.result = Some(origin_result(StatusCode::NOT_FOUND));
        write.run(&mut ctx).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_non_get_route_is_never_cached() {
        let store = Arc::new(MemoryStore::new());
        let route = testing::route(
            r#"
            [routes.caching]
            enabled = true
            "#,
        );
        let mut route = (*route).clone();
        route.method = ApiMethod::Post;
        let mut ctx = testing::context(Arc::new(route), Method::POST, "/api/v1/r1");
        let read = CacheReadStage::new(store.clone());
        assert!(matches!(read.run(&mut ctx).await.unwrap(), Flow::Next));
        assert!(ctx.cache_key.is_none());
    }
}
