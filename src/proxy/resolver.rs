//! Route resolution from the inbound path.

use axum::http::{HeaderMap, Uri};

use crate::catalog::{Pairs, ResolvedRoute, Route, RouteStore};
use crate::proxy::error::ProxyError;

/// Mount point of the engine.
pub const PROXY_PREFIX: &str = "/api/v1";

/// Split `/{route_id}/{rest...}` into the id and the remaining path.
///
/// The remaining path is returned without its leading slash.
pub fn split_route_path(tail: &str) -> Option<(&str, &str)> {
    let tail = tail.trim_start_matches('/');
    let (id, rest) = tail.split_once('/').unwrap_or((tail, ""));
    if id.is_empty() {
        None
    } else {
        Some((id, rest))
    }
}

/// Look up the route named by `path` (with or without the mount prefix).
pub async fn resolve(
    store: &dyn RouteStore,
    path: &str,
) -> Result<(ResolvedRoute, String), ProxyError> {
    let tail = path.strip_prefix(PROXY_PREFIX).unwrap_or(path);
    let (id, rest) = split_route_path(tail).ok_or(ProxyError::MissingRouteId)?;
    match store.find_by_id(id).await? {
        Some(resolved) => Ok((resolved, rest.to_string())),
        None => Err(ProxyError::RouteNotFound(id.to_string())),
    }
}

/// Inbound query pairs and headers the rest of the request may see.
///
/// Routes with `forward_request_data = false` see neither.
pub fn inbound_data(route: &Route, uri: &Uri, headers: HeaderMap) -> (Pairs, HeaderMap) {
    if !route.forward_request_data {
        return (Vec::new(), HeaderMap::new());
    }
    let query = uri
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();
    (query, headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{parse_catalog, MemoryRouteStore};
    use axum::http::HeaderValue;

    #[test]
    fn test_split_route_path() {
        assert_eq!(split_route_path("/r1"), Some(("r1", "")));
        assert_eq!(split_route_path("/r1/"), Some(("r1", "")));
        assert_eq!(split_route_path("/r1/a/b"), Some(("r1", "a/b")));
        assert_eq!(split_route_path("/"), None);
        assert_eq!(split_route_path(""), None);
    }

    fn store(forward: bool) -> MemoryRouteStore {
        let text = format!(
            r#"
            [[projects]]
            id = "p1"

            [[routes]]
            id = "r1"
            project_id = "p1"
            method = "GET"
            api_url = "http://origin.test"
            forward_request_data = {}
            "#,
            forward
        );
        MemoryRouteStore::from_catalog(parse_catalog(&text).unwrap())
    }

    #[tokio::test]
    async fn test_resolve_errors() {
        let store = store(true);
        assert!(matches!(
            resolve(&store, "/api/v1").await,
            Err(ProxyError::MissingRouteId)
        ));
        assert!(matches!(
            resolve(&store, "/api/v1/").await,
            Err(ProxyError::MissingRouteId)
        ));
        assert!(matches!(
            resolve(&store, "/api/v1/zzz/x").await,
            Err(ProxyError::RouteNotFound(id)) if id == "zzz"
        ));
        let (resolved, rest) = resolve(&store, "/api/v1/r1/items/4").await.unwrap();
        assert_eq!(resolved.route.id, "r1");
        assert_eq!(rest, "items/4");
    }

    #[tokio::test]
    async fn test_forwarding_policy() {
        let uri: Uri = "/api/v1/r1?a=1&a=2&b=x%20y".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-custom", HeaderValue::from_static("1"));

        let (resolved, _) = resolve(&store(true), uri.path()).await.unwrap();
        let (query, kept) = inbound_data(&resolved.route, &uri, headers.clone());
        assert_eq!(
            query,
            vec![
                ("a".to_string(), "1".to_string()),
                ("a".to_string(), "2".to_string()),
                ("b".to_string(), "x y".to_string()),
            ]
        );
        assert_eq!(kept.len(), 1);

        let (resolved, _) = resolve(&store(false), uri.path()).await.unwrap();
        let (query, kept) = inbound_data(&resolved.route, &uri, headers);
        assert!(query.is_empty());
        assert!(kept.is_empty());
    }
}
