//! Catalog data model.
//!
//! Definitions (`*Definition`) mirror the catalog file. They are decoded once,
//! at load time, into the typed runtime forms the engine works with; invalid
//! middleware options are rejected here rather than on the request path.

use axum::http::Method;
use serde::{Deserialize, Serialize};

use crate::catalog::CatalogError;
use crate::middleware::partial_query::FieldMask;
use crate::middleware::restriction::IpRule;

/// Ordered name/value pairs. Duplicate names are meaningful.
pub type Pairs = Vec<(String, String)>;

/// HTTP methods a route can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ApiMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl ApiMethod {
    pub fn as_method(&self) -> Method {
        match self {
            ApiMethod::Get => Method::GET,
            ApiMethod::Post => Method::POST,
            ApiMethod::Put => Method::PUT,
            ApiMethod::Delete => Method::DELETE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiMethod::Get => "GET",
            ApiMethod::Post => "POST",
            ApiMethod::Put => "PUT",
            ApiMethod::Delete => "DELETE",
        }
    }

    pub fn matches(&self, method: &Method) -> bool {
        self.as_method() == *method
    }
}

impl std::fmt::Display for ApiMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named secret as stored (value is in its at-rest form).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secret {
    pub name: String,
    pub value: String,
}

/// A project groups routes, monitors and secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Ordered by creation.
    #[serde(default)]
    pub secrets: Vec<Secret>,
}

/// Restriction settings as written in the catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RestrictionDefinition {
    #[default]
    None,
    Ip {
        #[serde(default)]
        allowed_ips: Vec<String>,
    },
    Http {
        #[serde(default)]
        allowed_origins: Vec<String>,
    },
}

/// Longest expiry, in seconds, a route may put on a store key (one year).
pub const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitOptions {
    pub enabled: bool,
    /// Window size in seconds.
    pub window_size: u64,
    pub max_requests: u64,
}

impl Default for RateLimitOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            window_size: 60,
            max_requests: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CachingOptions {
    pub enabled: bool,
    /// Duration in seconds.
    pub duration: u64,
}

impl Default for CachingOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            duration: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PartialQueryDefinition {
    pub enabled: bool,
    /// Mask applied when the caller does not send one.
    pub default_filter: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageTransformOptions {
    pub enabled: bool,
}

fn default_forward_request_data() -> bool {
    true
}

/// A route entry as written in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDefinition {
    pub id: String,
    pub project_id: String,
    #[serde(default)]
    pub name: String,
    pub method: ApiMethod,
    pub api_url: String,
    #[serde(default)]
    pub query_params: Pairs,
    #[serde(default)]
    pub headers: Pairs,
    #[serde(default = "default_forward_request_data")]
    pub forward_request_data: bool,
    #[serde(default)]
    pub restriction: RestrictionDefinition,
    #[serde(default)]
    pub rate_limiting: RateLimitOptions,
    #[serde(default)]
    pub caching: CachingOptions,
    #[serde(default)]
    pub partial_query: PartialQueryDefinition,
    #[serde(default)]
    pub image_transformation: ImageTransformOptions,
}

/// A monitor entry as written in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorDefinition {
    pub id: String,
    pub project_id: String,
    #[serde(default)]
    pub name: String,
    pub api_url: String,
    #[serde(default)]
    pub query_params: Pairs,
    #[serde(default)]
    pub headers: Pairs,
    pub frequency_secs: u64,
}

/// Decoded access restriction.
#[derive(Debug, Clone)]
pub enum Restriction {
    Disabled,
    Ip(Vec<IpRule>),
    Http(Vec<String>),
}

impl Restriction {
    pub fn kind(&self) -> &'static str {
        match self {
            Restriction::Disabled => "none",
            Restriction::Ip(_) => "ip",
            Restriction::Http(_) => "http",
        }
    }
}

/// Decoded partial-query settings.
#[derive(Debug, Clone, Default)]
pub struct PartialQueryOptions {
    pub enabled: bool,
    pub default_filter: Option<FieldMask>,
}

/// A route ready for the engine.
#[derive(Debug, Clone)]
pub struct Route {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub method: ApiMethod,
    /// Origin base URL without query string; may contain placeholders.
    pub api_url: String,
    pub query_params: Pairs,
    pub headers: Pairs,
    pub forward_request_data: bool,
    pub restriction: Restriction,
    pub rate_limiting: RateLimitOptions,
    pub caching: CachingOptions,
    pub partial_query: PartialQueryOptions,
    pub image_transformation: ImageTransformOptions,
}

impl Route {
    pub fn from_definition(def: RouteDefinition) -> Result<Self, CatalogError> {
        let invalid = |reason: String| CatalogError::InvalidRoute {
            id: def.id.clone(),
            reason,
        };

        if def.id.is_empty() || def.id.contains('/') {
            return Err(invalid("id must be a non-empty path segment".into()));
        }
        if def.api_url.trim().is_empty() {
            return Err(invalid("api_url must not be empty".into()));
        }

        let restriction = match &def.restriction {
            RestrictionDefinition::None => Restriction::Disabled,
            RestrictionDefinition::Ip { allowed_ips } => {
                let rules = allowed_ips
                    .iter()
                    .map(|entry| IpRule::parse(entry))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| invalid(e.to_string()))?;
                Restriction::Ip(rules)
            }
            RestrictionDefinition::Http { allowed_origins } => {
                Restriction::Http(allowed_origins.iter().map(|o| o.trim().to_string()).collect())
            }
        };

        if def.rate_limiting.enabled
            && (def.rate_limiting.window_size == 0 || def.rate_limiting.max_requests == 0)
        {
            return Err(invalid("rate_limiting window_size and max_requests must be > 0".into()));
        }
        if def.caching.enabled && def.caching.duration == 0 {
            return Err(invalid("caching duration must be > 0".into()));
        }

        let default_filter = match &def.partial_query.default_filter {
            Some(expr) if !expr.trim().is_empty() => {
                Some(FieldMask::parse(expr).map_err(|e| invalid(e.to_string()))?)
            }
            _ => None,
        };

        let (api_url, mut query_params) = split_api_url(&def.api_url);
        query_params.extend(def.query_params);

        Ok(Self {
            id: def.id,
            project_id: def.project_id,
            name: def.name,
            method: def.method,
            api_url,
            query_params,
            headers: def.headers,
            forward_request_data: def.forward_request_data,
            restriction,
            rate_limiting: RateLimitOptions {
                window_size: def.rate_limiting.window_size.min(MAX_TTL_SECS),
                ..def.rate_limiting
            },
            caching: CachingOptions {
                duration: def.caching.duration.min(MAX_TTL_SECS),
                ..def.caching
            },
            partial_query: PartialQueryOptions {
                enabled: def.partial_query.enabled,
                default_filter,
            },
            image_transformation: def.image_transformation,
        })
    }
}

/// A monitor ready to be scheduled.
#[derive(Debug, Clone)]
pub struct Monitor {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub api_url: String,
    pub query_params: Pairs,
    pub headers: Pairs,
    pub frequency_secs: u64,
}

impl Monitor {
    pub fn from_definition(def: MonitorDefinition) -> Result<Self, CatalogError> {
        if def.frequency_secs == 0 {
            return Err(CatalogError::InvalidMonitor {
                id: def.id,
                reason: "frequency_secs must be > 0".into(),
            });
        }
        let (api_url, mut query_params) = split_api_url(&def.api_url);
        query_params.extend(def.query_params);
        Ok(Self {
            id: def.id,
            project_id: def.project_id,
            name: def.name,
            api_url,
            query_params,
            headers: def.headers,
            frequency_secs: def.frequency_secs,
        })
    }
}

/// Rolling per-route counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStats {
    pub success_count: u64,
    pub fail_count: u64,
    pub average_latency_ms: u64,
}

/// Moves a query string embedded in a configured URL into explicit pairs.
pub fn split_api_url(url: &str) -> (String, Pairs) {
    match url.split_once('?') {
        Some((base, query)) => {
            let pairs = url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect();
            (base.to_string(), pairs)
        }
        None => (url.to_string(), Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(extra: &str) -> RouteDefinition {
        let text = format!(
            r#"
            id = "r1"
            project_id = "p1"
            method = "GET"
            api_url = "https://api.example.com/v1?units=metric&key={{{{KEY}}}}"
            query_params = [["lang", "en"]]
            {}
            "#,
            extra
        );
        toml::from_str(&text).unwrap()
    }

    #[test]
    fn test_embedded_query_is_split_and_prepended() {
        let route = Route::from_definition(definition("")).unwrap();
        assert_eq!(route.api_url, "https://api.example.com/v1");
        assert_eq!(
            route.query_params,
            vec![
                ("units".to_string(), "metric".to_string()),
                ("key".to_string(), "{{KEY}}".to_string()),
                ("lang".to_string(), "en".to_string()),
            ]
        );
        assert!(route.forward_request_data);
        assert!(matches!(route.restriction, Restriction::Disabled));
    }

    #[test]
    fn test_ip_restriction_is_decoded() {
        let route = Route::from_definition(definition(
            r#"
            [restriction]
            type = "ip"
            allowed_ips = ["127.0.0.1", "10.0.0.0/8", "192.168.1.*"]
            "#,
        ))
        .unwrap();
        match route.restriction {
            Restriction::Ip(rules) => assert_eq!(rules.len(), 3),
            other => panic!("unexpected restriction {:?}", other),
        }
    }

    #[test]
    fn test_invalid_ip_rule_is_a_load_error() {
        let err = Route::from_definition(definition(
            r#"
            [restriction]
            type = "ip"
            allowed_ips = ["10.0.0.0/40"]
            "#,
        ))
        .unwrap_err();
        assert!(matches!(err, CatalogError::InvalidRoute { .. }));
    }

    #[test]
    fn test_unknown_restriction_type_is_rejected() {
        let text = r#"
            id = "r1"
            project_id = "p1"
            method = "GET"
            api_url = "https://x"
            [restriction]
            type = "geo"
        "#;
        assert!(toml::from_str::<RouteDefinition>(text).is_err());
    }

    #[test]
    fn test_zero_cache_duration_is_rejected() {
        let err = Route::from_definition(definition(
            r#"
            [caching]
            enabled = true
            duration = 0
            "#,
        ))
        .unwrap_err();
        assert!(err.to_string().contains("caching"));
    }

    #[test]
    fn test_oversized_expiries_are_capped() {
        let route = Route::from_definition(definition(
            r#"
            [rate_limiting]
            enabled = true
            window_size = 9223372036854775807
            max_requests = 9223372036854775807

            [caching]
            enabled = true
            duration = 9223372036854775807
            "#,
        ))
        .unwrap();
        assert_eq!(route.rate_limiting.window_size, MAX_TTL_SECS);
        assert_eq!(route.rate_limiting.max_requests, i64::MAX as u64);
        assert_eq!(route.caching.duration, MAX_TTL_SECS);
    }

    #[test]
    fn test_malformed_default_filter_is_rejected() {
        let err = Route::from_definition(definition(
            r#"
            [partial_query]
            enabled = true
            default_filter = "a,b("
            "#,
        ))
        .unwrap_err();
        assert!(matches!(err, CatalogError::InvalidRoute { .. }));
    }

    #[test]
    fn test_method_matching() {
        assert!(ApiMethod::Get.matches(&Method::GET));
        assert!(!ApiMethod::Get.matches(&Method::POST));
        assert_eq!(ApiMethod::Delete.to_string(), "DELETE");
    }
}
