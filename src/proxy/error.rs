//! Engine error taxonomy and its HTTP mapping.

use std::net::IpAddr;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::catalog::CatalogError;
use crate::kv::KvError;
use crate::middleware::image_transform::TransformError;
use crate::secrets::SecretError;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("API id is missing")]
    MissingRouteId,

    #[error("Invalid endpoint")]
    RouteNotFound(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Access denied to IP address: {0}")]
    AccessDenied(IpAddr),

    #[error("Too many requests made")]
    RateLimited { status: StatusCode },

    #[error("Request body too large")]
    PayloadTooLarge,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Store(#[from] KvError),

    #[error("Upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Failed to read upstream body: {0}")]
    UpstreamBody(String),

    #[error("Image transformation failed: {0}")]
    Transform(#[from] TransformError),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingRouteId | ProxyError::RouteNotFound(_) => StatusCode::BAD_REQUEST,
            ProxyError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ProxyError::AccessDenied(_) => StatusCode::FORBIDDEN,
            ProxyError::RateLimited { status } => *status,
            ProxyError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::Configuration(_)
            | ProxyError::Secret(_)
            | ProxyError::Catalog(_)
            | ProxyError::Store(_)
            | ProxyError::Transport(_)
            | ProxyError::UpstreamBody(_)
            | ProxyError::Transform(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label for metrics and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            ProxyError::MissingRouteId => "missing_route_id",
            ProxyError::RouteNotFound(_) => "route_not_found",
            ProxyError::MethodNotAllowed => "method_not_allowed",
            ProxyError::AccessDenied(_) => "restriction",
            ProxyError::RateLimited { .. } => "rate_limit",
            ProxyError::PayloadTooLarge => "payload_too_large",
            ProxyError::Configuration(_) => "configuration",
            ProxyError::Secret(_) => "secret",
            ProxyError::Catalog(_) => "catalog",
            ProxyError::Store(_) => "store",
            ProxyError::Transport(_) => "transport",
            ProxyError::UpstreamBody(_) => "upstream_body",
            ProxyError::Transform(_) => "image_transform",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ProxyError::MissingRouteId.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ProxyError::RouteNotFound("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ProxyError::MethodNotAllowed.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            ProxyError::AccessDenied("10.0.0.1".parse().unwrap()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ProxyError::RateLimited { status: StatusCode::SERVICE_UNAVAILABLE }.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ProxyError::Configuration("bad".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            ProxyError::AccessDenied("10.0.0.1".parse().unwrap()).to_string(),
            "Access denied to IP address: 10.0.0.1"
        );
        assert_eq!(ProxyError::RouteNotFound("abc".into()).to_string(), "Invalid endpoint");
    }
}
