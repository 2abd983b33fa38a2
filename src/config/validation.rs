//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Check cross-field requirements (redis backend needs a URL)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::{IpAddr, SocketAddr};

use crate::config::schema::{ProxyConfig, StoreBackend};

/// A single semantic problem found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be > 0"));
    }

    if config.store.backend == StoreBackend::Redis
        && config.store.redis_url.as_deref().map_or(true, str::is_empty)
    {
        errors.push(ValidationError::new(
            "store.redis_url",
            "required when store.backend = \"redis\"",
        ));
    }

    if config.catalog.path.is_empty() {
        errors.push(ValidationError::new("catalog.path", "must not be empty"));
    }

    if config.proxy.filter_param.is_empty() {
        errors.push(ValidationError::new("proxy.filter_param", "must not be empty"));
    }

    if !matches!(config.proxy.rate_limit_status, 429 | 503) {
        errors.push(ValidationError::new(
            "proxy.rate_limit_status",
            format!("must be 429 or 503, got {}", config.proxy.rate_limit_status),
        ));
    }

    for entry in &config.proxy.trusted_proxies {
        if entry.parse::<IpAddr>().is_err() {
            errors.push(ValidationError::new(
                "proxy.trusted_proxies",
                format!("'{}' is not an IP address", entry),
            ));
        }
    }

    if config.proxy.max_body_size == 0 {
        errors.push(ValidationError::new("proxy.max_body_size", "must be > 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if config.admin.enabled && config.admin.api_key.trim().is_empty() {
        errors.push(ValidationError::new("admin.api_key", "must not be empty when admin is enabled"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
