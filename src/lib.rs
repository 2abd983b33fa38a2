//! Diode: an API-route forwarding proxy.
//!
//! Callers hit `/api/v1/{route_id}/...`; the engine resolves the route,
//! applies its middleware (restriction, rate limiting, caching, partial
//! responses, image transformation), injects project secrets and forwards
//! to the configured origin.

// Core subsystems
pub mod catalog;
pub mod config;
pub mod http;
pub mod proxy;

// Request stages and their stores
pub mod kv;
pub mod middleware;
pub mod secrets;

// Background work and cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod monitor;
pub mod observability;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
