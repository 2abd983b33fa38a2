//! HTTP surface.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum router, tower-http layers)
//!     → request.rs (request ID, client address)
//!     → proxy::Proxy (engine) or admin::router
//!     → response.rs (relay, header hygiene)
//!     → client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer};
