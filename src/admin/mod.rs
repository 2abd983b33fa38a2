//! Admin API.
//!
//! Mounted under `/admin` on the main listener when `admin.enabled` is set.
//! Every endpoint requires `Authorization: Bearer <admin.api_key>`.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::require_api_key;
use self::handlers::*;
use crate::http::server::AppState;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/status", get(get_status))
        .route("/routes", get(list_routes))
        .route("/routes/{id}", get(get_route).delete(delete_route))
        .route("/routes/{id}/duplicate", post(duplicate_route))
        .route("/monitors/{id}/logs", get(monitor_logs))
        .route("/monitors/{id}/restart", post(restart_monitor))
        .route_layer(middleware::from_fn_with_state(state, require_api_key))
}
