use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::catalog::{CatalogError, RouteSummary};
use crate::http::server::AppState;
use crate::monitor::MonitorLog;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub routes: usize,
    pub running_monitors: usize,
    pub stages: Vec<&'static str>,
}

#[derive(Serialize)]
pub struct Duplicated {
    pub id: String,
}

#[derive(Serialize)]
pub struct Restarted {
    pub id: String,
    pub running: bool,
}

/// Store failures surface as 500 with the error text.
pub struct AdminError(CatalogError);

impl From<CatalogError> for AdminError {
    fn from(err: CatalogError) -> Self {
        Self(err)
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self.0, "Admin request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()).into_response()
    }
}

pub async fn get_status(State(state): State<AppState>) -> Result<Json<SystemStatus>, AdminError> {
    let routes = state.routes.list().await?.len();
    Ok(Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        routes,
        running_monitors: state.monitors.running(),
        stages: state.proxy.stage_names(),
    }))
}

pub async fn list_routes(
    State(state): State<AppState>,
) -> Result<Json<Vec<RouteSummary>>, AdminError> {
    Ok(Json(state.routes.list().await?))
}

pub async fn get_route(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AdminError> {
    Ok(match state.routes.summary(&id).await? {
        Some(summary) => Json(summary).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    })
}

pub async fn duplicate_route(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AdminError> {
    Ok(match state.routes.duplicate(&id).await? {
        Some(id) => (StatusCode::CREATED, Json(Duplicated { id })).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    })
}

pub async fn delete_route(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AdminError> {
    Ok(if state.routes.delete(&id).await? {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    })
}

pub async fn monitor_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<Vec<MonitorLog>> {
    Json(state.monitors.logs().recent(&id))
}

pub async fn restart_monitor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AdminError> {
    Ok(if state.monitors.restart(&id).await? {
        Json(Restarted { id, running: true }).into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    })
}
