use axum::extract::State;
use axum::Json;
use serde::Serialize;

use pagelens_core::SystemInfo;

use crate::ServerState;

#[derive(Serialize)]
pub(super) struct HealthResponse {
    status: &'static str,
    message: &'static str,
    version: &'static str,
}

/// GET /api/health
pub(super) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        message: "PageLens server is running",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /api/system/info
pub(super) async fn system_info(State(state): State<ServerState>) -> Json<SystemInfo> {
    Json(state.system().clone())
}
