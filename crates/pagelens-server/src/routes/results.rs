//! Result viewing and editing.

use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};

use pagelens_core::store::StoreError;

use super::file_response;
use crate::error::{ApiError, Result};
use crate::ServerState;

#[derive(Deserialize)]
pub(super) struct UpdateResultRequest {
    content: String,
}

#[derive(Serialize)]
pub(super) struct UpdateResultResponse {
    message: &'static str,
    file: String,
}

/// GET /api/jobs/{id}/results/{filename}
///
/// Markdown is served as `text/markdown`; cropped images by extension.
pub(super) async fn get_result(
    State(state): State<ServerState>,
    Path((id, filename)): Path<(String, String)>,
) -> Result<Response> {
    state.store().get(&id).await?;
    let path = state.store().result_path(&id, &filename)?;
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::FileNotFound(filename).into())
        }
        Err(e) => return Err(ApiError::Internal(format!("Failed to read {}: {}", filename, e))),
    };
    Ok(file_response(&filename, bytes, "inline"))
}

/// PUT /api/jobs/{id}/results/{filename}
pub(super) async fn update_result(
    State(state): State<ServerState>,
    Path((id, filename)): Path<(String, String)>,
    Json(request): Json<UpdateResultRequest>,
) -> Result<Json<UpdateResultResponse>> {
    let path = state
        .store()
        .write_result(&id, &filename, &request.content)
        .await?;
    tracing::info!(job = %id, "Result {} edited", filename);

    Ok(Json(UpdateResultResponse {
        message: "Result updated",
        file: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or(filename),
    }))
}
