//! Uploaded file routes: add, remove, preview, page selection.

use axum::extract::{Multipart, Path, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;

use pagelens_core::pdf::{self, PageSelection};
use pagelens_core::store::{BatchFile, BatchRecord};

use super::file_response;
use super::jobs::UploadForm;
use crate::error::{ApiError, Result};
use crate::ServerState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PagesRequest {
    pages_sel: PageSelection,
}

/// POST /api/jobs/{id}/files/add
pub(super) async fn add_files(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<Json<BatchRecord>> {
    let form = UploadForm::read(multipart).await?;
    if form.uploads.is_empty() {
        return Err(ApiError::BadRequest("No files uploaded".to_string()));
    }
    state.store().add_files(&id, form.uploads).await?;
    Ok(Json(state.store().get(&id).await?))
}

/// DELETE /api/jobs/{id}/files/{file_id}
pub(super) async fn remove_file(
    State(state): State<ServerState>,
    Path((id, file_id)): Path<(String, String)>,
) -> Result<Json<BatchRecord>> {
    Ok(Json(state.store().remove_file(&id, &file_id).await?))
}

/// PUT /api/jobs/{id}/files/{file_id}/pages
pub(super) async fn set_pages(
    State(state): State<ServerState>,
    Path((id, file_id)): Path<(String, String)>,
    Json(request): Json<PagesRequest>,
) -> Result<Json<BatchFile>> {
    Ok(Json(
        state
            .store()
            .set_pages(&id, &file_id, request.pages_sel)
            .await?,
    ))
}

/// GET /api/jobs/{id}/files/{filename}
pub(super) async fn get_file(
    State(state): State<ServerState>,
    Path((id, filename)): Path<(String, String)>,
) -> Result<Response> {
    let path = state.store().upload_path(&id, &filename).await?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to read {}: {}", filename, e)))?;
    Ok(file_response(&filename, bytes, "inline"))
}

/// GET /api/jobs/{id}/files/{filename}/page/{n}
///
/// One page of an uploaded PDF as its own PDF, for previews.
pub(super) async fn get_page(
    State(state): State<ServerState>,
    Path((id, filename, page)): Path<(String, String, u32)>,
) -> Result<Response> {
    let path = state.store().upload_path(&id, &filename).await?;

    let total = {
        let path = path.clone();
        tokio::task::spawn_blocking(move || pdf::page_count(&path))
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .map_err(|e| ApiError::BadRequest(format!("{:#}", e)))?
    };
    if page == 0 || page > total {
        return Err(ApiError::BadRequest(format!(
            "Invalid page {} (document has {} pages)",
            page, total
        )));
    }

    let bytes = tokio::task::spawn_blocking(move || pdf::extract_page(&path, page))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    let stem = filename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(&filename);
    Ok(file_response(
        &format!("{}_page_{}.pdf", stem, page),
        bytes,
        "inline",
    ))
}
