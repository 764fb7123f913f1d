//! ZIP downloads.

use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use chrono::Local;
use serde::Deserialize;

use pagelens_core::archive;

use super::file_response;
use crate::error::{ApiError, Result};
use crate::ServerState;

#[derive(Deserialize)]
pub(super) struct BatchDownloadRequest {
    #[serde(default)]
    job_ids: Vec<String>,
}

/// GET /api/jobs/{id}/download/zip
pub(super) async fn download_job(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<Response> {
    let record = state.store().get(&id).await?;
    let results_dir = state.store().results_dir(&id);
    let name = archive::batch_zip_name(&record);

    let bytes = tokio::task::spawn_blocking(move || archive::batch_zip(&record, &results_dir))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok(file_response(&name, bytes, "attachment"))
}

/// POST /api/batch/download
///
/// Unknown ids are skipped; 404 if none of them exist.
pub(super) async fn download_batches(
    State(state): State<ServerState>,
    Json(request): Json<BatchDownloadRequest>,
) -> Result<Response> {
    if request.job_ids.is_empty() {
        return Err(ApiError::BadRequest("No job ids given".to_string()));
    }

    let mut batches = Vec::new();
    for id in &request.job_ids {
        match state.store().get(id).await {
            Ok(record) => {
                let dir = state.store().results_dir(id);
                batches.push((record, dir));
            }
            Err(e) => tracing::debug!(job = %id, "Skipping in batch download: {}", e),
        }
    }
    if batches.is_empty() {
        return Err(ApiError::NotFound("None of the requested jobs exist".to_string()));
    }

    let bytes = tokio::task::spawn_blocking(move || {
        let refs: Vec<_> = batches
            .iter()
            .map(|(record, dir)| (record.clone(), dir.as_path()))
            .collect();
        archive::multi_batch_zip(&refs)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok(file_response(
        &archive::multi_batch_zip_name(Local::now()),
        bytes,
        "attachment",
    ))
}
