//! Job (batch) lifecycle routes.

use std::collections::HashMap;

use axum::extract::{Multipart, Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use pagelens_core::jobs::OcrMode;
use pagelens_core::store::{BatchRecord, Upload};
use pagelens_core::DeviceChoice;

use crate::error::{ApiError, Result};
use crate::ServerState;

/// A parsed multipart upload: every file part plus plain text fields
pub(super) struct UploadForm {
    pub uploads: Vec<Upload>,
    pub fields: HashMap<String, String>,
}

impl UploadForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self> {
        let mut form = UploadForm {
            uploads: Vec::new(),
            fields: HashMap::new(),
        };

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            if let Some(file_name) = field.file_name().map(str::to_string) {
                let bytes = field.bytes().await?;
                // Browsers send an empty part when no file was picked
                if !file_name.is_empty() {
                    form.uploads.push(Upload {
                        name: file_name,
                        bytes: bytes.to_vec(),
                    });
                }
            } else {
                let value = field.text().await?;
                form.fields.insert(name, value);
            }
        }
        Ok(form)
    }

    fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

#[derive(Serialize)]
pub(super) struct MessageResponse {
    message: &'static str,
}

#[derive(Serialize)]
pub(super) struct EnqueueResponse {
    message: &'static str,
    queue_position: usize,
}

#[derive(Deserialize)]
pub(super) struct RenameRequest {
    name: String,
}

#[derive(Deserialize)]
pub(super) struct ModeRequest {
    mode: OcrMode,
}

#[derive(Deserialize)]
pub(super) struct DeviceRequest {
    device: DeviceChoice,
}

/// POST /api/jobs
///
/// Multipart fields: `files` (repeated), `kind`, `mode`, `device`.
pub(super) async fn create_job(
    State(state): State<ServerState>,
    multipart: Multipart,
) -> Result<Json<BatchRecord>> {
    let form = UploadForm::read(multipart).await?;
    let settings = &state.app().settings;

    let mode = match form.field("mode") {
        Some(raw) => raw.parse::<OcrMode>().map_err(ApiError::BadRequest)?,
        None => settings.default_mode,
    };
    let device = match form.field("device") {
        Some(raw) => raw.parse::<DeviceChoice>().map_err(ApiError::BadRequest)?,
        None => settings.default_device,
    };
    let kind = form.field("kind").unwrap_or("img").to_string();

    let record = state
        .store()
        .create(&kind, mode, device, form.uploads)
        .await?;
    Ok(Json(record))
}

/// GET /api/jobs
pub(super) async fn list_jobs(State(state): State<ServerState>) -> Json<Vec<BatchRecord>> {
    Json(state.store().list().await)
}

/// GET /api/jobs/{id}
pub(super) async fn get_job(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<Json<BatchRecord>> {
    Ok(Json(state.store().get(&id).await?))
}

/// DELETE /api/jobs/{id}
pub(super) async fn delete_job(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>> {
    // A queued batch must not be picked up after deletion
    let _ = state.scheduler().cancel(&id).await;
    state.store().delete(&id).await?;
    Ok(Json(MessageResponse {
        message: "Job deleted",
    }))
}

/// POST /api/jobs/{id}/enqueue
pub(super) async fn enqueue_job(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<Json<EnqueueResponse>> {
    let queue_position = state.scheduler().enqueue(&id).await?;
    Ok(Json(EnqueueResponse {
        message: "Job enqueued",
        queue_position,
    }))
}

/// POST /api/jobs/{id}/cancel
pub(super) async fn cancel_job(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>> {
    state.scheduler().cancel(&id).await?;
    Ok(Json(MessageResponse {
        message: "Job removed from queue",
    }))
}

/// PUT /api/jobs/{id}/name
pub(super) async fn rename_job(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(request): Json<RenameRequest>,
) -> Result<Json<BatchRecord>> {
    Ok(Json(state.store().rename(&id, &request.name).await?))
}

/// PUT /api/jobs/{id}/mode
pub(super) async fn set_mode(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(request): Json<ModeRequest>,
) -> Result<Json<BatchRecord>> {
    Ok(Json(state.store().set_mode(&id, request.mode).await?))
}

/// PUT /api/jobs/{id}/device
pub(super) async fn set_device(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(request): Json<DeviceRequest>,
) -> Result<Json<BatchRecord>> {
    Ok(Json(state.store().set_device(&id, request.device).await?))
}
