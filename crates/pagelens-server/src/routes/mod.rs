//! Route modules for the PageLens server
//!
//! Endpoints (under `/api`):
//! - GET  /health, /system/info
//! - POST /jobs, GET /jobs, GET|DELETE /jobs/{id}
//! - POST /jobs/{id}/enqueue, /jobs/{id}/cancel
//! - PUT  /jobs/{id}/name, /jobs/{id}/mode, /jobs/{id}/device
//! - POST /jobs/{id}/files/add, GET|DELETE /jobs/{id}/files/{file}
//! - PUT  /jobs/{id}/files/{file}/pages, GET /jobs/{id}/files/{file}/page/{n}
//! - GET|PUT /jobs/{id}/results/{file}, GET /jobs/{id}/download/zip
//! - POST /batch/download
//!
//! The WebSocket lives at `/ws`, outside the API prefix.

mod batch;
mod files;
mod jobs;
mod results;
mod system;
pub mod ws;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Router;

use crate::ServerState;

/// Largest accepted request body (multi-file uploads)
pub const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

pub fn api_router() -> Router<ServerState> {
    Router::new()
        .route("/health", get(system::health))
        .route("/system/info", get(system::system_info))
        .route("/jobs", get(jobs::list_jobs).post(jobs::create_job))
        .route("/jobs/{id}", get(jobs::get_job).delete(jobs::delete_job))
        .route("/jobs/{id}/enqueue", post(jobs::enqueue_job))
        .route("/jobs/{id}/cancel", post(jobs::cancel_job))
        .route("/jobs/{id}/name", put(jobs::rename_job))
        .route("/jobs/{id}/mode", put(jobs::set_mode))
        .route("/jobs/{id}/device", put(jobs::set_device))
        .route("/jobs/{id}/files/add", post(files::add_files))
        .route(
            "/jobs/{id}/files/{file}",
            get(files::get_file).delete(files::remove_file),
        )
        .route("/jobs/{id}/files/{file}/pages", put(files::set_pages))
        .route("/jobs/{id}/files/{file}/page/{page}", get(files::get_page))
        .route(
            "/jobs/{id}/results/{file}",
            get(results::get_result).put(results::update_result),
        )
        .route("/jobs/{id}/download/zip", get(batch::download_job))
        .route("/batch/download", post(batch::download_batches))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

/// Raw bytes with a content type guessed from `name`
fn file_response(name: &str, bytes: Vec<u8>, disposition: &str) -> Response {
    let mime = mime_guess::from_path(name).first_or_octet_stream();
    (
        [
            (header::CONTENT_TYPE, header_value(mime.as_ref())),
            (header::CONTENT_DISPOSITION, content_disposition(disposition, name)),
        ],
        bytes,
    )
        .into_response()
}

/// `inline`/`attachment` with an ASCII fallback and the UTF-8 name
fn content_disposition(kind: &str, name: &str) -> HeaderValue {
    let ascii: String = name
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '_' })
        .filter(|c| *c != '"' && *c != '\\')
        .collect();
    header_value(&format!(
        "{}; filename=\"{}\"; filename*=UTF-8''{}",
        kind,
        ascii,
        urlencoding::encode(name)
    ))
}

fn header_value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"))
}
