//! Tauri commands for the desktop window.
//!
//! The window runs one batch at a time. Progress reaches the webview as
//! [`JobEvent`]s on [`JOB_EVENT`](crate::JOB_EVENT); commands themselves only
//! validate, start, and report.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tauri::{AppHandle, Emitter, Runtime, State};
use tauri_plugin_dialog::DialogExt;
use tauri_plugin_opener::OpenerExt;
use tokio::sync::{mpsc, oneshot};

use pagelens_core::device::detect_device;
use pagelens_core::input::{
    collect_inputs, file_kind, FileKind, SUPPORTED_IMAGE_EXTENSIONS, SUPPORTED_PDF_EXTENSION,
};
use pagelens_core::jobs::BatchSummary;
use pagelens_core::models::{ModelManager, ModelStatus};
use pagelens_core::{
    create_batch_jobs, pdf, AppState, DeviceChoice, EngineSlot, EventSink, JobEvent, JobOptions,
    JobQueue, OcrMode, PageSelection, SystemInfo,
};

use crate::error::{CommandError, CommandResult, ResultExt};
use crate::{TauriSink, MODEL_DOWNLOAD_EVENT};


/// Managed state of the desktop window
pub struct GuiState {
    pub app: AppState,
    active: Arc<Mutex<Option<ActiveBatch>>>,
}

impl GuiState {
    pub fn new(app: AppState) -> Self {
        Self {
            app,
            active: Arc::new(Mutex::new(None)),
        }
    }

    fn active(&self) -> MutexGuard<'_, Option<ActiveBatch>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Saved defaults overridden by whatever the window sent
    fn job_options(
        &self,
        mode: Option<&str>,
        pages: Option<&str>,
        device: Option<&str>,
    ) -> CommandResult<JobOptions> {
        let mut options = self.app.default_options();
        if let Some(mode) = non_empty(mode) {
            options.mode = mode
                .parse::<OcrMode>()
                .map_err(CommandError::invalid_option)?;
        }
        if let Some(device) = non_empty(device) {
            options.device = device
                .parse::<DeviceChoice>()
                .map_err(CommandError::invalid_option)?;
        }
        if let Some(pages) = pages {
            options.pages = PageSelection::parse(pages);
        }
        Ok(options)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// The batch the window is currently processing
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveBatch {
    pub batch_id: String,
    pub output_dir: PathBuf,
    pub total: usize,
}

/// One accepted input
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputFile {
    pub path: PathBuf,
    pub name: String,
    pub kind: FileKind,
    /// Only for PDFs
    pub page_count: Option<u32>,
}

/// One rejected input and why
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedInput {
    pub path: PathBuf,
    pub error: String,
}

/// Result of checking the files dropped on or picked in the window
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputReport {
    pub files: Vec<InputFile>,
    pub rejected: Vec<RejectedInput>,
}

fn inspect_inputs(paths: &[String]) -> InputReport {
    let collected = collect_inputs(paths);
    let mut report = InputReport {
        files: Vec::with_capacity(collected.files.len()),
        rejected: collected
            .rejected
            .into_iter()
            .map(|(path, error)| RejectedInput {
                path,
                error: error.to_string(),
            })
            .collect(),
    };

    for path in collected.files {
        let Some(kind) = file_kind(&path) else {
            continue;
        };
        let page_count = match kind {
            FileKind::Image => None,
            FileKind::Pdf => match pdf::page_count(&path) {
                Ok(count) => Some(count),
                Err(e) => {
                    report.rejected.push(RejectedInput {
                        error: format!("Invalid or corrupted PDF: {:#}", e),
                        path,
                    });
                    continue;
                }
            },
        };
        report.files.push(InputFile {
            name: display_name(&path),
            path,
            kind,
            page_count,
        });
    }

    report
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn dialog_extensions() -> Vec<&'static str> {
    SUPPORTED_IMAGE_EXTENSIONS
        .iter()
        .copied()
        .chain(std::iter::once(SUPPORTED_PDF_EXTENSION))
        .collect()
}

/// OS, CPU and accelerator summary
#[tauri::command]
pub async fn get_system_info() -> CommandResult<SystemInfo> {
    tokio::task::spawn_blocking(SystemInfo::probe)
        .await
        .internal_err()
}

/// Native multi-file picker filtered to supported formats
#[tauri::command]
pub async fn pick_files<R: Runtime>(app: AppHandle<R>) -> CommandResult<Vec<String>> {
    let (tx, rx) = oneshot::channel();
    app.dialog()
        .file()
        .add_filter("Images and PDFs", &dialog_extensions())
        .pick_files(move |paths| {
            let _ = tx.send(paths);
        });

    let paths = rx
        .await
        .map_err(|_| CommandError::dialog("File dialog closed unexpectedly"))?;

    Ok(paths
        .unwrap_or_default()
        .into_iter()
        .filter_map(|p| p.into_path().ok())
        .map(|p| p.display().to_string())
        .collect())
}

/// Native folder picker; the folder expands to its supported files on validation
#[tauri::command]
pub async fn pick_folder<R: Runtime>(app: AppHandle<R>) -> CommandResult<Option<String>> {
    let (tx, rx) = oneshot::channel();
    app.dialog().file().pick_folder(move |path| {
        let _ = tx.send(path);
    });

    let path = rx
        .await
        .map_err(|_| CommandError::dialog("Folder dialog closed unexpectedly"))?;

    Ok(path
        .and_then(|p| p.into_path().ok())
        .map(|p| p.display().to_string()))
}

/// Check paths before processing: existence, format, PDF page counts
#[tauri::command]
pub async fn validate_inputs(paths: Vec<String>) -> CommandResult<InputReport> {
    tokio::task::spawn_blocking(move || inspect_inputs(&paths))
        .await
        .internal_err()
}

/// Start a batch over `files`. Returns as soon as the batch is queued.
#[tauri::command]
pub async fn start_processing<R: Runtime>(
    app: AppHandle<R>,
    state: State<'_, GuiState>,
    files: Vec<String>,
    mode: Option<String>,
    pages: Option<String>,
    device: Option<String>,
) -> CommandResult<ActiveBatch> {
    let options = state.job_options(mode.as_deref(), pages.as_deref(), device.as_deref())?;

    let collected = collect_inputs(&files);
    for (path, error) in &collected.rejected {
        tracing::warn!("Skipping {:?}: {}", path, error);
    }
    if collected.files.is_empty() {
        return Err(CommandError::no_inputs());
    }

    let (mut queue, batch) = {
        let mut active = state.active();
        if active.is_some() {
            return Err(CommandError::busy());
        }
        let queue = create_batch_jobs(&collected.files, &options, &state.app.config.output_dir)?;
        let batch = ActiveBatch {
            batch_id: queue.id.clone(),
            output_dir: queue.output_dir.clone(),
            total: queue.len(),
        };
        *active = Some(batch.clone());
        (queue, batch)
    };

    tracing::info!(
        batch = %batch.batch_id,
        files = batch.total,
        mode = %options.mode,
        "Starting batch"
    );

    let engine = state.app.engine.clone();
    let active = state.active.clone();
    tauri::async_runtime::spawn(async move {
        let sink = TauriSink::new(app);
        process_batch(&mut queue, &engine, &sink).await;
        *active.lock().unwrap_or_else(PoisonError::into_inner) = None;
    });

    Ok(batch)
}

/// Batch currently running, if any
#[tauri::command]
pub fn get_processing_state(state: State<'_, GuiState>) -> Option<ActiveBatch> {
    state.active().clone()
}

/// Load the model and drain the queue, reporting the outcome as events.
///
/// Returns `None` when the model could not be loaded.
pub(crate) async fn process_batch(
    queue: &mut JobQueue,
    engine: &EngineSlot,
    events: &dyn EventSink,
) -> Option<BatchSummary> {
    let job_id = queue.id.clone();
    let device = detect_device(queue.options.device);

    events.emit(JobEvent::JobStatus {
        job_id: job_id.clone(),
        status: "running".to_string(),
        progress: 0,
    });

    if let Err(e) = engine.preload(queue.options.mode.variant(), device).await {
        tracing::error!(batch = %job_id, "Failed to load OCR model: {:#}", e);
        events.emit(JobEvent::JobError {
            job_id,
            error: format!("Failed to load OCR model: {:#}", e),
        });
        return None;
    }

    let summary = queue
        .process(engine, device, events, |job, done, total| {
            tracing::debug!(
                batch = %job_id,
                status = job.status.name(),
                "[{}/{}] {}",
                done,
                total,
                job.file_name()
            );
        })
        .await;

    if summary.all_failed() {
        events.emit(JobEvent::JobError {
            job_id,
            error: format!("All files failed. {}", summary.failure_report()),
        });
    } else {
        events.emit(JobEvent::JobComplete {
            job_id,
            status: "done".to_string(),
            progress: 100,
            warning: summary.warning(),
        });
    }

    Some(summary)
}

fn mode_or_default(state: &GuiState, mode: Option<&str>) -> CommandResult<OcrMode> {
    match non_empty(mode) {
        Some(mode) => mode.parse().map_err(CommandError::invalid_option),
        None => Ok(state.app.settings.default_mode),
    }
}

/// Whether the checkpoint for `mode` is in the local cache
#[tauri::command]
pub async fn get_model_status(
    state: State<'_, GuiState>,
    mode: Option<String>,
) -> CommandResult<ModelStatus> {
    let variant = mode_or_default(&state, mode.as_deref())?.variant();
    let manager = ModelManager::new(state.app.config.models_dir.clone()).model_err()?;
    Ok(manager.status(variant))
}

/// Download the checkpoint for `mode`, pushing progress on
/// [`MODEL_DOWNLOAD_EVENT`].
#[tauri::command]
pub async fn download_model<R: Runtime>(
    app: AppHandle<R>,
    state: State<'_, GuiState>,
    mode: Option<String>,
) -> CommandResult<String> {
    let variant = mode_or_default(&state, mode.as_deref())?.variant();
    let manager = ModelManager::new(state.app.config.models_dir.clone()).model_err()?;

    let (tx, mut rx) = mpsc::channel(100);
    let app_handle = app.clone();
    let forward = tauri::async_runtime::spawn(async move {
        while let Some(progress) = rx.recv().await {
            if let Err(e) = app_handle.emit(MODEL_DOWNLOAD_EVENT, &progress) {
                tracing::error!("Failed to emit download progress: {}", e);
            }
        }
    });

    let result = manager.download_model(variant, tx).await;
    let _ = forward.await;

    let path = result.model_err()?;
    tracing::info!("Model {} ready at {:?}", variant.repo_id(), path);
    Ok(path.display().to_string())
}

/// Reveal a batch directory (or the output root) in the file manager
#[tauri::command]
pub async fn open_output_folder<R: Runtime>(
    app: AppHandle<R>,
    state: State<'_, GuiState>,
    path: Option<String>,
) -> CommandResult<()> {
    let target = match non_empty(path.as_deref()) {
        Some(path) => PathBuf::from(path),
        None => state.app.config.output_dir.clone(),
    };
    std::fs::create_dir_all(&target)?;

    app.opener()
        .open_path(target.display().to_string(), None::<&str>)
        .internal_err()
}
