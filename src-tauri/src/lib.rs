pub mod cli;
pub mod commands;
pub mod error;
pub mod headless;

use tauri::{AppHandle, Emitter, Manager, Runtime};

use pagelens_core::{AppState, EventSink, JobEvent};

use crate::commands::GuiState;

/// Event name for pipeline progress pushed to the webview
pub const JOB_EVENT: &str = "pagelens://job-event";

/// Event name for model download progress
pub const MODEL_DOWNLOAD_EVENT: &str = "pagelens://model-download";

/// Initialize tracing/logging with the given directives
pub fn init_logging(directives: &[&str]) {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in directives {
        match directive.parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("Ignoring log directive {:?}: {}", directive, e),
        }
    }
    // A subscriber may already be installed (tests)
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Forwards pipeline events to the webview
pub struct TauriSink<R: Runtime> {
    app: AppHandle<R>,
}

impl<R: Runtime> TauriSink<R> {
    pub fn new(app: AppHandle<R>) -> Self {
        Self { app }
    }
}

impl<R: Runtime> EventSink for TauriSink<R> {
    fn emit(&self, event: JobEvent) {
        if let Err(e) = self.app.emit(JOB_EVENT, &event) {
            tracing::error!("Failed to emit job event: {}", e);
        }
    }
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    init_logging(&["pagelens=debug", "pagelens_lib=debug", "pagelens_core=debug"]);
    tracing::info!("Starting PageLens");

    let result = tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .plugin(tauri_plugin_dialog::init())
        .setup(|app| {
            let state = AppState::load()?;
            tracing::info!("Output directory: {:?}", state.config.output_dir);
            app.manage(GuiState::new(state));
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            commands::get_system_info,
            commands::pick_files,
            commands::pick_folder,
            commands::validate_inputs,
            commands::start_processing,
            commands::get_processing_state,
            commands::get_model_status,
            commands::download_model,
            commands::open_output_folder,
        ])
        .run(tauri::generate_context!());

    if let Err(e) = result {
        tracing::error!("Error while running PageLens: {}", e);
        std::process::exit(1);
    }
}
