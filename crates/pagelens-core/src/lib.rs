//! PageLens Core - OCR pipeline shared by every front end
//!
//! This crate contains everything except the user interfaces:
//! - Input validation and PDF page selection/rendering (lopdf, mupdf)
//! - Model download and device selection (hf-hub)
//! - OCR through a vision-language model (mistralrs)
//! - The job queue, output layout, and progress events
//! - Persisted web batches, their scheduler, and ZIP archives

pub mod archive;
pub mod config;
pub mod device;
pub mod events;
pub mod input;
pub mod jobs;
pub mod models;
pub mod ocr;
pub mod output;
pub mod pdf;
pub mod preprocess;
pub mod scheduler;
pub mod store;

use std::sync::Arc;

pub use config::{Config, Settings};
pub use device::{Device, DeviceChoice, SystemInfo};
pub use events::{ChannelSink, EventSink, JobEvent, NoOpSink};
pub use jobs::{create_batch_jobs, EngineSlot, JobOptions, JobQueue, OcrMode};
pub use ocr::{EngineLoader, LocalEngineLoader};
pub use pdf::PageSelection;
pub use scheduler::Scheduler;
pub use store::BatchStore;

/// State shared by the CLI, the desktop app, and the web server
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub settings: Settings,
    /// The one OCR engine of this process
    pub engine: Arc<EngineSlot>,
}

impl AppState {
    /// State backed by the local mistralrs engine
    pub fn new(config: Config, settings: Settings) -> Self {
        let loader = LocalEngineLoader::new(
            config.models_dir.clone(),
            settings.generation.clone(),
            settings.inference_timeout(),
        );
        Self::with_loader(config, settings, Arc::new(loader))
    }

    /// State with a custom engine loader
    pub fn with_loader(config: Config, settings: Settings, loader: Arc<dyn EngineLoader>) -> Self {
        Self {
            config,
            settings,
            engine: Arc::new(EngineSlot::new(loader)),
        }
    }

    /// Load config and settings from their default locations
    pub fn load() -> anyhow::Result<Self> {
        let config = Config::load_or_default();
        config.ensure_dirs()?;
        let settings = Settings::load(&config.settings_file);
        Ok(Self::new(config, settings))
    }

    /// Job options seeded from the saved defaults
    pub fn default_options(&self) -> JobOptions {
        JobOptions {
            mode: self.settings.default_mode,
            device: self.settings.default_device,
            pdf_dpi: self.settings.pdf_dpi,
            ..JobOptions::default()
        }
    }
}
