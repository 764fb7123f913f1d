use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::device::DeviceChoice;
use crate::jobs::OcrMode;

/// PDF render resolution (pages are rasterised at `dpi / 72` scale)
pub const DEFAULT_PDF_DPI: u32 = 200;

/// Default port for `pagelens serve`
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root data directory (~/.local/share/pagelens)
    pub data_dir: PathBuf,
    /// Model weights cache directory
    pub models_dir: PathBuf,
    /// Root of all OCR output (batch directories and web job cards)
    pub output_dir: PathBuf,
    /// Persisted user settings
    pub settings_file: PathBuf,
    /// Static web UI served by `pagelens serve`
    pub ui_dir: PathBuf,
}

impl Config {
    /// Load configuration or use defaults
    pub fn load_or_default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pagelens");

        let models_dir = std::env::var_os("PAGELENS_MODELS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::cache_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("pagelens")
                    .join("models")
            });

        let output_dir = std::env::var_os("PAGELENS_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("output"));

        Self {
            settings_file: data_dir.join("settings.json"),
            ui_dir: PathBuf::from("ui"),
            data_dir,
            models_dir,
            output_dir,
        }
    }

    /// Configuration rooted entirely under one directory (tests, portable installs)
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            data_dir: root.to_path_buf(),
            models_dir: root.join("models"),
            output_dir: root.join("output"),
            settings_file: root.join("settings.json"),
            ui_dir: root.join("ui"),
        }
    }

    /// Ensure all required directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.models_dir)?;
        std::fs::create_dir_all(&self.output_dir)?;
        Ok(())
    }
}

/// Sampling parameters passed to the model on every page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub max_new_tokens: usize,
    pub temperature: f64,
    pub top_p: f64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_new_tokens: 4096,
            temperature: 0.2,
            top_p: 0.9,
        }
    }
}

/// User settings persisted as JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub pdf_dpi: u32,
    pub generation: GenerationSettings,
    pub default_mode: OcrMode,
    pub default_device: DeviceChoice,
    pub server_port: u16,
    /// Upper bound for a single model invocation. `None` waits forever.
    pub inference_timeout_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pdf_dpi: DEFAULT_PDF_DPI,
            generation: GenerationSettings::default(),
            default_mode: OcrMode::Text,
            default_device: DeviceChoice::Auto,
            server_port: DEFAULT_SERVER_PORT,
            inference_timeout_secs: None,
        }
    }
}

impl Settings {
    /// Load settings from disk, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn load(path: &Path) -> Self {
        let Ok(raw) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Ignoring malformed settings file {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn inference_timeout(&self) -> Option<std::time::Duration> {
        self.inference_timeout_secs
            .map(std::time::Duration::from_secs)
    }
}
