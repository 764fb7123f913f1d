use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use hf_hub::api::tokio::{Api, ApiBuilder};
use hf_hub::Cache;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Which pretrained OCR checkpoint to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelVariant {
    /// Plain Markdown transcription
    TextOnly,
    /// Markdown plus bounding boxes for embedded images
    TextImage,
}

impl ModelVariant {
    /// HuggingFace repo ID
    pub fn repo_id(&self) -> &'static str {
        match self {
            ModelVariant::TextOnly => "lightonai/LightOnOCR-2-1B",
            ModelVariant::TextImage => "lightonai/LightOnOCR-2-1B-bbox",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ModelVariant::TextOnly => "LightOnOCR 2 1B",
            ModelVariant::TextImage => "LightOnOCR 2 1B (bbox)",
        }
    }

    pub fn emits_bboxes(&self) -> bool {
        matches!(self, ModelVariant::TextImage)
    }
}

impl std::fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.repo_id())
    }
}

/// Files required for a vision model
const REQUIRED_FILES: &[&str] = &[
    "config.json",
    "tokenizer.json",
    "tokenizer_config.json",
    "preprocessor_config.json",
];

/// Optional files to download if present
const OPTIONAL_FILES: &[&str] = &[
    "generation_config.json",
    "processor_config.json",
    "chat_template.json",
    "chat_template.jinja",
    "special_tokens_map.json",
    "model.safetensors.index.json",
];

/// Download progress event
#[derive(Debug, Clone, Serialize)]
pub struct DownloadProgress {
    /// Current file being downloaded
    pub file: String,
    /// Bytes downloaded for current file
    pub downloaded: u64,
    /// Total bytes for current file
    pub total: u64,
    /// Overall progress (0.0 to 1.0)
    pub overall_progress: f32,
    /// Current file index (1-based)
    pub file_index: usize,
    /// Total number of files
    pub total_files: usize,
}

/// Model download status
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status")]
pub enum ModelStatus {
    NotDownloaded,
    Downloading { progress: DownloadProgress },
    Ready { path: PathBuf },
    Failed { error: String },
}

const PROGRESS_THROTTLE: Duration = Duration::from_millis(100);

/// Progress state shared by the clones hf-hub makes for parallel chunk downloads
struct SharedProgress {
    file: Mutex<String>,
    downloaded: AtomicU64,
    total: AtomicU64,
    last_emit: Mutex<Instant>,
}

#[derive(Clone)]
struct ProgressTracker {
    file_index: usize,
    total_files: usize,
    shared: Arc<SharedProgress>,
    tx: mpsc::Sender<DownloadProgress>,
}

impl hf_hub::api::tokio::Progress for ProgressTracker {
    async fn init(&mut self, size: usize, filename: &str) {
        self.shared.total.store(size as u64, Ordering::SeqCst);
        self.shared.downloaded.store(0, Ordering::SeqCst);
        if let Ok(mut file) = self.shared.file.lock() {
            *file = filename.to_string();
        }
        self.emit_progress().await;
    }

    async fn update(&mut self, size: usize) {
        self.shared
            .downloaded
            .fetch_add(size as u64, Ordering::SeqCst);

        let should_emit = self
            .shared
            .last_emit
            .lock()
            .map(|last| last.elapsed() >= PROGRESS_THROTTLE)
            .unwrap_or(true);
        if should_emit {
            self.emit_progress().await;
        }
    }

    async fn finish(&mut self) {
        self.emit_progress().await;
    }
}

impl ProgressTracker {
    async fn emit_progress(&self) {
        let downloaded = self.shared.downloaded.load(Ordering::SeqCst);
        let total = self.shared.total.load(Ordering::SeqCst);
        let file = self
            .shared
            .file
            .lock()
            .map(|f| f.clone())
            .unwrap_or_default();

        let progress = DownloadProgress {
            file,
            downloaded,
            total,
            overall_progress: overall_progress(self.file_index, self.total_files, downloaded, total),
            file_index: self.file_index,
            total_files: self.total_files,
        };
        let _ = self.tx.send(progress).await;
        if let Ok(mut last) = self.shared.last_emit.lock() {
            *last = Instant::now();
        }
    }
}

fn overall_progress(file_index: usize, total_files: usize, downloaded: u64, total: u64) -> f32 {
    if total_files == 0 {
        return 1.0;
    }
    let files_done = file_index.saturating_sub(1) as f32;
    let current = if total > 0 {
        downloaded as f32 / total as f32
    } else {
        0.0
    };
    (files_done + current) / total_files as f32
}

/// Downloads and caches OCR checkpoints from the HuggingFace hub
pub struct ModelManager {
    cache: Cache,
    api: Api,
}

impl ModelManager {
    /// Create a model manager over `cache_dir`
    pub fn new(cache_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir).with_context(|| {
            format!("Model cache directory is not writable: {}", cache_dir.display())
        })?;
        let cache = Cache::new(cache_dir);
        let api = ApiBuilder::new()
            .with_cache_dir(cache.path().clone())
            .with_progress(false)
            .build()
            .context("Failed to create HuggingFace API client")?;

        Ok(Self { cache, api })
    }

    pub fn cache_dir(&self) -> &Path {
        self.cache.path()
    }

    /// Check if a model is fully downloaded
    pub fn is_downloaded(&self, variant: ModelVariant) -> bool {
        let cache_repo = self.cache.model(variant.repo_id().to_string());

        if REQUIRED_FILES.iter().any(|f| cache_repo.get(f).is_none()) {
            return false;
        }

        // The cache can't be enumerated, so probe the usual weight layouts
        cache_repo.get("model.safetensors").is_some()
            || cache_repo.get("model.safetensors.index.json").is_some()
    }

    /// Snapshot directory of a downloaded model
    pub fn model_path(&self, variant: ModelVariant) -> Option<PathBuf> {
        if !self.is_downloaded(variant) {
            return None;
        }
        self.cache
            .model(variant.repo_id().to_string())
            .get("config.json")
            .and_then(|p| p.parent().map(Path::to_path_buf))
    }

    pub fn status(&self, variant: ModelVariant) -> ModelStatus {
        match self.model_path(variant) {
            Some(path) => ModelStatus::Ready { path },
            None => ModelStatus::NotDownloaded,
        }
    }

    /// Full list of files to fetch for `variant`
    async fn files_to_fetch(&self, variant: ModelVariant) -> Result<Vec<String>> {
        let repo = self.api.model(variant.repo_id().to_string());
        let info = repo
            .info()
            .await
            .with_context(|| format!("Failed to get repo info for {}", variant.repo_id()))?;

        let mut files: Vec<String> = REQUIRED_FILES.iter().map(|s| s.to_string()).collect();
        for optional in OPTIONAL_FILES {
            if info.siblings.iter().any(|s| s.rfilename == *optional) {
                files.push(optional.to_string());
            }
        }

        let weights: Vec<String> = info
            .siblings
            .iter()
            .filter(|s| s.rfilename.ends_with(".safetensors") && !s.rfilename.contains('/'))
            .map(|s| s.rfilename.clone())
            .collect();
        if weights.is_empty() {
            anyhow::bail!("No safetensors weights found in {}", variant.repo_id());
        }
        files.extend(weights);

        Ok(files)
    }

    /// Download a model with progress tracking
    pub async fn download_model(
        &self,
        variant: ModelVariant,
        progress_tx: mpsc::Sender<DownloadProgress>,
    ) -> Result<PathBuf> {
        let repo = self.api.model(variant.repo_id().to_string());
        let all_files = self.files_to_fetch(variant).await?;
        let total_files = all_files.len();
        let mut model_dir = None;

        for (idx, filename) in all_files.iter().enumerate() {
            let shared = Arc::new(SharedProgress {
                file: Mutex::new(filename.clone()),
                downloaded: AtomicU64::new(0),
                total: AtomicU64::new(0),
                last_emit: Mutex::new(Instant::now()),
            });

            let progress = ProgressTracker {
                file_index: idx + 1,
                total_files,
                shared,
                tx: progress_tx.clone(),
            };

            let path = repo
                .download_with_progress(filename, progress)
                .await
                .with_context(|| format!("Failed to download {}", filename))?;

            if model_dir.is_none() {
                model_dir = path.parent().map(Path::to_path_buf);
            }
        }

        model_dir.context("No files downloaded")
    }

    /// Make sure the model is in the cache, downloading it on first use.
    pub async fn ensure_downloaded(&self, variant: ModelVariant) -> Result<PathBuf> {
        if let Some(path) = self.model_path(variant) {
            return Ok(path);
        }

        tracing::info!("Downloading {} (first use)...", variant.repo_id());
        let repo = self.api.model(variant.repo_id().to_string());
        for file in self.files_to_fetch(variant).await? {
            repo.get(&file)
                .await
                .with_context(|| format!("Failed to download {}", file))?;
        }

        let config_path = repo.get("config.json").await?;
        config_path
            .parent()
            .map(Path::to_path_buf)
            .context("Invalid model cache path")
    }
}
