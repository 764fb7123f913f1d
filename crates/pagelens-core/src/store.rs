//! Persisted web batches ("cards").
//!
//! ```text
//! output/
//! ├── cards.json            index of every batch
//! └── <batch_id>/
//!     ├── files/            uploads
//!     └── results/          Markdown, crops, metadata.json
//! ```
//!
//! The index is kept in memory and written through on every change.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::device::DeviceChoice;
use crate::input::{file_kind, FileKind, InputError};
use crate::jobs::{short_id, OcrMode};
use crate::pdf::{self, PageSelection};

pub const CARDS_FILE: &str = "cards.json";
const FILES_DIR: &str = "files";
const RESULTS_DIR: &str = "results";

/// Errors from the batch store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    NotFound(String),
    #[error("File not found: {0}")]
    FileNotFound(String),
    #[error("Invalid file name: {0:?}")]
    InvalidName(String),
    #[error(transparent)]
    Unsupported(#[from] InputError),
    #[error("Job {0} is already queued or running")]
    Busy(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to encode job index: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where a batch is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// No files yet
    #[default]
    Idle,
    /// Has files, can be enqueued
    Ready,
    Queued,
    Running,
    Done,
    Failed,
}

impl BatchStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, BatchStatus::Queued | BatchStatus::Running)
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BatchStatus::Idle => "idle",
            BatchStatus::Ready => "ready",
            BatchStatus::Queued => "queued",
            BatchStatus::Running => "running",
            BatchStatus::Done => "done",
            BatchStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One uploaded input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFile {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    pub pages_sel: PageSelection,
    pub page_count: u32,
}

/// Outcome for one file of a finished batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResult {
    /// Markdown files in page order
    pub outputs: Vec<String>,
    /// Cropped region images
    pub images: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A persisted batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRecord {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Local>,
    /// Client-chosen category (e.g. "img" or "pdf")
    pub kind: String,
    pub files: Vec<BatchFile>,
    pub mode: OcrMode,
    pub device: DeviceChoice,
    pub status: BatchStatus,
    pub progress: u8,
    #[serde(default)]
    pub results: BTreeMap<String, FileResult>,
}

impl BatchRecord {
    pub fn file(&self, file_id: &str) -> Option<&BatchFile> {
        self.files.iter().find(|f| f.id == file_id)
    }

    fn status_for_files(&self) -> BatchStatus {
        if self.files.is_empty() {
            BatchStatus::Idle
        } else {
            BatchStatus::Ready
        }
    }
}

/// Uploaded file contents
#[derive(Debug, Clone)]
pub struct Upload {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Reduce a client-supplied name to a bare file name.
///
/// Directory components are dropped; empty names, `.`/`..` and control
/// characters are rejected.
pub fn sanitize_filename(raw: &str) -> Result<String, StoreError> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if base.is_empty() || base == "." || base == ".." || base.chars().any(char::is_control) {
        return Err(StoreError::InvalidName(raw.to_string()));
    }
    Ok(base.to_string())
}

/// Keep letters, digits, spaces, `-` and `_` (ZIP names, download names)
pub fn safe_display_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "results".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Persistent batch index rooted at the output directory
#[derive(Clone)]
pub struct BatchStore {
    root: PathBuf,
    cards: Arc<RwLock<BTreeMap<String, BatchRecord>>>,
}

impl BatchStore {
    /// Open (or create) the store under `root`.
    ///
    /// A corrupt index is logged and treated as empty.
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(root)?;
        let index = root.join(CARDS_FILE);

        let cards = match std::fs::read_to_string(&index) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!("Ignoring corrupt job index {:?}: {}", index, e);
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            root: root.to_path_buf(),
            cards: Arc::new(RwLock::new(cards)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files_dir(&self, id: &str) -> PathBuf {
        self.root.join(id).join(FILES_DIR)
    }

    pub fn results_dir(&self, id: &str) -> PathBuf {
        self.root.join(id).join(RESULTS_DIR)
    }

    fn persist(&self, cards: &BTreeMap<String, BatchRecord>) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(cards)?;
        let tmp = self.root.join(format!("{}.tmp", CARDS_FILE));
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, self.root.join(CARDS_FILE))?;
        Ok(())
    }

    /// Apply `f` to a record and persist the index
    async fn update<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut BatchRecord) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut cards = self.cards.write().await;
        let record = cards
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let value = f(record)?;
        self.persist(&cards)?;
        Ok(value)
    }

    /// Save uploads under `files/`, returning their descriptors.
    ///
    /// Every name is validated before anything is written.
    fn save_uploads(
        &self,
        id: &str,
        existing: &[BatchFile],
        uploads: Vec<Upload>,
    ) -> Result<Vec<BatchFile>, StoreError> {
        let mut named = Vec::with_capacity(uploads.len());
        for upload in uploads {
            let name = sanitize_filename(&upload.name)?;
            let kind = file_kind(Path::new(&name)).ok_or_else(|| InputError::Unsupported {
                path: PathBuf::from(&name),
                extension: Path::new(&name)
                    .extension()
                    .map(|e| format!(".{}", e.to_string_lossy()))
                    .unwrap_or_else(|| "(none)".to_string()),
            })?;
            named.push((name, kind, upload.bytes));
        }

        let files_dir = self.files_dir(id);
        std::fs::create_dir_all(&files_dir)?;

        let mut taken: Vec<String> = existing.iter().map(|f| f.name.clone()).collect();
        let mut saved = Vec::with_capacity(named.len());
        for (name, kind, bytes) in named {
            let name = unique_name(&name, &taken);
            let path = files_dir.join(&name);
            std::fs::write(&path, &bytes)?;

            let page_count = match kind {
                FileKind::Pdf => pdf::page_count(&path).unwrap_or_else(|e| {
                    tracing::warn!("Failed to count pages of {}: {:#}", name, e);
                    1
                }),
                FileKind::Image => 1,
            };

            taken.push(name.clone());
            saved.push(BatchFile {
                id: short_id(8),
                name,
                kind,
                pages_sel: PageSelection::All,
                page_count,
            });
        }
        Ok(saved)
    }

    /// Create a batch from uploads
    pub async fn create(
        &self,
        kind: &str,
        mode: OcrMode,
        device: DeviceChoice,
        uploads: Vec<Upload>,
    ) -> Result<BatchRecord, StoreError> {
        let id = short_id(12);
        let files = match self.save_uploads(&id, &[], uploads) {
            Ok(files) => files,
            Err(e) => {
                let _ = std::fs::remove_dir_all(self.root.join(&id));
                return Err(e);
            }
        };
        std::fs::create_dir_all(self.results_dir(&id))?;

        let now = Local::now();
        let mut record = BatchRecord {
            id: id.clone(),
            name: now.format("%Y-%m-%d %H:%M:%S").to_string(),
            created_at: now,
            kind: kind.to_string(),
            files,
            mode,
            device,
            status: BatchStatus::Idle,
            progress: 0,
            results: BTreeMap::new(),
        };
        record.status = record.status_for_files();

        let mut cards = self.cards.write().await;
        cards.insert(id.clone(), record.clone());
        self.persist(&cards)?;

        tracing::info!(job = %id, files = record.files.len(), "Created job");
        Ok(record)
    }

    /// All batches, oldest first
    pub async fn list(&self) -> Vec<BatchRecord> {
        let mut records: Vec<_> = self.cards.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        records
    }

    pub async fn get(&self, id: &str) -> Result<BatchRecord, StoreError> {
        self.cards
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.cards.read().await.contains_key(id)
    }

    pub async fn rename(&self, id: &str, name: &str) -> Result<BatchRecord, StoreError> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(StoreError::InvalidName(name));
        }
        self.update(id, |record| {
            record.name = name;
            Ok(record.clone())
        })
        .await
    }

    pub async fn set_mode(&self, id: &str, mode: OcrMode) -> Result<BatchRecord, StoreError> {
        self.update(id, |record| {
            record.mode = mode;
            Ok(record.clone())
        })
        .await
    }

    pub async fn set_device(
        &self,
        id: &str,
        device: DeviceChoice,
    ) -> Result<BatchRecord, StoreError> {
        self.update(id, |record| {
            record.device = device;
            Ok(record.clone())
        })
        .await
    }

    /// Add uploads to an existing batch
    pub async fn add_files(
        &self,
        id: &str,
        uploads: Vec<Upload>,
    ) -> Result<Vec<BatchFile>, StoreError> {
        let existing = self.get(id).await?;
        if existing.status.is_active() {
            return Err(StoreError::Busy(id.to_string()));
        }
        let added = self.save_uploads(id, &existing.files, uploads)?;

        self.update(id, |record| {
            record.files.extend(added.iter().cloned());
            if !record.status.is_active() {
                record.status = match record.status {
                    BatchStatus::Idle => BatchStatus::Ready,
                    other => other,
                };
            }
            Ok(added.clone())
        })
        .await
    }

    /// Remove one file and its upload
    pub async fn remove_file(&self, id: &str, file_id: &str) -> Result<BatchRecord, StoreError> {
        let files_dir = self.files_dir(id);
        self.update(id, |record| {
            if record.status.is_active() {
                return Err(StoreError::Busy(record.id.clone()));
            }
            let idx = record
                .files
                .iter()
                .position(|f| f.id == file_id)
                .ok_or_else(|| StoreError::FileNotFound(file_id.to_string()))?;
            let file = record.files.remove(idx);
            record.results.remove(file_id);

            match std::fs::remove_file(files_dir.join(&file.name)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to delete upload {}: {}", file.name, e),
            }

            if record.files.is_empty() {
                record.status = BatchStatus::Idle;
            }
            Ok(record.clone())
        })
        .await
    }

    /// Change which pages of a PDF are processed
    pub async fn set_pages(
        &self,
        id: &str,
        file_id: &str,
        pages: PageSelection,
    ) -> Result<BatchFile, StoreError> {
        self.update(id, |record| {
            let file = record
                .files
                .iter_mut()
                .find(|f| f.id == file_id)
                .ok_or_else(|| StoreError::FileNotFound(file_id.to_string()))?;
            file.pages_sel = pages;
            Ok(file.clone())
        })
        .await
    }

    /// Delete a batch with its uploads and results
    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut cards = self.cards.write().await;
        if cards.remove(id).is_none() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        self.persist(&cards)?;
        drop(cards);

        let dir = self.root.join(id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        tracing::info!(job = %id, "Deleted job");
        Ok(())
    }

    /// Remove whatever a run wrote for a batch whose card is already gone
    pub async fn remove_orphan_dir(&self, id: &str) -> Result<(), StoreError> {
        if self.cards.read().await.contains_key(id) {
            return Ok(());
        }
        match std::fs::remove_dir_all(self.root.join(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Path of an existing upload
    pub async fn upload_path(&self, id: &str, filename: &str) -> Result<PathBuf, StoreError> {
        self.get(id).await?;
        let path = self.files_dir(id).join(sanitize_filename(filename)?);
        if !path.is_file() {
            return Err(StoreError::FileNotFound(filename.to_string()));
        }
        Ok(path)
    }

    /// Path for a result file (may not exist yet)
    pub fn result_path(&self, id: &str, filename: &str) -> Result<PathBuf, StoreError> {
        Ok(self.results_dir(id).join(sanitize_filename(filename)?))
    }

    pub async fn read_result(&self, id: &str, filename: &str) -> Result<String, StoreError> {
        self.get(id).await?;
        let path = self.result_path(id, filename)?;
        std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StoreError::FileNotFound(filename.to_string()),
            _ => e.into(),
        })
    }

    /// Overwrite a result with edited content
    pub async fn write_result(
        &self,
        id: &str,
        filename: &str,
        content: &str,
    ) -> Result<PathBuf, StoreError> {
        self.get(id).await?;
        let path = self.result_path(id, filename)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Mark a batch queued unless it is already active
    pub async fn mark_queued(&self, id: &str) -> Result<BatchRecord, StoreError> {
        self.update(id, |record| {
            if record.status.is_active() {
                return Err(StoreError::Busy(record.id.clone()));
            }
            record.status = BatchStatus::Queued;
            record.progress = 0;
            Ok(record.clone())
        })
        .await
    }

    /// Undo [`mark_queued`](Self::mark_queued) for a batch that never started
    pub async fn mark_unqueued(&self, id: &str) -> Result<BatchRecord, StoreError> {
        self.update(id, |record| {
            if record.status == BatchStatus::Queued {
                record.status = record.status_for_files();
                record.progress = 0;
            }
            Ok(record.clone())
        })
        .await
    }

    pub async fn set_status(
        &self,
        id: &str,
        status: BatchStatus,
        progress: u8,
    ) -> Result<(), StoreError> {
        self.update(id, |record| {
            record.status = status;
            record.progress = progress.min(100);
            Ok(())
        })
        .await
    }

    /// Store the outcome of a run
    pub async fn record_results(
        &self,
        id: &str,
        status: BatchStatus,
        results: BTreeMap<String, FileResult>,
    ) -> Result<(), StoreError> {
        self.update(id, |record| {
            record.status = status;
            record.progress = if status == BatchStatus::Done { 100 } else { 0 };
            record.results = results;
            Ok(())
        })
        .await
    }

    /// Return batches left queued or running by a previous process to
    /// `Ready`. Returns how many were reset.
    pub async fn reset_interrupted(&self) -> Result<usize, StoreError> {
        let mut cards = self.cards.write().await;
        let mut reset = 0;
        for record in cards.values_mut().filter(|r| r.status.is_active()) {
            record.status = record.status_for_files();
            record.progress = 0;
            reset += 1;
        }
        if reset > 0 {
            self.persist(&cards)?;
            tracing::info!("Reset {} interrupted jobs", reset);
        }
        Ok(reset)
    }
}

/// `name` or `stem_2.ext`, `stem_3.ext`, ... if already taken
fn unique_name(name: &str, taken: &[String]) -> String {
    if !taken.iter().any(|t| t == name) {
        return name.to_string();
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (2..)
        .map(|n| format!("{}_{}{}", stem, n, ext))
        .find(|candidate| !taken.iter().any(|t| t == candidate))
        .unwrap_or_else(|| name.to_string())
}
