//! Job types and the job state machine.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::device::DeviceChoice;
use crate::models::ModelVariant;
use crate::output;
use crate::pdf::PageSelection;

/// Output flavour requested by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OcrMode {
    /// Markdown only
    #[default]
    #[serde(rename = "text", alias = "text-only", alias = "text_only")]
    Text,
    /// Markdown plus cropped image regions
    #[serde(rename = "text-img", alias = "text_img", alias = "text-image")]
    TextImage,
}

impl OcrMode {
    pub fn variant(&self) -> ModelVariant {
        match self {
            OcrMode::Text => ModelVariant::TextOnly,
            OcrMode::TextImage => ModelVariant::TextImage,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OcrMode::Text => "text",
            OcrMode::TextImage => "text-img",
        }
    }
}

impl std::fmt::Display for OcrMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OcrMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "text-only" | "text_only" => Ok(OcrMode::Text),
            "text-img" | "text_img" | "text-image" | "bbox" => Ok(OcrMode::TextImage),
            other => Err(format!(
                "unknown mode '{}' (expected text or text-img)",
                other
            )),
        }
    }
}

/// Settings shared by every job in a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    pub mode: OcrMode,
    pub pages: PageSelection,
    pub device: DeviceChoice,
    pub pdf_dpi: u32,
    /// Prefix each PDF page's Markdown with `# <stem> - Page <n>`
    pub page_headers: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            mode: OcrMode::Text,
            pages: PageSelection::All,
            device: DeviceChoice::Auto,
            pdf_dpi: crate::config::DEFAULT_PDF_DPI,
            page_headers: false,
        }
    }
}

/// Lifecycle of a job.
///
/// `Pending -> Running -> Done | Failed`. Terminal states never change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum JobStatus {
    Pending,
    Running {
        started_at: DateTime<Utc>,
    },
    Done {
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        output_files: Vec<PathBuf>,
    },
    Failed {
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        error: String,
    },
}

impl JobStatus {
    pub fn name(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running { .. } => "running",
            JobStatus::Done { .. } => "done",
            JobStatus::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done { .. } | JobStatus::Failed { .. })
    }
}

/// Rejected state change
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid job transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: &'static str,
    pub to: &'static str,
}

/// One input file to run through the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub file_path: PathBuf,
    pub output_dir: PathBuf,
    pub mode: OcrMode,
    pub page_selection: PageSelection,
    /// Base name of every file this job writes, unique within its batch
    #[serde(default)]
    pub output_stem: String,
    pub status: JobStatus,
}

impl Job {
    pub fn new(
        id: impl Into<String>,
        file_path: PathBuf,
        output_dir: PathBuf,
        mode: OcrMode,
        page_selection: PageSelection,
    ) -> Self {
        Self {
            id: id.into(),
            output_stem: output::file_stem(&file_path),
            file_path,
            output_dir,
            mode,
            page_selection,
            status: JobStatus::Pending,
        }
    }

    /// File name for display
    pub fn file_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.file_path.display().to_string())
    }

    pub fn start(&mut self) -> Result<(), TransitionError> {
        match self.status {
            JobStatus::Pending => {
                self.status = JobStatus::Running {
                    started_at: Utc::now(),
                };
                Ok(())
            }
            ref other => Err(TransitionError {
                from: other.name(),
                to: "running",
            }),
        }
    }

    pub fn succeed(&mut self, output_files: Vec<PathBuf>) -> Result<(), TransitionError> {
        match self.status {
            JobStatus::Running { started_at } => {
                self.status = JobStatus::Done {
                    started_at,
                    finished_at: Utc::now(),
                    output_files,
                };
                Ok(())
            }
            ref other => Err(TransitionError {
                from: other.name(),
                to: "done",
            }),
        }
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        match self.status {
            JobStatus::Running { started_at } => {
                let mut error = error.into();
                if error.trim().is_empty() {
                    error = "Unknown error".to_string();
                }
                self.status = JobStatus::Failed {
                    started_at,
                    finished_at: Utc::now(),
                    error,
                };
                Ok(())
            }
            ref other => Err(TransitionError {
                from: other.name(),
                to: "failed",
            }),
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            JobStatus::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Files produced by a successful job; empty otherwise
    pub fn output_files(&self) -> &[PathBuf] {
        match &self.status {
            JobStatus::Done { output_files, .. } => output_files,
            _ => &[],
        }
    }

    /// Wall-clock seconds for a finished job
    pub fn duration_secs(&self) -> Option<f64> {
        match &self.status {
            JobStatus::Done {
                started_at,
                finished_at,
                ..
            }
            | JobStatus::Failed {
                started_at,
                finished_at,
                ..
            } => Some((*finished_at - *started_at).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }
}
