//! On-disk output layout.
//!
//! ```text
//! output/
//! └── 20250101_120000/
//!     ├── report_page_1.md
//!     ├── report_page_1_image_1.png
//!     ├── scan.md
//!     └── metadata.json
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::device::Device;
use crate::jobs::{Job, JobStatus, OcrMode};

/// Directory-name format for a batch
pub const BATCH_DIR_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Name of the per-batch metadata file
pub const METADATA_FILE: &str = "metadata.json";

/// Create a fresh batch directory under `root` named after `now`.
///
/// An existing directory is never reused: a second batch started in the same
/// second gets `_2`, `_3`, ... appended.
pub fn create_batch_dir(root: &Path, now: DateTime<Local>) -> Result<PathBuf> {
    std::fs::create_dir_all(root)
        .with_context(|| format!("Failed to create output root {}", root.display()))?;

    let base = now.format(BATCH_DIR_FORMAT).to_string();
    let mut suffix = 1u32;
    loop {
        let name = if suffix == 1 {
            base.clone()
        } else {
            format!("{}_{}", base, suffix)
        };
        let candidate = root.join(&name);
        match std::fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => suffix += 1,
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to create {}", candidate.display()))
            }
        }
    }
}

/// Markdown file name for an output stem, optionally for one PDF page
pub fn output_filename(stem: &str, page: Option<u32>) -> String {
    match page {
        Some(n) => format!("{}_page_{}.md", stem, n),
        None => format!("{}.md", stem),
    }
}

/// Prefix for cropped region images of an output stem (and page)
pub fn image_prefix(stem: &str, page: Option<u32>) -> String {
    match page {
        Some(n) => format!("{}_page_{}_", stem, n),
        None => format!("{}_", stem),
    }
}

pub fn file_stem(input: &Path) -> String {
    input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string())
}

/// Write Markdown as UTF-8, creating parent directories
pub fn write_markdown(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
}

/// Per-file entry in `metadata.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub input_file: PathBuf,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub output_files: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

impl From<&Job> for FileRecord {
    fn from(job: &Job) -> Self {
        Self {
            input_file: job.file_path.clone(),
            status: job.status.name().to_string(),
            error: job.error().map(str::to_string),
            output_files: job.output_files().to_vec(),
            duration_seconds: job.duration_secs(),
        }
    }
}

/// Batch summary written once to `metadata.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMetadata {
    pub timestamp: DateTime<Local>,
    pub mode: OcrMode,
    pub device: Device,
    pub total_files: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duration_seconds: f64,
    pub files: Vec<FileRecord>,
}

impl BatchMetadata {
    pub fn from_jobs(
        timestamp: DateTime<Local>,
        mode: OcrMode,
        device: Device,
        jobs: &[Job],
        duration_seconds: f64,
    ) -> Self {
        let succeeded = jobs
            .iter()
            .filter(|j| matches!(j.status, JobStatus::Done { .. }))
            .count();
        let failed = jobs
            .iter()
            .filter(|j| matches!(j.status, JobStatus::Failed { .. }))
            .count();

        Self {
            timestamp,
            mode,
            device,
            total_files: jobs.len(),
            succeeded,
            failed,
            duration_seconds,
            files: jobs.iter().map(FileRecord::from).collect(),
        }
    }
}

/// Write `metadata.json` into a batch directory
pub fn write_metadata(dir: &Path, metadata: &BatchMetadata) -> Result<PathBuf> {
    let path = dir.join(METADATA_FILE);
    let json = serde_json::to_string_pretty(metadata)?;
    std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::PageSelection;
    use chrono::TimeZone;

    #[test]
    fn test_output_names() {
        let stem = file_stem(Path::new("/data/Annual Report.pdf"));
        assert_eq!(stem, "Annual Report");
        assert_eq!(output_filename(&stem, Some(3)), "Annual Report_page_3.md");
        assert_eq!(output_filename("scan", None), "scan.md");
        assert_eq!(image_prefix(&stem, Some(1)), "Annual Report_page_1_");
        assert_eq!(image_prefix("a", None), "a_");
        assert_eq!(file_stem(Path::new("/")), "output");
    }

    #[test]
    fn test_batch_dirs_never_collide() {
        let temp_dir = tempfile::tempdir().unwrap();
        let now = Local.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();

        let first = create_batch_dir(temp_dir.path(), now).unwrap();
        let second = create_batch_dir(temp_dir.path(), now).unwrap();
        let third = create_batch_dir(temp_dir.path(), now).unwrap();

        assert_eq!(first.file_name().unwrap(), "20250102_030405");
        assert_eq!(second.file_name().unwrap(), "20250102_030405_2");
        assert_eq!(third.file_name().unwrap(), "20250102_030405_3");
        assert!(first.is_dir() && second.is_dir() && third.is_dir());
    }

    #[test]
    fn test_write_metadata() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut ok = Job::new(
            "1",
            PathBuf::from("a.png"),
            temp_dir.path().to_path_buf(),
            OcrMode::Text,
            PageSelection::All,
        );
        ok.start().unwrap();
        ok.succeed(vec![temp_dir.path().join("a.md")]).unwrap();

        let mut bad = Job::new(
            "2",
            PathBuf::from("b.png"),
            temp_dir.path().to_path_buf(),
            OcrMode::Text,
            PageSelection::All,
        );
        bad.start().unwrap();
        bad.fail("corrupt").unwrap();

        let metadata =
            BatchMetadata::from_jobs(Local::now(), OcrMode::Text, Device::Cpu, &[ok, bad], 1.5);
        let path = write_metadata(temp_dir.path(), &metadata).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["total_files"], 2);
        assert_eq!(json["succeeded"], 1);
        assert_eq!(json["failed"], 1);
        assert_eq!(json["mode"], "text");
        assert_eq!(json["device"], "cpu");
        assert_eq!(json["files"][1]["error"], "corrupt");
        assert!(json["files"][0].get("error").is_none());
    }
}
