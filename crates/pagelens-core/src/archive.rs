//! ZIP downloads of batch results.

use std::io::{Cursor, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::device::DeviceChoice;
use crate::jobs::OcrMode;
use crate::output;
use crate::store::{safe_display_name, BatchRecord};

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Manifest<'a> {
    job_name: &'a str,
    kind: &'a str,
    device: DeviceChoice,
    mode: OcrMode,
    outputs: Vec<ManifestEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ManifestEntry {
    input: String,
    out: Vec<String>,
    pages_sel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<'a> Manifest<'a> {
    fn for_record(record: &'a BatchRecord) -> Self {
        let outputs = record
            .files
            .iter()
            .map(|file| {
                let result = record.results.get(&file.id);
                let out = match result {
                    Some(r) if !r.outputs.is_empty() => r.outputs.clone(),
                    _ => vec![output::output_filename(
                        &output::file_stem(Path::new(&file.name)),
                        None,
                    )],
                };
                ManifestEntry {
                    input: file.name.clone(),
                    out,
                    pages_sel: file.pages_sel.to_string(),
                    error: result.and_then(|r| r.error.clone()),
                }
            })
            .collect();

        Self {
            job_name: &record.name,
            kind: &record.kind,
            device: record.device,
            mode: record.mode,
            outputs,
        }
    }
}

/// Download name for one batch: `<name>_results.zip`
pub fn batch_zip_name(record: &BatchRecord) -> String {
    format!("{}_results.zip", safe_display_name(&record.name))
}

/// Download name for several batches
pub fn multi_batch_zip_name(now: DateTime<Local>) -> String {
    format!("batch_results_{}.zip", now.format("%Y%m%d_%H%M%S"))
}

/// ZIP of one batch: every result file plus `manifest.json`
pub fn batch_zip(record: &BatchRecord, results_dir: &Path) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    add_batch(&mut zip, record, results_dir, "")?;
    let cursor = zip.finish().context("Failed to finish ZIP")?;
    Ok(cursor.into_inner())
}

/// ZIP of several batches, each under a folder named after the batch
pub fn multi_batch_zip(batches: &[(BatchRecord, &Path)]) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let mut folders: Vec<String> = Vec::with_capacity(batches.len());

    for (record, results_dir) in batches {
        let base = safe_display_name(&record.name);
        let mut folder = base.clone();
        let mut n = 2;
        while folders.contains(&folder) {
            folder = format!("{}_{}", base, n);
            n += 1;
        }

        add_batch(&mut zip, record, results_dir, &format!("{}/", folder))?;
        folders.push(folder);
    }

    let cursor = zip.finish().context("Failed to finish ZIP")?;
    Ok(cursor.into_inner())
}

fn add_batch<W: Write + std::io::Seek>(
    zip: &mut ZipWriter<W>,
    record: &BatchRecord,
    results_dir: &Path,
    prefix: &str,
) -> Result<()> {
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let mut entries: Vec<_> = match std::fs::read_dir(results_dir) {
        Ok(dir) => dir
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", results_dir.display()))
        }
    };
    entries.sort();

    for path in entries {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };
        if name == MANIFEST_FILE {
            continue;
        }
        let bytes =
            std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        zip.start_file(format!("{}{}", prefix, name), options)?;
        zip.write_all(&bytes)?;
    }

    let manifest = serde_json::to_vec_pretty(&Manifest::for_record(record))?;
    zip.start_file(format!("{}{}", prefix, MANIFEST_FILE), options)?;
    zip.write_all(&manifest)?;

    tracing::debug!(job = %record.id, "Archived results");
    Ok(())
}
