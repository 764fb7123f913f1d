//! Running one job: classify, render, recognise, write.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use image::DynamicImage;
use tokio::sync::mpsc;

use super::engine::EngineSlot;
use super::types::Job;
use crate::device::Device;
use crate::events::{EventSink, JobEvent};
use crate::input::{validate_input_file, FileKind};
use crate::{ocr, output, pdf, preprocess};

/// Batch-wide settings a job needs while it runs
pub struct JobContext<'a> {
    /// Batch this job belongs to (`job_id` in events)
    pub batch_id: &'a str,
    pub engine: &'a EngineSlot,
    pub device: Device,
    pub pdf_dpi: u32,
    pub page_headers: bool,
}

impl Job {
    /// Run the job to a terminal state.
    ///
    /// Returns `true` on success. On failure every file this job wrote is
    /// removed again, so outputs exist only for successful jobs.
    pub async fn execute(&mut self, ctx: &JobContext<'_>, events: &dyn EventSink) -> bool {
        if let Err(e) = self.start() {
            tracing::warn!(job = %self.id, "Not starting job: {}", e);
            return false;
        }
        tracing::info!(job = %self.id, file = %self.file_path.display(), "Processing");

        let mut written = Vec::new();
        let result = self.run(ctx, events, &mut written).await;

        match result {
            Ok(()) => {
                let outputs = output_names(&written);
                if let Err(e) = self.succeed(written) {
                    tracing::error!(job = %self.id, "{}", e);
                }
                events.emit(JobEvent::FileComplete {
                    job_id: ctx.batch_id.to_string(),
                    file_id: self.id.clone(),
                    success: true,
                    error: None,
                    outputs,
                });
                true
            }
            Err(e) => {
                let error = format!("{:#}", e);
                tracing::error!(job = %self.id, file = %self.file_path.display(), "Job failed: {}", error);
                remove_partial_outputs(&written);
                if let Err(e) = self.fail(error.clone()) {
                    tracing::error!(job = %self.id, "{}", e);
                }
                events.emit(JobEvent::FileComplete {
                    job_id: ctx.batch_id.to_string(),
                    file_id: self.id.clone(),
                    success: false,
                    error: Some(error),
                    outputs: Vec::new(),
                });
                false
            }
        }
    }

    async fn run(
        &self,
        ctx: &JobContext<'_>,
        events: &dyn EventSink,
        written: &mut Vec<PathBuf>,
    ) -> Result<()> {
        let kind = validate_input_file(&self.file_path)?;
        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Failed to create {}", self.output_dir.display()))?;

        match kind {
            FileKind::Image => {
                let path = self.file_path.clone();
                let image = tokio::task::spawn_blocking(move || preprocess::load_image(&path))
                    .await
                    .context("Image decoding task panicked")??;
                self.recognize_unit(ctx, events, &image, None, written)
                    .await?;
            }
            FileKind::Pdf => {
                let total = pdf::page_count(&self.file_path)?;
                let pages = self.page_selection.resolve(total);
                if pages.is_empty() {
                    bail!(
                        "No pages selected by '{}' (document has {} pages)",
                        self.page_selection,
                        total
                    );
                }
                tracing::debug!(job = %self.id, ?pages, "Rendering {} of {} pages", pages.len(), total);

                for page in pages {
                    let path = self.file_path.clone();
                    let dpi = ctx.pdf_dpi;
                    let image =
                        tokio::task::spawn_blocking(move || pdf::render_page(&path, page, dpi))
                            .await
                            .context("PDF rendering task panicked")??;

                    let outputs = self
                        .recognize_unit(ctx, events, &image, Some(page), written)
                        .await
                        .with_context(|| format!("Page {}", page))?;

                    events.emit(JobEvent::PageComplete {
                        job_id: ctx.batch_id.to_string(),
                        file_id: self.id.clone(),
                        page,
                        out_name: output::output_filename(
                            &self.output_stem,
                            Some(page),
                        ),
                        images: output_names(&outputs.images),
                    });
                }
            }
        }

        Ok(())
    }

    /// Recognise one image (a whole image file or one PDF page) and write it.
    async fn recognize_unit(
        &self,
        ctx: &JobContext<'_>,
        events: &dyn EventSink,
        image: &DynamicImage,
        page: Option<u32>,
        written: &mut Vec<PathBuf>,
    ) -> Result<ocr::PageOutput> {
        let prefix = output::image_prefix(&self.output_stem, page);
        let (tx, mut rx) = mpsc::channel::<String>(64);

        let recognize = async {
            let engine = ctx.engine.acquire(self.mode.variant(), ctx.device).await?;
            ocr::recognize_page(
                &*engine,
                image,
                self.mode,
                &self.output_dir,
                &prefix,
                Some(tx),
            )
            .await
        };
        let forward = async {
            while let Some(text) = rx.recv().await {
                events.emit(JobEvent::OcrChunk {
                    job_id: ctx.batch_id.to_string(),
                    file_id: self.id.clone(),
                    page,
                    text,
                });
            }
        };
        let (result, ()) = tokio::join!(recognize, forward);
        let page_output = result?;
        written.extend(page_output.images.iter().cloned());

        let md_path = self
            .output_dir
            .join(output::output_filename(&self.output_stem, page));
        let text = match page {
            Some(n) if ctx.page_headers => format!(
                "# {} - Page {}\n\n{}",
                output::file_stem(&self.file_path),
                n,
                page_output.text
            ),
            _ => page_output.text.clone(),
        };
        output::write_markdown(&md_path, &text)?;
        written.push(md_path);

        Ok(page_output)
    }
}

fn output_names(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .collect()
}

fn remove_partial_outputs(written: &[PathBuf]) {
    for path in written {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove partial output {}: {}", path.display(), e);
            }
        }
    }
}
