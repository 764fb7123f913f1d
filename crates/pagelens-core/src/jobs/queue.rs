//! Ordered batches of jobs sharing one output directory.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Local};
use serde::Serialize;

use super::engine::EngineSlot;
use super::execute::JobContext;
use super::types::{Job, JobOptions, JobStatus};
use crate::device::Device;
use crate::events::{EventSink, JobEvent};
use crate::output::{self, BatchMetadata};

/// Short random identifier (hex)
pub fn short_id(len: usize) -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(len);
    id
}

/// Outcome of processing a queue
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duration: Duration,
    /// `(file name, error)` for each failed job
    pub failures: Vec<(String, String)>,
}

impl BatchSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.succeeded == self.total
    }

    pub fn all_failed(&self) -> bool {
        self.total > 0 && self.failed == self.total
    }

    /// `name: error; name: error` over every failed job
    pub fn failure_report(&self) -> String {
        self.failures
            .iter()
            .map(|(name, error)| format!("{}: {}", name, error))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Warning for a batch that completed with some failures
    pub fn warning(&self) -> Option<String> {
        (self.failed > 0 && !self.all_failed()).then(|| {
            format!(
                "{} of {} files failed. {}",
                self.failed,
                self.total,
                self.failure_report()
            )
        })
    }
}

/// FIFO of jobs. Jobs run strictly one after another in insertion order.
#[derive(Debug)]
pub struct JobQueue {
    pub id: String,
    pub output_dir: PathBuf,
    pub created_at: DateTime<Local>,
    pub options: JobOptions,
    jobs: Vec<Job>,
}

impl JobQueue {
    pub fn new(id: impl Into<String>, output_dir: PathBuf, options: JobOptions) -> Self {
        Self {
            id: id.into(),
            output_dir,
            created_at: Local::now(),
            options,
            jobs: Vec::new(),
        }
    }

    /// Append a job for `file_path` using the queue's options
    pub fn push_file(&mut self, id: impl Into<String>, file_path: PathBuf) -> &Job {
        let job = Job::new(
            id,
            file_path,
            self.output_dir.clone(),
            self.options.mode,
            self.options.pages.clone(),
        );
        self.push(job)
    }

    /// Append `job`, renaming its output stem if another job already
    /// writes under it (`report`, `report_2`, ...).
    pub fn push(&mut self, mut job: Job) -> &Job {
        job.output_stem = self.reserve_stem(&job.output_stem);
        self.jobs.push(job);
        &self.jobs[self.jobs.len() - 1]
    }

    fn reserve_stem(&self, stem: &str) -> String {
        // Case-insensitive filesystems would still collide on `Scan` vs `scan`
        let taken = |candidate: &str| {
            self.jobs
                .iter()
                .any(|job| job.output_stem.eq_ignore_ascii_case(candidate))
        };
        if !taken(stem) {
            return stem.to_string();
        }
        (2..)
            .map(|n| format!("{}_{}", stem, n))
            .find(|candidate| !taken(candidate))
            .unwrap_or_else(|| format!("{}_{}", stem, short_id(8)))
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Run every pending job in order.
    ///
    /// A failed job never stops the queue. `on_job_done` is called after each
    /// job with `(job, finished, total)`. `metadata.json` is written once at
    /// the end.
    pub async fn process<F>(
        &mut self,
        engine: &EngineSlot,
        device: Device,
        events: &dyn EventSink,
        mut on_job_done: F,
    ) -> BatchSummary
    where
        F: FnMut(&Job, usize, usize),
    {
        let started = Instant::now();
        let total = self.jobs.len();
        let ctx = JobContext {
            batch_id: &self.id,
            engine,
            device,
            pdf_dpi: self.options.pdf_dpi,
            page_headers: self.options.page_headers,
        };

        for (idx, job) in self.jobs.iter_mut().enumerate() {
            if job.status != JobStatus::Pending {
                continue;
            }
            events.emit(JobEvent::JobProgress {
                job_id: ctx.batch_id.to_string(),
                progress: percent(idx, total),
                current_file: job.file_name(),
            });

            job.execute(&ctx, events).await;
            on_job_done(job, idx + 1, total);
        }

        let duration = started.elapsed();
        let summary = summarize(&self.jobs, duration);

        let metadata = BatchMetadata::from_jobs(
            self.created_at,
            self.options.mode,
            device,
            &self.jobs,
            duration.as_secs_f64(),
        );
        if let Err(e) = output::write_metadata(&self.output_dir, &metadata) {
            tracing::error!("Failed to write batch metadata: {:#}", e);
        }

        tracing::info!(
            batch = %self.id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Batch finished in {:.1}s",
            duration.as_secs_f64()
        );
        summary
    }
}

fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done * 100) / total).min(100) as u8
}

fn summarize(jobs: &[Job], duration: Duration) -> BatchSummary {
    let mut summary = BatchSummary {
        total: jobs.len(),
        succeeded: 0,
        failed: 0,
        duration,
        failures: Vec::new(),
    };
    for job in jobs {
        match &job.status {
            JobStatus::Done { .. } => summary.succeeded += 1,
            JobStatus::Failed { error, .. } => {
                summary.failed += 1;
                summary.failures.push((job.file_name(), error.clone()));
            }
            _ => {}
        }
    }
    summary
}

/// Build one queue for `paths` in a fresh timestamped directory under
/// `output_root`.
pub fn create_batch_jobs(
    paths: &[PathBuf],
    options: &JobOptions,
    output_root: &Path,
) -> Result<JobQueue> {
    let now = Local::now();
    let output_dir = output::create_batch_dir(output_root, now)?;
    let batch_id = output_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| short_id(12));

    let mut queue = JobQueue::new(batch_id, output_dir, options.clone());
    queue.created_at = now;
    for path in paths {
        queue.push_file(short_id(8), path.clone());
    }
    Ok(queue)
}
