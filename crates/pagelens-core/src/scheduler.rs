//! Background worker for web batches.
//!
//! Batches are enqueued by id and drained strictly in order by a single
//! worker task. The worker shares the [`EngineSlot`] with every other front
//! end, so model invocations stay serialised across the whole process.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::device::detect_device;
use crate::events::{EventSink, JobEvent};
use crate::jobs::{EngineSlot, Job, JobOptions, JobQueue, JobStatus};
use crate::store::{BatchRecord, BatchStatus, BatchStore, FileResult, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Job not found: {0}")]
    NotFound(String),
    #[error("Job already in queue")]
    AlreadyQueued(String),
    #[error("Job has no files")]
    NoFiles(String),
    #[error("Job is not waiting in the queue")]
    NotQueued(String),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for SchedulerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => SchedulerError::NotFound(id),
            StoreError::Busy(id) => SchedulerError::AlreadyQueued(id),
            other => SchedulerError::Store(other),
        }
    }
}

/// FIFO of batch ids plus the worker that drains it
pub struct Scheduler {
    store: BatchStore,
    engine: Arc<EngineSlot>,
    events: Arc<dyn EventSink>,
    pdf_dpi: u32,
    queue: Mutex<VecDeque<String>>,
    current: Mutex<Option<String>>,
    wake: Notify,
}

impl Scheduler {
    pub fn new(
        store: BatchStore,
        engine: Arc<EngineSlot>,
        events: Arc<dyn EventSink>,
        pdf_dpi: u32,
    ) -> Self {
        Self {
            store,
            engine,
            events,
            pdf_dpi,
            queue: Mutex::new(VecDeque::new()),
            current: Mutex::new(None),
            wake: Notify::new(),
        }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Batch ids waiting to run, in order
    pub fn queued(&self) -> Vec<String> {
        self.queue().iter().cloned().collect()
    }

    /// Batch currently being processed
    pub fn current(&self) -> Option<String> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Add a batch to the end of the queue. Returns its 1-based position.
    pub async fn enqueue(&self, id: &str) -> Result<usize, SchedulerError> {
        let record = self.store.get(id).await?;
        if record.files.is_empty() {
            return Err(SchedulerError::NoFiles(id.to_string()));
        }
        // Fails for batches already queued or running
        self.store.mark_queued(id).await?;

        let position = {
            let mut queue = self.queue();
            queue.push_back(id.to_string());
            queue.len()
        };
        tracing::info!(job = %id, position, "Job enqueued");

        self.emit_status(id, BatchStatus::Queued, 0);
        self.emit_queue();
        self.wake.notify_one();
        Ok(position)
    }

    /// Remove a batch that has not started yet
    pub async fn cancel(&self, id: &str) -> Result<(), SchedulerError> {
        let removed = {
            let mut queue = self.queue();
            match queue.iter().position(|q| q == id) {
                Some(idx) => queue.remove(idx).is_some(),
                None => false,
            }
        };
        if !removed {
            if !self.store.contains(id).await {
                return Err(SchedulerError::NotFound(id.to_string()));
            }
            return Err(SchedulerError::NotQueued(id.to_string()));
        }

        let record = self.store.mark_unqueued(id).await?;
        tracing::info!(job = %id, "Job removed from queue");
        self.emit_status(id, record.status, 0);
        self.emit_queue();
        Ok(())
    }

    /// Spawn the worker loop. It exits once `shutdown` is cancelled, after
    /// the batch in progress (if any) has finished.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    async fn run(&self, shutdown: CancellationToken) {
        tracing::debug!("Scheduler started");
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            let Some(id) = self.pop() else {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = self.wake.notified() => continue,
                }
            };

            self.set_current(Some(id.clone()));
            self.emit_queue();
            self.run_batch(&id).await;
            self.set_current(None);
        }
        tracing::debug!("Scheduler stopped");
    }

    fn pop(&self) -> Option<String> {
        self.queue().pop_front()
    }

    fn set_current(&self, id: Option<String>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = id;
    }

    async fn run_batch(&self, id: &str) {
        let record = match self.store.get(id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(job = %id, "Skipping job: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.set_status(id, BatchStatus::Running, 0).await {
            tracing::warn!(job = %id, "Failed to mark job running: {}", e);
        }
        self.emit_status(id, BatchStatus::Running, 0);

        let device = detect_device(record.device);
        let mut queue = self.build_queue(&record);
        tracing::info!(job = %id, files = queue.len(), %device, mode = %record.mode, "Starting job");

        let events = self.events.clone();
        let summary = queue
            .process(&self.engine, device, &*self.events, |_, done, total| {
                let progress = ((done * 100) / total.max(1)).min(100) as u8;
                events.emit(JobEvent::JobStatus {
                    job_id: id.to_string(),
                    status: BatchStatus::Running.to_string(),
                    progress,
                });
            })
            .await;

        let results = collect_results(queue.jobs());
        let all_failed = summary.all_failed();
        let status = if all_failed {
            BatchStatus::Failed
        } else {
            BatchStatus::Done
        };

        match self.store.record_results(id, status, results).await {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => {
                // The run recreated the results directory after the delete
                tracing::info!(job = %id, "Job was deleted while running");
                if let Err(e) = self.store.remove_orphan_dir(id).await {
                    tracing::warn!(job = %id, "Failed to remove leftover outputs: {}", e);
                }
                return;
            }
            Err(e) => tracing::error!(job = %id, "Failed to save results: {}", e),
        }

        if all_failed {
            self.emit_status(id, BatchStatus::Failed, 0);
            self.events.emit(JobEvent::JobError {
                job_id: id.to_string(),
                error: format!("All files failed. {}", summary.failure_report()),
            });
        } else {
            self.events.emit(JobEvent::JobComplete {
                job_id: id.to_string(),
                status: BatchStatus::Done.to_string(),
                progress: 100,
                warning: summary.warning(),
            });
        }
    }

    fn build_queue(&self, record: &BatchRecord) -> JobQueue {
        let results_dir = self.store.results_dir(&record.id);
        let files_dir = self.store.files_dir(&record.id);
        let options = JobOptions {
            mode: record.mode,
            device: record.device,
            pdf_dpi: self.pdf_dpi,
            page_headers: true,
            ..JobOptions::default()
        };

        let mut queue = JobQueue::new(record.id.clone(), results_dir.clone(), options);
        for file in &record.files {
            queue.push(Job::new(
                file.id.clone(),
                files_dir.join(&file.name),
                results_dir.clone(),
                record.mode,
                file.pages_sel.clone(),
            ));
        }
        queue
    }

    fn emit_status(&self, id: &str, status: BatchStatus, progress: u8) {
        self.events.emit(JobEvent::JobStatus {
            job_id: id.to_string(),
            status: status.to_string(),
            progress,
        });
    }

    fn emit_queue(&self) {
        let queue = self.queued();
        self.events.emit(JobEvent::QueueUpdate {
            queue_length: queue.len(),
            queue,
        });
    }
}

fn collect_results(jobs: &[Job]) -> BTreeMap<String, FileResult> {
    jobs.iter()
        .map(|job| {
            let mut result = FileResult::default();
            match &job.status {
                JobStatus::Done { output_files, .. } => {
                    for path in output_files {
                        let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string())
                        else {
                            continue;
                        };
                        if is_markdown(path) {
                            result.outputs.push(name);
                        } else {
                            result.images.push(name);
                        }
                    }
                }
                JobStatus::Failed { error, .. } => result.error = Some(error.clone()),
                _ => {}
            }
            (job.id.clone(), result)
        })
        .collect()
}

fn is_markdown(path: &Path) -> bool {
    path.extension().is_some_and(|e| e.eq_ignore_ascii_case("md"))
}
