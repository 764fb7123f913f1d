//! Progress events pushed to front ends.
//!
//! The pipeline never talks to a UI directly. It emits [`JobEvent`]s into an
//! [`EventSink`]; the GUI forwards them to the webview, the server broadcasts
//! them over WebSocket, and the CLI ignores them.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Pipeline progress notification.
///
/// `job_id` is the batch; `file_id` identifies one input within it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// Batches waiting for the worker, in order
    QueueUpdate {
        queue: Vec<String>,
        queue_length: usize,
    },
    JobStatus {
        job_id: String,
        status: String,
        progress: u8,
    },
    JobProgress {
        job_id: String,
        progress: u8,
        current_file: String,
    },
    /// Incremental model output
    OcrChunk {
        job_id: String,
        file_id: String,
        page: Option<u32>,
        text: String,
    },
    PageComplete {
        job_id: String,
        file_id: String,
        page: u32,
        out_name: String,
        images: Vec<String>,
    },
    FileComplete {
        job_id: String,
        file_id: String,
        success: bool,
        error: Option<String>,
        outputs: Vec<String>,
    },
    JobComplete {
        job_id: String,
        status: String,
        progress: u8,
        warning: Option<String>,
    },
    JobError {
        job_id: String,
        error: String,
    },
}

impl JobEvent {
    /// Batch this event belongs to, if any
    pub fn job_id(&self) -> Option<&str> {
        match self {
            JobEvent::QueueUpdate { .. } => None,
            JobEvent::JobStatus { job_id, .. }
            | JobEvent::JobProgress { job_id, .. }
            | JobEvent::OcrChunk { job_id, .. }
            | JobEvent::PageComplete { job_id, .. }
            | JobEvent::FileComplete { job_id, .. }
            | JobEvent::JobComplete { job_id, .. }
            | JobEvent::JobError { job_id, .. } => Some(job_id),
        }
    }
}

/// Receives pipeline events.
///
/// Emission is fire-and-forget: a slow or missing observer must never stall
/// the pipeline.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: JobEvent);
}

/// Discards every event
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: JobEvent) {}
}

/// Fans events out to any number of subscribers.
///
/// Lagging subscribers lose the oldest messages.
#[derive(Clone)]
pub struct ChannelSink {
    tx: broadcast::Sender<JobEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }
}

impl Default for ChannelSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: JobEvent) {
        // No subscribers is not an error
        let _ = self.tx.send(event);
    }
}
