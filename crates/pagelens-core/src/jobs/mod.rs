//! Batch OCR pipeline.
//!
//! ```text
//! create_batch_jobs()            JobQueue::process()
//!        │                              │
//!        ▼                              ▼
//!  output/<timestamp>/   ──►   Job::execute()  (one at a time, in order)
//!                                       │
//!                         ┌─────────────┴─────────────┐
//!                         ▼                           ▼
//!                  image: load_image           pdf: render_page (per page)
//!                         │                           │
//!                         └───────► EngineSlot ◄──────┘
//!                                  (one model call in flight)
//!                                       │
//!                                       ▼
//!                            <stem>[_page_<n>].md + crops
//! ```
//!
//! Every front end (CLI, GUI, web scheduler) drives the same queue and
//! observes it through [`EventSink`](crate::events::EventSink).

mod engine;
mod execute;
mod queue;
mod types;

pub use engine::{EngineLease, EngineSlot};
pub use execute::JobContext;
pub use queue::{create_batch_jobs, short_id, BatchSummary, JobQueue};
pub use types::{Job, JobOptions, JobStatus, OcrMode, TransitionError};
