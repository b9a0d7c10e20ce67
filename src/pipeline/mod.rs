//! The asynchronous document-processing and summarization pipeline.
//!
//! Stages, in control-flow order:
//! ```text
//! trigger → lock (lease) → extraction (per-file) → completion gate
//!         → lock release → summary (context → AI → parse → sanitize)
//! ```
//! Each stage runs as a stateless invocation; the appointment row's status
//! column is the only coordination point. The progress emitter is called from
//! every stage regardless of outcome and never fails the stage observing it.

pub mod context;
pub mod error;
pub mod extraction;
pub mod lock;
pub mod progress;
pub mod stages;
pub mod status;
pub mod summary;

pub use error::PipelineError;
pub use status::ProcessingStatus;
