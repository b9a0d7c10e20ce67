//! File extraction stage.
//!
//! `dispatch` classifies a file by its declared MIME type and runs the
//! matching extraction protocol against the AI service; `worker` drives the
//! whole per-appointment batch and leaves every file in a terminal state.

pub mod dispatch;
pub mod worker;

pub use dispatch::{classify_file, FileKind};
pub use worker::{run_file_batch, BatchOutcome, ExtractionDeps};
