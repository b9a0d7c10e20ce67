//! Pipeline-level error type shared by the extraction and summary workers.

use thiserror::Error;

use crate::ai::AiError;
use crate::db::DatabaseError;
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("AI service error: {0}")]
    Ai(#[from] AiError),

    #[error("Object storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Insufficient data: no processed documents, intake form, or patient data")]
    InsufficientData,

    /// Per-file rejection (unsupported type, oversized payload). Recorded on
    /// the file row; never aborts the batch.
    #[error("{0}")]
    FileRejected(String),

    #[error("Malformed AI response: {0}")]
    MalformedResponse(String),

    #[error("Missing required field in AI response: {0}")]
    MissingRequiredField(&'static str),

    #[error("AI service retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// Truncate an error message to the persisted-column ceiling, on a char
/// boundary, with a marker when anything was cut.
pub fn truncate_error(message: &str, cap: usize) -> String {
    if message.len() <= cap {
        return message.to_string();
    }
    let mut end = cap.saturating_sub(1);
    while end > 0 && !message.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &message[..end])
}
