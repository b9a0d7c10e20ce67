//! File extraction batch worker.
//!
//! Runs under the processing lease for one appointment: selects every file
//! that has not reached a terminal state, extracts each through the AI
//! service, and writes results back. A single file's failure is recorded on
//! that file and counted; the batch always runs to the end so the
//! completion gate can advance deterministically.
//!
//! Idempotency falls out of the selection: `processed != true` means a
//! duplicate invocation sees an empty list and performs zero mutations.

use std::time::Duration;

use rusqlite::Connection;

use crate::ai::AiClient;
use crate::config::PipelineConfig;
use crate::db::repository::{
    all_processed, get_unprocessed_files, mark_file_failed, mark_file_processed, PatientFile,
};
use crate::pipeline::error::{truncate_error, PipelineError};
use crate::pipeline::extraction::dispatch::{classify_file, run_extraction};
use crate::pipeline::progress::{self, Stage};
use crate::storage::ObjectStore;

/// Collaborators injected into the worker, scoped to one invocation.
pub struct ExtractionDeps<'a> {
    pub ai: &'a dyn AiClient,
    pub store: &'a dyn ObjectStore,
    pub config: &'a PipelineConfig,
}

/// Aggregate result of one batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub total: u32,
    pub succeeded: u32,
    pub failed: u32,
    /// Completion gate after the run: every linked file is terminal.
    pub all_processed: bool,
}

impl BatchOutcome {
    fn empty(all_processed: bool) -> Self {
        Self {
            total: 0,
            succeeded: 0,
            failed: 0,
            all_processed,
        }
    }
}

/// Process all unhandled files for an appointment.
pub fn run_file_batch(
    conn: &Connection,
    deps: &ExtractionDeps<'_>,
    appointment_id: &str,
) -> Result<BatchOutcome, PipelineError> {
    // Short fixed delay so near-simultaneous uploads land in one batch
    // instead of one run per file.
    if deps.config.debounce_secs > 0 {
        std::thread::sleep(Duration::from_secs(deps.config.debounce_secs));
    }

    let files = get_unprocessed_files(conn, appointment_id)?;
    if files.is_empty() {
        // Nothing to do; keep the run mutation-free so duplicate triggers
        // are true no-ops.
        return Ok(BatchOutcome::empty(all_processed(conn, appointment_id)?));
    }

    let total = files.len() as u32;
    progress::emit(
        conn,
        appointment_id,
        Stage::Files,
        0,
        "fetch_files",
        "completed",
        &format!("{total} file(s) queued for extraction"),
        5.0,
        None,
    );

    let mut succeeded = 0u32;
    let mut failed = 0u32;

    for (index, file) in files.iter().enumerate() {
        let step_index = index as u32 + 1;
        let percent = 5.0 + 90.0 * (index as f64 + 1.0) / total as f64;
        let meta = serde_json::json!({
            "file_id": file.id,
            "file_name": file.file_name,
            "mime_type": file.mime_type,
        });

        match process_one_file(conn, deps, file) {
            Ok(char_count) => {
                succeeded += 1;
                progress::emit(
                    conn,
                    appointment_id,
                    Stage::Files,
                    step_index,
                    "extract_file",
                    "completed",
                    &format!("Extracted {} ({char_count} chars)", file.file_name),
                    percent,
                    Some(&meta),
                );
            }
            Err(e) => {
                failed += 1;
                let reason = truncate_error(&e.to_string(), deps.config.error_message_cap);
                tracing::warn!(
                    appointment_id,
                    file_id = file.id,
                    error = %reason,
                    "File extraction failed"
                );
                mark_file_failed(conn, &file.id, &reason)?;
                progress::emit(
                    conn,
                    appointment_id,
                    Stage::Files,
                    step_index,
                    "extract_file",
                    "error",
                    &reason,
                    percent,
                    Some(&meta),
                );
            }
        }
    }

    let complete = all_processed(conn, appointment_id)?;
    progress::emit(
        conn,
        appointment_id,
        Stage::Files,
        total + 1,
        "files_complete",
        "completed",
        &format!("{succeeded} of {total} file(s) extracted, {failed} failed"),
        100.0,
        None,
    );

    tracing::info!(
        appointment_id,
        total,
        succeeded,
        failed,
        complete,
        "File extraction batch finished"
    );

    Ok(BatchOutcome {
        total,
        succeeded,
        failed,
        all_processed: complete,
    })
}

/// Extract one file end to end. An `Err` is a per-file failure; the caller
/// records it on the row and moves on.
fn process_one_file(
    conn: &Connection,
    deps: &ExtractionDeps<'_>,
    file: &PatientFile,
) -> Result<usize, PipelineError> {
    let limit = deps.config.max_file_bytes;

    // Declared size is checked before any bytes move.
    if file.size_bytes > limit {
        return Err(PipelineError::FileRejected(format!(
            "file exceeds the {limit}-byte ceiling (declared {} bytes)",
            file.size_bytes
        )));
    }

    let kind = classify_file(file.mime_type.as_deref(), &file.file_name);

    let url = deps.store.signed_url(&file.storage_path)?;
    let bytes = deps.store.download(&url, &file.storage_path, limit)?;

    let text = run_extraction(deps.ai, &kind, &file.file_name, &bytes, deps.config)?;
    mark_file_processed(conn, &file.id, &text)?;
    Ok(text.chars().count())
}
