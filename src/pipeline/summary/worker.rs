//! Summary generation worker.
//!
//! State machine for one run:
//! ```text
//! started → insufficient-data: failed
//! started → ai-call → retry-exhausted: failed
//! started → ai-call-ok → raw-stored → parse-fail: failed (raw kept)
//! started → ai-call-ok → raw-stored → sanitized → completed
//! ```
//! The verbatim response is persisted before parsing is attempted, so a
//! malformed answer never loses the forensic record. The caller owns the
//! appointment lease and final status; this worker owns the summary row.

use std::time::Duration;

use rusqlite::Connection;
use uuid::Uuid;

use crate::ai::AiClient;
use crate::config::PipelineConfig;
use crate::db::repository::{complete_summary, fail_summary, insert_raw_summary};
use crate::pipeline::context::{self, PromptContext};
use crate::pipeline::error::PipelineError;
use crate::pipeline::progress::{self, Stage};
use crate::pipeline::summary::parser::{parse_summary_response, require_fields};
use crate::pipeline::summary::prompt::build_summary_prompt;
use crate::pipeline::summary::sanitize::sanitize_summary;

/// Collaborators injected into the worker, scoped to one invocation.
pub struct SummaryDeps<'a> {
    pub ai: &'a dyn AiClient,
    pub config: &'a PipelineConfig,
}

/// Generate, validate, and persist the clinical summary for an appointment.
/// Returns the id of the completed summary row.
pub fn run_summary(
    conn: &Connection,
    deps: &SummaryDeps<'_>,
    appointment_id: &str,
) -> Result<String, PipelineError> {
    let ctx = context::build(conn, appointment_id, deps.config)?;

    // Never call the external service on empty input.
    if !ctx.has_usable_input() {
        progress::emit(
            conn,
            appointment_id,
            Stage::Summary,
            0,
            "validate_input",
            "error",
            "insufficient data: no documents, intake form, or patient data",
            10.0,
            None,
        );
        return Err(PipelineError::InsufficientData);
    }
    progress::emit(
        conn,
        appointment_id,
        Stage::Summary,
        0,
        "validate_input",
        "completed",
        "",
        10.0,
        None,
    );

    let prompt = build_summary_prompt(&ctx);
    progress::emit(
        conn,
        appointment_id,
        Stage::Summary,
        1,
        "build_context",
        "completed",
        &format!("{} document(s) in context", ctx.documents.len()),
        25.0,
        None,
    );

    let raw = match call_with_retries(deps.ai, &prompt, deps.config) {
        Ok(raw) => raw,
        Err(e) => {
            progress::emit(
                conn,
                appointment_id,
                Stage::Summary,
                2,
                "ai_request",
                "error",
                &e.to_string(),
                50.0,
                None,
            );
            return Err(e);
        }
    };
    progress::emit(
        conn,
        appointment_id,
        Stage::Summary,
        2,
        "ai_request",
        "completed",
        "",
        50.0,
        None,
    );

    // Raw before parsed: the row exists from this point on, whatever
    // happens next.
    let summary_id = Uuid::new_v4().to_string();
    insert_raw_summary(conn, &summary_id, &ctx.consultation_id, &ctx.patient_id, &raw)?;
    progress::emit(
        conn,
        appointment_id,
        Stage::Summary,
        3,
        "raw_stored",
        "completed",
        "",
        70.0,
        None,
    );

    match parse_and_complete(conn, appointment_id, &summary_id, &raw, &ctx) {
        Ok(()) => {
            progress::emit(
                conn,
                appointment_id,
                Stage::Summary,
                6,
                "summary_complete",
                "completed",
                "",
                100.0,
                Some(&serde_json::json!({ "summary_id": summary_id })),
            );
            tracing::info!(appointment_id, summary_id, "Clinical summary completed");
            Ok(summary_id)
        }
        Err(e) => {
            // Keep the raw output; flip the row to failed.
            if let Err(db_err) = fail_summary(conn, &summary_id) {
                tracing::warn!(summary_id, error = %db_err, "Failed to mark summary row failed");
            }
            Err(e)
        }
    }
}

fn parse_and_complete(
    conn: &Connection,
    appointment_id: &str,
    summary_id: &str,
    raw: &str,
    ctx: &PromptContext,
) -> Result<(), PipelineError> {
    let parsed = match parse_summary_response(raw).and_then(|p| {
        require_fields(&p)?;
        Ok(p)
    }) {
        Ok(parsed) => parsed,
        Err(e) => {
            progress::emit(
                conn,
                appointment_id,
                Stage::Summary,
                4,
                "parse_response",
                "error",
                &e.to_string(),
                80.0,
                None,
            );
            return Err(e);
        }
    };
    progress::emit(
        conn,
        appointment_id,
        Stage::Summary,
        4,
        "parse_response",
        "completed",
        "",
        80.0,
        None,
    );

    let sanitized = sanitize_summary(&parsed, &ctx.specialty_field);
    progress::emit(
        conn,
        appointment_id,
        Stage::Summary,
        5,
        "sanitize_summary",
        "completed",
        "",
        90.0,
        None,
    );

    complete_summary(conn, summary_id, &sanitized)?;
    Ok(())
}

/// Call the AI service with the bounded retry policy: linear backoff per
/// attempt, except an extended pause before the final attempt to absorb
/// transient rate limiting.
fn call_with_retries(
    ai: &dyn AiClient,
    prompt: &str,
    config: &PipelineConfig,
) -> Result<String, PipelineError> {
    let max_attempts = config.max_ai_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        match ai.generate(prompt) {
            Ok(raw) => return Ok(raw),
            Err(e) => {
                last_error = e.to_string();
                tracing::warn!(attempt, max_attempts, error = %last_error, "AI generation attempt failed");
                if attempt < max_attempts {
                    let pause_secs = if attempt + 1 == max_attempts {
                        config.final_attempt_pause_secs
                    } else {
                        config.retry_backoff_secs * attempt as u64
                    };
                    if pause_secs > 0 {
                        std::thread::sleep(Duration::from_secs(pause_secs));
                    }
                }
            }
        }
    }

    Err(PipelineError::RetriesExhausted {
        attempts: max_attempts,
        last_error,
    })
}
