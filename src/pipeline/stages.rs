//! Stage orchestration: lease acquisition and release around the two
//! workers.
//!
//! Each function is the body of one stateless invocation. Failing to acquire
//! the lease is a normal outcome (`Busy`) answered upstream as "already being
//! handled"; release is attempted on every exit path and never overrides an
//! otherwise-successful result.

use rusqlite::Connection;

use crate::ai::AiClient;
use crate::config::PipelineConfig;
use crate::db::repository::{get_appointment, reset_for_retry};
use crate::pipeline::error::{truncate_error, PipelineError};
use crate::pipeline::extraction::{run_file_batch, BatchOutcome, ExtractionDeps};
use crate::pipeline::lock::{self, Acquire};
use crate::pipeline::status::ProcessingStatus;
use crate::pipeline::summary::{run_summary, SummaryDeps};
use crate::storage::ObjectStore;

/// Result of one file-extraction invocation.
#[derive(Debug)]
pub enum FileStage {
    /// Lease held by a live instance or row ineligible; no work done.
    Busy,
    Finished {
        outcome: BatchOutcome,
        /// The batch completion gate passed; the summary stage should be
        /// invoked next.
        ready_for_summary: bool,
    },
}

/// Result of one summary-generation invocation.
#[derive(Debug)]
pub enum SummaryStage {
    Busy,
    /// The appointment already finished; redundant hand-offs land here.
    AlreadyCompleted,
    Completed { summary_id: String },
}

/// Run the file-extraction stage for an appointment under its lease.
///
/// `allow_retry` resets a `failed` appointment back to `pending` first; it is
/// set for deliberate re-triggers (direct calls, status-column flips) and not
/// for incidental file-link events, so duplicate deliveries cannot silently
/// restart a failed run.
pub fn run_file_stage(
    conn: &Connection,
    ai: &dyn AiClient,
    store: &dyn ObjectStore,
    config: &PipelineConfig,
    appointment_id: &str,
    allow_retry: bool,
) -> Result<FileStage, PipelineError> {
    let appointment = get_appointment(conn, appointment_id)?;
    if allow_retry && appointment.processing_status == ProcessingStatus::Failed {
        if reset_for_retry(conn, appointment_id)? {
            tracing::info!(appointment_id, "Failed appointment reset for retry");
        }
    }

    let instance_id = lock::new_instance_id();
    match lock::acquire(
        conn,
        appointment_id,
        &instance_id,
        ProcessingStatus::Pending,
        config.lock_timeout_minutes,
    )? {
        Acquire::Busy => return Ok(FileStage::Busy),
        Acquire::Held(_) => {}
    }

    let deps = ExtractionDeps { ai, store, config };
    match run_file_batch(conn, &deps, appointment_id) {
        Ok(outcome) => {
            let ready = outcome.all_processed;
            // Complete batches advance to files_processed; incomplete ones
            // (files appeared mid-run without being selected) go back to
            // pending so the next trigger picks them up.
            let final_status = if ready {
                ProcessingStatus::FilesProcessed
            } else {
                ProcessingStatus::Pending
            };
            lock::release(conn, appointment_id, &instance_id, final_status, None);
            Ok(FileStage::Finished {
                outcome,
                ready_for_summary: ready,
            })
        }
        Err(e) => {
            let message = truncate_error(&e.to_string(), config.error_message_cap);
            lock::release(
                conn,
                appointment_id,
                &instance_id,
                ProcessingStatus::Failed,
                Some(&message),
            );
            Err(e)
        }
    }
}

/// Run the summary-generation stage for an appointment under its own lease.
///
/// The lease here resolves the double-invocation question left open by the
/// completion gate: concurrent hand-offs race on `files_processed →
/// processing` and exactly one proceeds.
pub fn run_summary_stage(
    conn: &Connection,
    ai: &dyn AiClient,
    config: &PipelineConfig,
    appointment_id: &str,
) -> Result<SummaryStage, PipelineError> {
    let appointment = get_appointment(conn, appointment_id)?;
    if appointment.processing_status == ProcessingStatus::Completed {
        return Ok(SummaryStage::AlreadyCompleted);
    }

    let instance_id = lock::new_instance_id();
    match lock::acquire(
        conn,
        appointment_id,
        &instance_id,
        ProcessingStatus::FilesProcessed,
        config.lock_timeout_minutes,
    )? {
        Acquire::Busy => return Ok(SummaryStage::Busy),
        Acquire::Held(_) => {}
    }

    let deps = SummaryDeps { ai, config };
    match run_summary(conn, &deps, appointment_id) {
        Ok(summary_id) => {
            lock::release(
                conn,
                appointment_id,
                &instance_id,
                ProcessingStatus::Completed,
                None,
            );
            Ok(SummaryStage::Completed { summary_id })
        }
        Err(e) => {
            let message = truncate_error(&e.to_string(), config.error_message_cap);
            lock::release(
                conn,
                appointment_id,
                &instance_id,
                ProcessingStatus::Failed,
                Some(&message),
            );
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::MockAiClient;
    use crate::db::repository::intake::tests::seed_consultation;
    use crate::db::repository::{insert_patient_file, PatientFile};
    use crate::db::sqlite::open_memory_database;
    use crate::storage::MockObjectStore;

    fn seed_file(conn: &Connection, id: &str) {
        insert_patient_file(
            conn,
            &PatientFile {
                id: id.to_string(),
                appointment_id: Some("apt-1".to_string()),
                consultation_id: Some("cons-1".to_string()),
                file_name: format!("{id}.pdf"),
                storage_path: format!("uploads/{id}.pdf"),
                size_bytes: 64,
                mime_type: Some("application/pdf".to_string()),
                parsed_text: None,
                processed: false,
                processing_error: None,
            },
        )
        .unwrap();
    }

    fn good_summary() -> String {
        serde_json::json!({
            "short_clinical_synopsis": "64yo F with chest pain",
            "chief_complaint": "chest pain"
        })
        .to_string()
    }

    #[test]
    fn file_stage_full_run_advances_to_files_processed() {
        let conn = open_memory_database().unwrap();
        seed_consultation(&conn, "apt-1");
        seed_file(&conn, "f-1");

        let ai = MockAiClient::new().with_response("extracted");
        let store = MockObjectStore::new().with_object("uploads/f-1.pdf", b"%PDF");
        let config = PipelineConfig::fast();

        let result = run_file_stage(&conn, &ai, &store, &config, "apt-1", false).unwrap();
        match result {
            FileStage::Finished { outcome, ready_for_summary } => {
                assert!(ready_for_summary);
                assert_eq!(outcome.succeeded, 1);
            }
            other => panic!("expected Finished, got {other:?}"),
        }

        let apt = get_appointment(&conn, "apt-1").unwrap();
        assert_eq!(apt.processing_status, ProcessingStatus::FilesProcessed);
        assert!(apt.processing_instance_id.is_none());
    }

    #[test]
    fn file_stage_on_held_lease_is_busy() {
        let conn = open_memory_database().unwrap();
        seed_consultation(&conn, "apt-1");

        // Simulate a live worker holding the lease.
        lock::acquire(&conn, "apt-1", "other", ProcessingStatus::Pending, 5).unwrap();

        let ai = MockAiClient::new();
        let store = MockObjectStore::new();
        let config = PipelineConfig::fast();
        let result = run_file_stage(&conn, &ai, &store, &config, "apt-1", false).unwrap();
        assert!(matches!(result, FileStage::Busy));
    }

    #[test]
    fn file_stage_retry_resets_failed_appointment() {
        let conn = open_memory_database().unwrap();
        seed_consultation(&conn, "apt-1");
        conn.execute(
            "UPDATE appointments SET processing_status='failed', error_message='old failure'
             WHERE id='apt-1'",
            [],
        )
        .unwrap();

        let ai = MockAiClient::new();
        let store = MockObjectStore::new();
        let config = PipelineConfig::fast();

        // Without retry permission the failed row is ineligible.
        let result = run_file_stage(&conn, &ai, &store, &config, "apt-1", false).unwrap();
        assert!(matches!(result, FileStage::Busy));

        // With it, the run proceeds (zero files → vacuously complete).
        let result = run_file_stage(&conn, &ai, &store, &config, "apt-1", true).unwrap();
        assert!(matches!(result, FileStage::Finished { ready_for_summary: true, .. }));
    }

    #[test]
    fn summary_stage_completes_appointment() {
        let conn = open_memory_database().unwrap();
        seed_consultation(&conn, "apt-1");
        crate::db::repository::insert_intake_form(
            &conn,
            "form-1",
            "apt-1",
            &serde_json::json!({"symptoms": "cough"}),
        )
        .unwrap();
        conn.execute(
            "UPDATE appointments SET processing_status='files_processed' WHERE id='apt-1'",
            [],
        )
        .unwrap();

        let ai = MockAiClient::new().with_response(&good_summary());
        let config = PipelineConfig::fast();

        let result = run_summary_stage(&conn, &ai, &config, "apt-1").unwrap();
        assert!(matches!(result, SummaryStage::Completed { .. }));

        let apt = get_appointment(&conn, "apt-1").unwrap();
        assert_eq!(apt.processing_status, ProcessingStatus::Completed);
    }

    #[test]
    fn summary_stage_failure_marks_appointment_failed() {
        let conn = open_memory_database().unwrap();
        seed_consultation(&conn, "apt-1");
        conn.execute(
            "UPDATE appointments SET processing_status='files_processed' WHERE id='apt-1'",
            [],
        )
        .unwrap();
        // No intake form, no files → insufficient data. (The seeded patient
        // has lifestyle data, so blank it out.)
        conn.execute(
            "UPDATE patients SET smoking_status=NULL, alcohol_use=NULL, allergies=NULL
             WHERE id='pat-1'",
            [],
        )
        .unwrap();

        let ai = MockAiClient::new();
        let config = PipelineConfig::fast();

        let result = run_summary_stage(&conn, &ai, &config, "apt-1");
        assert!(matches!(result, Err(PipelineError::InsufficientData)));

        let apt = get_appointment(&conn, "apt-1").unwrap();
        assert_eq!(apt.processing_status, ProcessingStatus::Failed);
        assert!(apt.error_message.unwrap().to_lowercase().contains("insufficient"));
    }

    #[test]
    fn summary_stage_is_idempotent_after_completion() {
        let conn = open_memory_database().unwrap();
        seed_consultation(&conn, "apt-1");
        crate::db::repository::insert_intake_form(
            &conn,
            "form-1",
            "apt-1",
            &serde_json::json!({"symptoms": "cough"}),
        )
        .unwrap();
        conn.execute(
            "UPDATE appointments SET processing_status='files_processed' WHERE id='apt-1'",
            [],
        )
        .unwrap();

        let ai = MockAiClient::new().with_response(&good_summary());
        let config = PipelineConfig::fast();
        run_summary_stage(&conn, &ai, &config, "apt-1").unwrap();

        // Redundant hand-off: safe no-op, no second AI call.
        let again = run_summary_stage(&conn, &ai, &config, "apt-1").unwrap();
        assert!(matches!(again, SummaryStage::AlreadyCompleted));
        assert_eq!(ai.call_log().iter().filter(|c| *c == "generate").count(), 1);
    }

    #[test]
    fn summary_stage_busy_on_ineligible_state() {
        let conn = open_memory_database().unwrap();
        seed_consultation(&conn, "apt-1"); // still pending

        let ai = MockAiClient::new();
        let config = PipelineConfig::fast();
        let result = run_summary_stage(&conn, &ai, &config, "apt-1").unwrap();
        assert!(matches!(result, SummaryStage::Busy));
    }

    #[test]
    fn two_stage_pipeline_end_to_end() {
        let conn = open_memory_database().unwrap();
        seed_consultation(&conn, "apt-1");
        seed_file(&conn, "f-1");
        seed_file(&conn, "f-2");
        crate::db::repository::insert_intake_form(
            &conn,
            "form-1",
            "apt-1",
            &serde_json::json!({"duration": "3 weeks"}),
        )
        .unwrap();

        let ai = MockAiClient::new()
            .with_response("PDF one text")
            .with_response("PDF two text")
            .with_response(&good_summary());
        let store = MockObjectStore::new()
            .with_object("uploads/f-1.pdf", b"%PDF-1")
            .with_object("uploads/f-2.pdf", b"%PDF-2");
        let config = PipelineConfig::fast();

        let file_result = run_file_stage(&conn, &ai, &store, &config, "apt-1", false).unwrap();
        let FileStage::Finished { outcome, ready_for_summary } = file_result else {
            panic!("expected Finished");
        };
        assert_eq!(outcome.succeeded, 2);
        assert!(ready_for_summary);

        let summary_result = run_summary_stage(&conn, &ai, &config, "apt-1").unwrap();
        let SummaryStage::Completed { summary_id } = summary_result else {
            panic!("expected Completed");
        };

        let summary = crate::db::repository::get_summary(&conn, &summary_id).unwrap();
        assert_eq!(summary.processing_status, "completed");
        assert!(!summary.summary_json["chief_complaint"].as_str().unwrap().is_empty());
        assert_eq!(
            get_appointment(&conn, "apt-1").unwrap().processing_status,
            ProcessingStatus::Completed
        );
    }
}
