//! Trigger endpoints.
//!
//! `POST /hooks/process-files` is the pipeline entry point: classify the
//! payload, take the lease, run the extraction batch on a blocking worker
//! thread, and, when the completion gate passes, hand off to the summary
//! stage via an internal HTTP call. `POST /hooks/generate-summary` is that
//! hand-off's target (and accepts direct invocations). Lock conflicts map to
//! 409, no-op triggers to 200, malformed payloads to 400.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::trigger::{classify_trigger, TriggerAction};
use crate::pipeline::stages::{run_file_stage, run_summary_stage, FileStage, SummaryStage};
use crate::state::AppState;

pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/hooks/process-files", post(process_files))
        .route("/hooks/generate-summary", post(generate_summary))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": crate::config::APP_NAME }))
}

async fn process_files(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let action = classify_trigger(&payload).map_err(ApiError::BadRequest)?;

    let (appointment_id, triggered_by, allow_retry) = match action {
        TriggerAction::NoOp { reason } => {
            return Ok(Json(json!({ "status": "ok", "message": reason })));
        }
        TriggerAction::Process {
            appointment_id,
            triggered_by,
            allow_retry,
        } => (appointment_id, triggered_by, allow_retry),
    };

    tracing::info!(appointment_id, triggered_by, "File processing triggered");

    let worker_state = state.clone();
    let worker_appointment = appointment_id.clone();
    let stage = tokio::task::spawn_blocking(move || -> Result<FileStage, ApiError> {
        let conn = worker_state.open_db()?;
        let ai = worker_state.ai_client();
        let store = worker_state.object_store();
        let stage = run_file_stage(
            &conn,
            ai.as_ref(),
            store.as_ref(),
            &worker_state.config.pipeline,
            &worker_appointment,
            allow_retry,
        )?;

        if matches!(&stage, FileStage::Finished { ready_for_summary: true, .. }) {
            hand_off_summary(&worker_state, &worker_appointment);
        }
        Ok(stage)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("file stage task failed: {e}")))??;

    match stage {
        FileStage::Busy => Err(ApiError::Conflict(format!(
            "appointment {appointment_id} is already being processed"
        ))),
        FileStage::Finished {
            outcome,
            ready_for_summary,
        } => Ok(Json(json!({
            "status": "ok",
            "appointment_id": appointment_id,
            "files_total": outcome.total,
            "files_succeeded": outcome.succeeded,
            "files_failed": outcome.failed,
            "summary_triggered": ready_for_summary,
        }))),
    }
}

async fn generate_summary(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let appointment_id = payload
        .get("appointment_id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("appointment_id is required".to_string()))?
        .to_string();
    let triggered_by = payload
        .get("triggered_by")
        .and_then(Value::as_str)
        .unwrap_or("direct")
        .to_string();

    tracing::info!(appointment_id, triggered_by, "Summary generation triggered");

    let worker_state = state.clone();
    let worker_appointment = appointment_id.clone();
    let stage = tokio::task::spawn_blocking(move || -> Result<SummaryStage, ApiError> {
        let conn = worker_state.open_db()?;
        let ai = worker_state.ai_client();
        Ok(run_summary_stage(
            &conn,
            ai.as_ref(),
            &worker_state.config.pipeline,
            &worker_appointment,
        )?)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("summary stage task failed: {e}")))??;

    match stage {
        SummaryStage::Busy => Err(ApiError::Conflict(format!(
            "appointment {appointment_id} is not awaiting a summary or is already being summarized"
        ))),
        SummaryStage::AlreadyCompleted => Ok(Json(json!({
            "status": "ok",
            "appointment_id": appointment_id,
            "message": "summary already completed",
        }))),
        SummaryStage::Completed { summary_id } => Ok(Json(json!({
            "status": "ok",
            "appointment_id": appointment_id,
            "summary_id": summary_id,
        }))),
    }
}

/// Fire the internal stage hand-off. Failures (including non-200 responses)
/// are logged and tolerated: the summary stage can always be re-triggered,
/// and the appointment sits safely at `files_processed` until then.
fn hand_off_summary(state: &AppState, appointment_id: &str) {
    let url = format!(
        "{}/hooks/generate-summary",
        state.config.self_base_url.trim_end_matches('/')
    );
    let body = json!({
        "appointment_id": appointment_id,
        "request_id": Uuid::new_v4().to_string(),
        "triggered_by": "file_processing_complete",
    });

    let client = match reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(appointment_id, error = %e, "Failed to build hand-off client");
            return;
        }
    };

    match client.post(&url).json(&body).send() {
        Ok(response) if response.status().is_success() => {
            tracing::info!(appointment_id, "Summary stage hand-off accepted");
        }
        Ok(response) => {
            tracing::warn!(
                appointment_id,
                status = response.status().as_u16(),
                "Summary stage hand-off rejected (will rely on re-trigger)"
            );
        }
        Err(e) => {
            tracing::warn!(appointment_id, error = %e, "Summary stage hand-off failed");
        }
    }
}
