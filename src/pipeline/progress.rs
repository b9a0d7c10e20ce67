//! Progress event emitter.
//!
//! Every pipeline stage reports through here. The event log exposes exactly
//! two observable outcomes per step, `completed` and `error`, so any
//! failure-like status token collapses to `error` and everything else to
//! `completed`. Percentages are rounded and clamped into [0, 100].
//!
//! A write failure is logged and swallowed: progress reporting must never
//! abort the pipeline it is observing.

use rusqlite::Connection;

use crate::db::repository::{insert_progress_event, NewProgressEvent};

/// Pipeline stage a progress event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Files,
    Summary,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Files => "files",
            Self::Summary => "summary",
        }
    }
}

/// Canonical step outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Completed,
    Error,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Collapse an arbitrary status token into the two canonical outcomes.
    pub fn canonicalize(token: &str) -> Self {
        let lower = token.trim().to_lowercase();
        let failure_like = matches!(
            lower.as_str(),
            "error" | "err" | "failed" | "failure" | "fail" | "exception" | "fatal" | "timeout"
        );
        if failure_like {
            Self::Error
        } else {
            Self::Completed
        }
    }
}

/// Round and clamp a raw percentage into [0, 100].
pub fn clamp_percent(percent: f64) -> u8 {
    if !percent.is_finite() {
        return 0;
    }
    percent.round().clamp(0.0, 100.0) as u8
}

/// Append one progress event. Infallible by contract; failures are logged.
#[allow(clippy::too_many_arguments)]
pub fn emit(
    conn: &Connection,
    appointment_id: &str,
    stage: Stage,
    step_index: u32,
    step_key: &str,
    status_token: &str,
    message: &str,
    percent: f64,
    meta: Option<&serde_json::Value>,
) {
    let status = StepStatus::canonicalize(status_token);
    let event = NewProgressEvent {
        appointment_id,
        stage: stage.as_str(),
        step_index,
        step_key,
        status: status.as_str(),
        message: (!message.is_empty()).then_some(message),
        progress_percent: clamp_percent(percent),
        meta,
    };

    if let Err(e) = insert_progress_event(conn, &event) {
        tracing::warn!(
            appointment_id,
            step_key,
            error = %e,
            "Failed to write progress event (swallowed)"
        );
    }
}
