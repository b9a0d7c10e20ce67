//! Trigger payload classification.
//!
//! The entry point receives several payload shapes from independent sources:
//! direct re-triggers, table-change events on `appointments`, and
//! table-change events on `patient_files`. Classification happens once, into
//! a closed set of variants, before any dispatch; anything that does not
//! match is rejected, and events that match but carry no work (an unlinked
//! file, a status flip that is not into `triggered`) become explicit no-ops.

use serde::Deserialize;
use serde_json::Value;

/// The `ai_processing_status` value whose arrival triggers a run.
const TRIGGERED: &str = "triggered";

/// What the entry point should do with a classified payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerAction {
    Process {
        appointment_id: String,
        triggered_by: String,
        /// Deliberate re-triggers may reset a failed appointment; incidental
        /// file events may not.
        allow_retry: bool,
    },
    NoOp { reason: String },
}

/// Raw payload shapes accepted at the entry point.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTrigger {
    Direct {
        appointment_id: String,
        triggered_by: Option<String>,
    },
    TableEvent {
        #[serde(rename = "type")]
        kind: String,
        table: String,
        record: Value,
        old_record: Option<Value>,
    },
}

/// Classify an incoming payload. `Err` carries the 400 reason.
pub fn classify_trigger(payload: &Value) -> Result<TriggerAction, String> {
    let raw: RawTrigger = serde_json::from_value(payload.clone())
        .map_err(|_| "unrecognized trigger payload".to_string())?;

    match raw {
        RawTrigger::Direct {
            appointment_id,
            triggered_by,
        } => Ok(TriggerAction::Process {
            appointment_id,
            triggered_by: triggered_by.unwrap_or_else(|| "direct".to_string()),
            allow_retry: true,
        }),

        RawTrigger::TableEvent {
            kind,
            table,
            record,
            old_record,
        } => match (kind.as_str(), table.as_str()) {
            ("INSERT", "appointments") => {
                let id = record_id(&record)
                    .ok_or_else(|| "appointments INSERT without record.id".to_string())?;
                Ok(TriggerAction::Process {
                    appointment_id: id,
                    triggered_by: "appointment_insert".to_string(),
                    allow_retry: false,
                })
            }
            ("UPDATE", "appointments") => classify_appointment_update(&record, old_record.as_ref()),
            ("INSERT", "patient_files") | ("UPDATE", "patient_files") => {
                classify_file_event(&record)
            }
            (kind, table) => Err(format!("unhandled trigger: {kind} on {table}")),
        },
    }
}

/// An appointments UPDATE only carries work when `ai_processing_status`
/// transitions *into* `"triggered"`.
fn classify_appointment_update(
    record: &Value,
    old_record: Option<&Value>,
) -> Result<TriggerAction, String> {
    let id = record_id(record).ok_or_else(|| "appointments UPDATE without record.id".to_string())?;

    let new_status = record.get("ai_processing_status").and_then(Value::as_str);
    let old_status = old_record
        .and_then(|r| r.get("ai_processing_status"))
        .and_then(Value::as_str);

    if new_status == Some(TRIGGERED) && old_status != Some(TRIGGERED) {
        Ok(TriggerAction::Process {
            appointment_id: id,
            triggered_by: "status_triggered".to_string(),
            allow_retry: true,
        })
    } else {
        Ok(TriggerAction::NoOp {
            reason: format!("appointment {id} update does not transition into '{TRIGGERED}'"),
        })
    }
}

/// A file event only carries work once the file is linked to an appointment.
fn classify_file_event(record: &Value) -> Result<TriggerAction, String> {
    match record.get("appointment_id").and_then(Value::as_str) {
        Some(appointment_id) if !appointment_id.is_empty() => Ok(TriggerAction::Process {
            appointment_id: appointment_id.to_string(),
            triggered_by: "file_linked".to_string(),
            allow_retry: false,
        }),
        _ => Ok(TriggerAction::NoOp {
            reason: "file not yet linked to an appointment".to_string(),
        }),
    }
}

fn record_id(record: &Value) -> Option<String> {
    record
        .get("id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}
