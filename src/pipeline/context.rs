//! Clinical context builder.
//!
//! Assembles everything the summary prompt needs into one bounded-size
//! structure: intake form data, extracted document text (each block capped so
//! total prompt size stays predictable regardless of upload volume), prior
//! summary on re-runs, and patient/clinician attributes. The clinician's
//! specialty parametrizes a dynamic output field keyed by a normalized slug.

use chrono::{Datelike, NaiveDate, Utc};
use rusqlite::Connection;

use crate::config::PipelineConfig;
use crate::db::repository::{
    get_context_row_fallback, get_context_row_via_view, get_intake_form, get_parsed_texts,
    latest_completed_summary, ContextRow,
};
use crate::pipeline::error::PipelineError;

/// Everything the summary prompt is built from.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub appointment_id: String,
    pub consultation_id: String,
    pub patient_id: String,
    pub patient_name: String,
    pub age_years: Option<u32>,
    pub sex: Option<String>,
    pub smoking_status: Option<String>,
    pub alcohol_use: Option<String>,
    pub occupation: Option<String>,
    pub allergies: Option<String>,
    pub consultation_reason: Option<String>,
    pub clinician_specialty: Option<String>,
    /// Dynamic output field name, e.g. `relevance_to_cardiology`.
    pub specialty_field: String,
    pub intake_form: Option<serde_json::Value>,
    pub prior_summary: Option<serde_json::Value>,
    /// `(file_name, capped_text)` per successfully extracted document.
    pub documents: Vec<(String, String)>,
}

impl PromptContext {
    /// Sufficiency check for the summary worker: at least one real input
    /// must exist before the AI service is called.
    pub fn has_usable_input(&self) -> bool {
        if !self.documents.is_empty() {
            return true;
        }
        if let Some(form) = &self.intake_form {
            if form.as_object().is_some_and(|o| !o.is_empty()) {
                return true;
            }
        }
        self.allergies.as_deref().is_some_and(|s| !s.trim().is_empty())
            || self.smoking_status.as_deref().is_some_and(|s| !s.trim().is_empty())
            || self.alcohol_use.as_deref().is_some_and(|s| !s.trim().is_empty())
    }
}

/// Build the context for an appointment. Reads the denormalized view first;
/// when that fails the per-table fallback produces the same shape.
pub fn build(
    conn: &Connection,
    appointment_id: &str,
    config: &PipelineConfig,
) -> Result<PromptContext, PipelineError> {
    let row = match get_context_row_via_view(conn, appointment_id) {
        Ok(row) => row,
        Err(e) => {
            tracing::warn!(
                appointment_id,
                error = %e,
                "Context view unavailable, falling back to per-table lookups"
            );
            get_context_row_fallback(conn, appointment_id)?
        }
    };

    let intake_form = get_intake_form(conn, appointment_id)?;
    let prior_summary = latest_completed_summary(conn, &row.consultation_id)?;
    let documents = get_parsed_texts(conn, appointment_id)?
        .into_iter()
        .map(|(name, text)| (name, cap_text(&text, config.context_char_cap)))
        .collect();

    Ok(from_row(row, intake_form, prior_summary, documents))
}

fn from_row(
    row: ContextRow,
    intake_form: Option<serde_json::Value>,
    prior_summary: Option<serde_json::Value>,
    documents: Vec<(String, String)>,
) -> PromptContext {
    let specialty_field = specialty_field_name(row.clinician_specialty.as_deref());
    PromptContext {
        appointment_id: row.appointment_id,
        consultation_id: row.consultation_id,
        patient_id: row.patient_id,
        patient_name: row.patient_name,
        age_years: row.date_of_birth.as_deref().and_then(age_from_dob),
        sex: row.sex,
        smoking_status: row.smoking_status,
        alcohol_use: row.alcohol_use,
        occupation: row.occupation,
        allergies: row.allergies,
        consultation_reason: row.consultation_reason,
        clinician_specialty: row.clinician_specialty,
        specialty_field,
        intake_form,
        prior_summary,
        documents,
    }
}

/// Whole years between a `YYYY-MM-DD` date of birth and today.
pub fn age_from_dob(dob: &str) -> Option<u32> {
    let dob = NaiveDate::parse_from_str(dob, "%Y-%m-%d").ok()?;
    let today = Utc::now().date_naive();
    if dob > today {
        return None;
    }
    let mut age = today.year() - dob.year();
    if (today.month(), today.day()) < (dob.month(), dob.day()) {
        age -= 1;
    }
    u32::try_from(age).ok()
}

/// Normalize a specialty name into the dynamic output field name.
/// `"General Practice / Family Medicine"` → `relevance_to_general_practice_family_medicine`.
pub fn specialty_field_name(specialty: Option<&str>) -> String {
    let slug = specialty
        .map(specialty_slug)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "general_medicine".to_string());
    format!("relevance_to_{slug}")
}

fn specialty_slug(specialty: &str) -> String {
    let mut slug = String::with_capacity(specialty.len());
    let mut prev_underscore = true;
    for c in specialty.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            prev_underscore = false;
        } else if !prev_underscore {
            slug.push('_');
            prev_underscore = true;
        }
    }
    slug.trim_matches('_').to_string()
}

/// Cap a text block at `cap` characters, appending a truncation marker when
/// anything was cut.
pub fn cap_text(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        return text.to_string();
    }
    let truncated: String = text.chars().take(cap).collect();
    format!("{truncated}…[TRUNCATED]")
}
