//! Schema sanitization of the parsed AI response.
//!
//! Every field is coerced into its expected shape; values that do not
//! conform are dropped rather than failing the whole summary. The output
//! always contains every expected key (array fields default to empty
//! arrays, string fields to empty strings, `urgency` to `routine`) so
//! downstream consumers never branch on missing keys.

use serde_json::{Map, Value};

/// Allowed `urgency` values; anything else becomes the first entry.
pub const URGENCY_VALUES: &[&str] = &["routine", "soon", "urgent"];

const STRING_FIELDS: &[&str] = &[
    "short_clinical_synopsis",
    "chief_complaint",
    "history_of_present_illness",
];

const STRING_ARRAY_FIELDS: &[&str] = &[
    "symptoms",
    "current_medications",
    "allergies",
    "relevant_history",
    "recommended_followups",
];

/// Coerce a parsed response into the fixed output schema. `specialty_field`
/// is the dynamic field name derived from the clinician's specialty
/// (e.g. `relevance_to_cardiology`).
pub fn sanitize_summary(raw: &Value, specialty_field: &str) -> Value {
    let mut output = Map::new();

    for field in STRING_FIELDS {
        output.insert(field.to_string(), Value::String(coerce_string(raw.get(*field))));
    }
    output.insert(
        specialty_field.to_string(),
        Value::String(coerce_string(raw.get(specialty_field))),
    );

    for field in STRING_ARRAY_FIELDS {
        output.insert(
            field.to_string(),
            Value::Array(coerce_string_array(raw.get(*field))),
        );
    }

    output.insert(
        "document_findings".to_string(),
        Value::Array(coerce_findings(raw.get("document_findings"))),
    );

    output.insert(
        "urgency".to_string(),
        Value::String(coerce_urgency(raw.get("urgency"))),
    );

    Value::Object(output)
}

/// Strings pass through trimmed; numbers and booleans are rendered; anything
/// else is dropped to the empty string.
fn coerce_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Arrays keep their string elements; a bare string becomes a one-element
/// array; everything else is an empty array.
fn coerce_string_array(value: Option<&Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.trim().is_empty() => {
                    Some(Value::String(s.trim().to_string()))
                }
                Value::Number(n) => Some(Value::String(n.to_string())),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => {
            vec![Value::String(s.trim().to_string())]
        }
        _ => Vec::new(),
    }
}

/// `document_findings` items keep exactly `source` and `finding`. Items
/// without a usable `finding` are dropped; a missing `source` defaults.
fn coerce_findings(value: Option<&Value>) -> Vec<Value> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let object = item.as_object()?;
            let finding = coerce_string(object.get("finding"));
            if finding.is_empty() {
                return None;
            }
            let source = match coerce_string(object.get("source")) {
                s if s.is_empty() => "document".to_string(),
                s => s,
            };
            Some(serde_json::json!({ "source": source, "finding": finding }))
        })
        .collect()
}

fn coerce_urgency(value: Option<&Value>) -> String {
    let candidate = value
        .and_then(Value::as_str)
        .map(|s| s.trim().to_lowercase())
        .unwrap_or_default();
    if URGENCY_VALUES.contains(&candidate.as_str()) {
        candidate
    } else {
        URGENCY_VALUES[0].to_string()
    }
}
