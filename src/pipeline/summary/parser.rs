//! Tolerant parsing of the AI service's summary response.
//!
//! The model is asked for a bare JSON object but does not reliably produce
//! one. Accepted shapes, tried in order:
//!
//! 1. a bare JSON object,
//! 2. an object fenced in a ```json code block,
//! 3. an envelope object whose single payload field holds one of the above,
//! 4. the first balanced `{...}` span anywhere in the text.
//!
//! Whatever parses still has to carry the required clinical fields; that
//! check is separate so a failure names the missing field.

use serde_json::Value;

use crate::pipeline::error::PipelineError;

/// Fields that must be present and non-empty after parsing.
const REQUIRED_FIELDS: &[&str] = &["short_clinical_synopsis", "chief_complaint"];

/// Envelope keys a wrapped response may hide the payload under.
const ENVELOPE_KEYS: &[&str] = &["response", "output", "result", "text", "content"];

/// Recover a JSON object from the raw model response.
pub fn parse_summary_response(raw: &str) -> Result<Value, PipelineError> {
    parse_with_depth(raw, 0)
}

fn parse_with_depth(raw: &str, depth: u8) -> Result<Value, PipelineError> {
    // Envelope unwrapping is bounded; anything deeper is garbage.
    if depth > 3 {
        return Err(PipelineError::MalformedResponse(
            "envelope nesting too deep".to_string(),
        ));
    }

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::MalformedResponse("empty response".to_string()));
    }

    // 1. Bare JSON object.
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if let Some(object) = as_summary_object(value, depth)? {
            return Ok(object);
        }
    }

    // 2. Fenced code block.
    if let Some(fenced) = extract_fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(&fenced) {
            if let Some(object) = as_summary_object(value, depth)? {
                return Ok(object);
            }
        }
    }

    // 3. First balanced object span.
    if let Some(span) = extract_balanced_object(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(&span) {
            if let Some(object) = as_summary_object(value, depth)? {
                return Ok(object);
            }
        }
    }

    Err(PipelineError::MalformedResponse(
        "no JSON object found in response".to_string(),
    ))
}

/// Accept an object, unwrapping one envelope layer if that is what we got.
/// Returns `Ok(None)` when the value is not an object at all.
fn as_summary_object(value: Value, depth: u8) -> Result<Option<Value>, PipelineError> {
    let Value::Object(map) = value else {
        return Ok(None);
    };

    // An envelope is an object that lacks the required fields but carries a
    // known payload key with a string inside.
    let looks_like_summary = REQUIRED_FIELDS.iter().any(|f| map.contains_key(*f));
    if !looks_like_summary {
        for key in ENVELOPE_KEYS {
            if let Some(Value::String(inner)) = map.get(*key) {
                return parse_with_depth(inner, depth + 1).map(Some);
            }
        }
    }

    Ok(Some(Value::Object(map)))
}

/// Contents of the first ``` fenced block, tolerating a `json` language tag.
fn extract_fenced_block(text: &str) -> Option<String> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    let after_tag = after_fence
        .strip_prefix("json")
        .or_else(|| after_fence.strip_prefix("JSON"))
        .unwrap_or(after_fence);
    let end = after_tag.find("```")?;
    Some(after_tag[..end].trim().to_string())
}

/// First balanced `{...}` span, respecting strings and escapes.
fn extract_balanced_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Verify the required clinical fields are present and non-empty.
pub fn require_fields(object: &Value) -> Result<(), PipelineError> {
    for field in REQUIRED_FIELDS {
        let present = object
            .get(*field)
            .and_then(Value::as_str)
            .is_some_and(|s| !s.trim().is_empty());
        if !present {
            return Err(PipelineError::MissingRequiredField(field));
        }
    }
    Ok(())
}
