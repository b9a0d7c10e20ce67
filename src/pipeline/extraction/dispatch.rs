//! Per-file extraction dispatch.
//!
//! Declared MIME type decides the protocol: PDFs go through the resumable
//! upload + poll-until-active path, images are inlined as base64. Anything
//! else fails that file with a descriptive reason and never blocks the batch.
//! Both prompts are fixed and restricted to objective content: the model is
//! asked to transcribe and describe, never to interpret or diagnose.

use std::time::Duration;

use base64::Engine;

use crate::ai::{wait_until_active, AiClient};
use crate::config::PipelineConfig;
use crate::pipeline::error::PipelineError;

/// Transcription prompt for uploaded documents.
const DOCUMENT_EXTRACTION_PROMPT: &str = "\
Extract the complete text content of this medical document. Transcribe all \
objective medical information exactly as written: patient details, dates, \
medications with doses, lab values with units and reference ranges, \
diagnoses as stated, procedures, and clinician instructions. Preserve the \
document's structure with headings where present. Do not interpret, \
summarize, or add any clinical opinion. Output plain text only.";

/// Description prompt for inline images.
const IMAGE_ANALYSIS_PROMPT: &str = "\
Describe the objectively visible content of this image from a medical \
intake context. Transcribe any legible text exactly as written (labels, \
prescriptions, monitor readouts, report fragments). For photographs, \
describe only what is visible without diagnosing or interpreting. Output \
plain text only.";

/// How a file will be extracted, decided from its declared MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Image(String),
    Unsupported(String),
}

/// Classify a file. The declared MIME type wins; when it is absent the file
/// name's extension is used as a fallback guess.
pub fn classify_file(mime_type: Option<&str>, file_name: &str) -> FileKind {
    let declared = mime_type
        .map(|m| m.trim().to_lowercase())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            mime_guess::from_path(file_name)
                .first_raw()
                .unwrap_or("")
                .to_lowercase()
        });

    if declared == "application/pdf" {
        FileKind::Pdf
    } else if declared.starts_with("image/") {
        FileKind::Image(declared)
    } else if declared.is_empty() {
        FileKind::Unsupported("unknown file type (no MIME type declared)".to_string())
    } else {
        FileKind::Unsupported(format!("unsupported file type: {declared}"))
    }
}

/// Run the extraction protocol for one downloaded file.
pub fn run_extraction(
    ai: &dyn AiClient,
    kind: &FileKind,
    display_name: &str,
    bytes: &[u8],
    config: &PipelineConfig,
) -> Result<String, PipelineError> {
    match kind {
        FileKind::Pdf => extract_pdf(ai, display_name, bytes, config),
        FileKind::Image(mime) => {
            let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
            Ok(ai.analyze_image(mime, &encoded, IMAGE_ANALYSIS_PROMPT)?)
        }
        FileKind::Unsupported(reason) => Err(PipelineError::FileRejected(reason.clone())),
    }
}

/// Upload → poll until active → extract → best-effort delete.
fn extract_pdf(
    ai: &dyn AiClient,
    display_name: &str,
    bytes: &[u8],
    config: &PipelineConfig,
) -> Result<String, PipelineError> {
    let document = ai.upload_document(display_name, "application/pdf", bytes)?;

    let readiness = wait_until_active(
        ai,
        &document,
        Duration::from_secs(config.upload_poll_ceiling_secs),
        Duration::from_secs(config.upload_poll_interval_secs),
    );

    let result = match readiness {
        Ok(()) => ai
            .extract_document(&document, DOCUMENT_EXTRACTION_PROMPT)
            .map_err(PipelineError::from),
        Err(e) => Err(PipelineError::from(e)),
    };

    // The remote copy is no longer needed either way.
    if let Err(e) = ai.delete_document(&document.name) {
        tracing::warn!(
            document = document.name,
            error = %e,
            "Failed to delete remote document (ignored)"
        );
    }

    result
}
