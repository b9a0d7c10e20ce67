//! Gemini HTTP client.
//!
//! Blocking reqwest client, constructed per invocation and injected into the
//! workers (no shared global client). Three wire concerns live here:
//!
//! - the resumable upload protocol for document payloads
//!   (start session → upload URL → push bytes with `upload, finalize`),
//! - document state reads for poll-until-active,
//! - `generateContent` with `file_data`, `inline_data`, or plain text parts.

use serde::{Deserialize, Serialize};

use super::{AiClient, AiError, RemoteDocument, RemoteDocumentState};

/// Gemini API client.
pub struct GeminiClient {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl GeminiClient {
    pub fn new(base_url: &str, api_key: &str, model: &str, timeout_secs: u64) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            client,
            timeout_secs,
        }
    }

    fn map_send_error(&self, e: reqwest::Error) -> AiError {
        if e.is_connect() {
            AiError::Connection(self.base_url.clone())
        } else if e.is_timeout() {
            AiError::Timeout(self.timeout_secs)
        } else {
            AiError::ResponseParsing(e.to_string())
        }
    }

    fn check_status(response: reqwest::blocking::Response) -> Result<reqwest::blocking::Response, AiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AiError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    fn generate_content(&self, parts: Vec<Part>) -> Result<String, AiError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let body = GenerateContentRequest {
            contents: vec![Content { parts }],
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| self.map_send_error(e))?;
        let response = Self::check_status(response)?;

        let parsed: GenerateContentResponse = response
            .json()
            .map_err(|e| AiError::ResponseParsing(e.to_string()))?;
        extract_candidate_text(&parsed)
    }
}

// ── Wire types ──────────────────────────────────────────────

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum Part {
    Text(String),
    FileData { mime_type: String, file_uri: String },
    InlineData { mime_type: String, data: String },
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct FileEnvelope {
    file: FileResource,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileResource {
    name: String,
    #[serde(default)]
    uri: String,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    state: String,
}

/// Join all candidate text parts into one response string.
fn extract_candidate_text(response: &GenerateContentResponse) -> Result<String, AiError> {
    let text: String = response
        .candidates
        .iter()
        .filter_map(|c| c.content.as_ref())
        .flat_map(|c| c.parts.iter())
        .filter_map(|p| p.text.as_deref())
        .collect::<Vec<_>>()
        .join("");

    if text.trim().is_empty() {
        return Err(AiError::EmptyResponse);
    }
    Ok(text)
}

impl AiClient for GeminiClient {
    fn upload_document(
        &self,
        display_name: &str,
        mime_type: &str,
        bytes: &[u8],
    ) -> Result<RemoteDocument, AiError> {
        // 1. Start a resumable upload session.
        let start_url = format!("{}/upload/v1beta/files?key={}", self.base_url, self.api_key);
        let start_body = serde_json::json!({ "file": { "display_name": display_name } });

        let response = self
            .client
            .post(&start_url)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&start_body)
            .send()
            .map_err(|e| self.map_send_error(e))?;
        let response = Self::check_status(response)?;

        let upload_url = response
            .headers()
            .get("X-Goog-Upload-URL")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or(AiError::MissingUploadUrl)?;

        // 2. Push the full payload and finalize in one request.
        let response = self
            .client
            .post(&upload_url)
            .header("X-Goog-Upload-Command", "upload, finalize")
            .header("X-Goog-Upload-Offset", "0")
            .body(bytes.to_vec())
            .send()
            .map_err(|e| self.map_send_error(e))?;
        let response = Self::check_status(response)?;

        let envelope: FileEnvelope = response
            .json()
            .map_err(|e| AiError::ResponseParsing(e.to_string()))?;

        Ok(RemoteDocument {
            name: envelope.file.name,
            uri: envelope.file.uri,
            mime_type: if envelope.file.mime_type.is_empty() {
                mime_type.to_string()
            } else {
                envelope.file.mime_type
            },
            state: RemoteDocumentState::parse(&envelope.file.state),
        })
    }

    fn get_document_state(&self, name: &str) -> Result<RemoteDocumentState, AiError> {
        let url = format!("{}/v1beta/{}?key={}", self.base_url, name, self.api_key);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| self.map_send_error(e))?;
        let response = Self::check_status(response)?;

        let resource: FileResource = response
            .json()
            .map_err(|e| AiError::ResponseParsing(e.to_string()))?;
        Ok(RemoteDocumentState::parse(&resource.state))
    }

    fn extract_document(&self, document: &RemoteDocument, prompt: &str) -> Result<String, AiError> {
        self.generate_content(vec![
            Part::FileData {
                mime_type: document.mime_type.clone(),
                file_uri: document.uri.clone(),
            },
            Part::Text(prompt.to_string()),
        ])
    }

    fn analyze_image(
        &self,
        mime_type: &str,
        base64_data: &str,
        prompt: &str,
    ) -> Result<String, AiError> {
        self.generate_content(vec![
            Part::InlineData {
                mime_type: mime_type.to_string(),
                data: base64_data.to_string(),
            },
            Part::Text(prompt.to_string()),
        ])
    }

    fn generate(&self, prompt: &str) -> Result<String, AiError> {
        self.generate_content(vec![Part::Text(prompt.to_string())])
    }

    fn delete_document(&self, name: &str) -> Result<(), AiError> {
        let url = format!("{}/v1beta/{}?key={}", self.base_url, name, self.api_key);
        let response = self
            .client
            .delete(&url)
            .send()
            .map_err(|e| self.map_send_error(e))?;
        Self::check_status(response)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructor_trims_trailing_slash() {
        let client = GeminiClient::new("https://api.example.com/", "k", "gemini-2.0-flash", 60);
        assert_eq!(client.base_url, "https://api.example.com");
        assert_eq!(client.model, "gemini-2.0-flash");
    }

    #[test]
    fn request_parts_serialize_camel_case() {
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![
                    Part::FileData {
                        mime_type: "application/pdf".into(),
                        file_uri: "https://api.example.com/files/abc".into(),
                    },
                    Part::Text("Extract the text".into()),
                ],
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        let part = &json["contents"][0]["parts"][0];
        assert!(part.get("fileData").is_some(), "expected fileData key, got {part}");
        assert_eq!(part["fileData"]["mime_type"], "application/pdf");
    }

    #[test]
    fn inline_data_serializes_with_payload() {
        let json = serde_json::to_value(Part::InlineData {
            mime_type: "image/png".into(),
            data: "aGVsbG8=".into(),
        })
        .unwrap();
        assert_eq!(json["inlineData"]["data"], "aGVsbG8=");
    }

    #[test]
    fn candidate_text_is_joined_across_parts() {
        let response: GenerateContentResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{
                "content": { "parts": [{"text": "Hello "}, {"text": "world"}] }
            }]
        }))
        .unwrap();
        assert_eq!(extract_candidate_text(&response).unwrap(), "Hello world");
    }

    #[test]
    fn empty_candidates_is_an_error() {
        let response: GenerateContentResponse =
            serde_json::from_value(serde_json::json!({"candidates": []})).unwrap();
        assert!(matches!(
            extract_candidate_text(&response),
            Err(AiError::EmptyResponse)
        ));
    }

    #[test]
    fn whitespace_only_text_is_an_error() {
        let response: GenerateContentResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "  \n"}]}}]
        }))
        .unwrap();
        assert!(matches!(
            extract_candidate_text(&response),
            Err(AiError::EmptyResponse)
        ));
    }

    #[test]
    fn file_resource_parses_wire_shape() {
        let envelope: FileEnvelope = serde_json::from_value(serde_json::json!({
            "file": {
                "name": "files/abc123",
                "uri": "https://api.example.com/v1beta/files/abc123",
                "mimeType": "application/pdf",
                "state": "PROCESSING"
            }
        }))
        .unwrap();
        assert_eq!(envelope.file.name, "files/abc123");
        assert_eq!(envelope.file.mime_type, "application/pdf");
        assert_eq!(
            RemoteDocumentState::parse(&envelope.file.state),
            RemoteDocumentState::Processing
        );
    }
}
