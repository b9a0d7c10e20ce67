//! External generative-AI service access.
//!
//! The pipeline talks to the service through the `AiClient` trait so workers
//! can be exercised with `MockAiClient` in tests. The real implementation
//! (`GeminiClient`) lives in `gemini.rs`: resumable document upload, remote
//! state polling, content generation, best-effort deletion.

pub mod gemini;

pub use gemini::GeminiClient;

use std::time::{Duration, Instant};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AiError {
    #[error("Cannot reach AI service at {0}")]
    Connection(String),

    #[error("AI service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("AI request timed out after {0}s")]
    Timeout(u64),

    #[error("Failed to parse AI service response: {0}")]
    ResponseParsing(String),

    #[error("Upload session missing upload URL")]
    MissingUploadUrl,

    #[error("Remote document {name} not ready within {ceiling_secs}s (last state: {state})")]
    DocumentNotReady {
        name: String,
        state: String,
        ceiling_secs: u64,
    },

    #[error("Remote document {0} failed remote processing")]
    DocumentFailed(String),

    #[error("AI service returned an empty response")]
    EmptyResponse,
}

/// Lifecycle state of a document uploaded to the AI service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteDocumentState {
    Processing,
    Active,
    Failed,
}

impl RemoteDocumentState {
    pub fn parse(s: &str) -> Self {
        match s {
            "ACTIVE" => Self::Active,
            "FAILED" => Self::Failed,
            _ => Self::Processing,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "PROCESSING",
            Self::Active => "ACTIVE",
            Self::Failed => "FAILED",
        }
    }
}

/// A document held by the AI service after upload.
#[derive(Debug, Clone)]
pub struct RemoteDocument {
    /// Service-side resource name (used for state polling and deletion).
    pub name: String,
    /// Reference URI embedded into generation requests.
    pub uri: String,
    pub mime_type: String,
    pub state: RemoteDocumentState,
}

/// Seam between the pipeline and the external generative-AI service.
pub trait AiClient: Send + Sync {
    /// Upload a document payload, returning the remote handle. The document
    /// may still be in `Processing` state on return.
    fn upload_document(
        &self,
        display_name: &str,
        mime_type: &str,
        bytes: &[u8],
    ) -> Result<RemoteDocument, AiError>;

    /// Current state of an uploaded document.
    fn get_document_state(&self, name: &str) -> Result<RemoteDocumentState, AiError>;

    /// Generate from a prompt plus an uploaded document reference.
    fn extract_document(&self, document: &RemoteDocument, prompt: &str) -> Result<String, AiError>;

    /// Generate from a prompt plus an inline base64 image payload.
    fn analyze_image(
        &self,
        mime_type: &str,
        base64_data: &str,
        prompt: &str,
    ) -> Result<String, AiError>;

    /// Plain text-to-text generation (summary stage).
    fn generate(&self, prompt: &str) -> Result<String, AiError>;

    /// Delete an uploaded document. Callers treat failures as best-effort.
    fn delete_document(&self, name: &str) -> Result<(), AiError>;
}

/// Poll an uploaded document until it reaches `Active`, bounded by a
/// wall-clock ceiling. `Failed` and ceiling expiry are both errors; the
/// caller records them as a per-file failure, not a pipeline abort.
pub fn wait_until_active(
    client: &dyn AiClient,
    document: &RemoteDocument,
    ceiling: Duration,
    interval: Duration,
) -> Result<(), AiError> {
    if document.state == RemoteDocumentState::Active {
        return Ok(());
    }

    let deadline = Instant::now() + ceiling;
    loop {
        match client.get_document_state(&document.name)? {
            RemoteDocumentState::Active => return Ok(()),
            RemoteDocumentState::Failed => {
                return Err(AiError::DocumentFailed(document.name.clone()));
            }
            RemoteDocumentState::Processing => {}
        }

        if Instant::now() >= deadline {
            return Err(AiError::DocumentNotReady {
                name: document.name.clone(),
                state: RemoteDocumentState::Processing.as_str().to_string(),
                ceiling_secs: ceiling.as_secs(),
            });
        }
        std::thread::sleep(interval);
    }
}

// ═══════════════════════════════════════════════════════════
// Mock client for tests
// ═══════════════════════════════════════════════════════════

use std::collections::VecDeque;
use std::sync::Mutex;

/// Scripted AI client for tests. Generation responses are consumed in order;
/// `Err` entries become connection errors so retry paths can be exercised.
pub struct MockAiClient {
    responses: Mutex<VecDeque<Result<String, String>>>,
    document_states: Mutex<VecDeque<RemoteDocumentState>>,
    pub calls: Mutex<Vec<String>>,
}

impl MockAiClient {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            document_states: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful generation response.
    pub fn with_response(self, response: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(response.to_string()));
        self
    }

    /// Queue a failed generation attempt.
    pub fn with_error(self, message: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
        self
    }

    /// Queue document states returned by successive polls.
    pub fn with_document_states(self, states: &[RemoteDocumentState]) -> Self {
        self.document_states.lock().unwrap().extend(states.iter().copied());
        self
    }

    pub fn call_log(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    fn next_response(&self) -> Result<String, AiError> {
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(AiError::Connection(message)),
            None => Err(AiError::EmptyResponse),
        }
    }
}

impl Default for MockAiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl AiClient for MockAiClient {
    fn upload_document(
        &self,
        display_name: &str,
        mime_type: &str,
        _bytes: &[u8],
    ) -> Result<RemoteDocument, AiError> {
        self.record(&format!("upload:{display_name}"));
        Ok(RemoteDocument {
            name: format!("files/mock-{display_name}"),
            uri: format!("https://mock.local/files/mock-{display_name}"),
            mime_type: mime_type.to_string(),
            state: RemoteDocumentState::Processing,
        })
    }

    fn get_document_state(&self, name: &str) -> Result<RemoteDocumentState, AiError> {
        self.record(&format!("state:{name}"));
        Ok(self
            .document_states
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RemoteDocumentState::Active))
    }

    fn extract_document(&self, document: &RemoteDocument, _prompt: &str) -> Result<String, AiError> {
        self.record(&format!("extract:{}", document.name));
        self.next_response()
    }

    fn analyze_image(
        &self,
        mime_type: &str,
        _base64_data: &str,
        _prompt: &str,
    ) -> Result<String, AiError> {
        self.record(&format!("analyze:{mime_type}"));
        self.next_response()
    }

    fn generate(&self, _prompt: &str) -> Result<String, AiError> {
        self.record("generate");
        self.next_response()
    }

    fn delete_document(&self, name: &str) -> Result<(), AiError> {
        self.record(&format!("delete:{name}"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_state_parsing() {
        assert_eq!(RemoteDocumentState::parse("ACTIVE"), RemoteDocumentState::Active);
        assert_eq!(RemoteDocumentState::parse("FAILED"), RemoteDocumentState::Failed);
        assert_eq!(RemoteDocumentState::parse("PROCESSING"), RemoteDocumentState::Processing);
        assert_eq!(
            RemoteDocumentState::parse("STATE_UNSPECIFIED"),
            RemoteDocumentState::Processing
        );
    }

    #[test]
    fn wait_until_active_polls_through_processing() {
        let client = MockAiClient::new().with_document_states(&[
            RemoteDocumentState::Processing,
            RemoteDocumentState::Processing,
            RemoteDocumentState::Active,
        ]);
        let doc = client.upload_document("report.pdf", "application/pdf", b"%PDF").unwrap();

        let result = wait_until_active(
            &client,
            &doc,
            Duration::from_secs(5),
            Duration::from_millis(0),
        );
        assert!(result.is_ok());
        assert_eq!(client.call_log().iter().filter(|c| c.starts_with("state:")).count(), 3);
    }

    #[test]
    fn wait_until_active_skips_poll_when_already_active() {
        let client = MockAiClient::new();
        let doc = RemoteDocument {
            name: "files/ready".into(),
            uri: "https://mock.local/files/ready".into(),
            mime_type: "application/pdf".into(),
            state: RemoteDocumentState::Active,
        };

        wait_until_active(&client, &doc, Duration::from_secs(1), Duration::from_millis(0))
            .unwrap();
        assert!(client.call_log().is_empty());
    }

    #[test]
    fn wait_until_active_fails_on_remote_failure() {
        let client =
            MockAiClient::new().with_document_states(&[RemoteDocumentState::Failed]);
        let doc = client.upload_document("bad.pdf", "application/pdf", b"%PDF").unwrap();

        let result = wait_until_active(
            &client,
            &doc,
            Duration::from_secs(5),
            Duration::from_millis(0),
        );
        assert!(matches!(result, Err(AiError::DocumentFailed(_))));
    }

    #[test]
    fn wait_until_active_enforces_ceiling() {
        // A client that always reports Processing.
        struct StuckClient;
        impl AiClient for StuckClient {
            fn upload_document(&self, _: &str, _: &str, _: &[u8]) -> Result<RemoteDocument, AiError> {
                unreachable!()
            }
            fn get_document_state(&self, _: &str) -> Result<RemoteDocumentState, AiError> {
                Ok(RemoteDocumentState::Processing)
            }
            fn extract_document(&self, _: &RemoteDocument, _: &str) -> Result<String, AiError> {
                unreachable!()
            }
            fn analyze_image(&self, _: &str, _: &str, _: &str) -> Result<String, AiError> {
                unreachable!()
            }
            fn generate(&self, _: &str) -> Result<String, AiError> {
                unreachable!()
            }
            fn delete_document(&self, _: &str) -> Result<(), AiError> {
                Ok(())
            }
        }

        let doc = RemoteDocument {
            name: "files/stuck".into(),
            uri: "https://mock.local/files/stuck".into(),
            mime_type: "application/pdf".into(),
            state: RemoteDocumentState::Processing,
        };

        let result = wait_until_active(
            &StuckClient,
            &doc,
            Duration::from_millis(20),
            Duration::from_millis(5),
        );
        assert!(matches!(result, Err(AiError::DocumentNotReady { .. })));
    }

    #[test]
    fn mock_exhausted_responses_error() {
        let client = MockAiClient::new().with_response("one");
        assert_eq!(client.generate("p").unwrap(), "one");
        assert!(matches!(client.generate("p"), Err(AiError::EmptyResponse)));
    }

    #[test]
    fn mock_scripted_error_then_success() {
        let client = MockAiClient::new().with_error("rate limited").with_response("ok");
        assert!(matches!(client.generate("p"), Err(AiError::Connection(_))));
        assert_eq!(client.generate("p").unwrap(), "ok");
    }
}
