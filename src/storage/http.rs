//! HTTP object store client.
//!
//! Talks to the storage service's REST API: a signing endpoint that mints
//! short-lived read URLs, and plain GET for the payload. Blocking reqwest,
//! constructed per invocation like the AI client.

use serde::Deserialize;

use super::{ObjectStore, StorageError};

pub struct HttpObjectStore {
    base_url: String,
    service_key: String,
    client: reqwest::blocking::Client,
}

impl HttpObjectStore {
    pub fn new(base_url: &str, service_key: &str, timeout_secs: u64) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
            client,
        }
    }

    fn map_send_error(&self, e: reqwest::Error) -> StorageError {
        if e.is_connect() {
            StorageError::Connection(self.base_url.clone())
        } else {
            StorageError::ResponseParsing(e.to_string())
        }
    }
}

#[derive(Deserialize)]
struct SignedUrlResponse {
    #[serde(rename = "signedURL", alias = "signed_url")]
    signed_url: String,
}

impl ObjectStore for HttpObjectStore {
    fn signed_url(&self, path: &str) -> Result<String, StorageError> {
        let url = format!("{}/object/sign/{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.service_key)
            .json(&serde_json::json!({ "expiresIn": 300 }))
            .send()
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(StorageError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(StorageError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: SignedUrlResponse = response
            .json()
            .map_err(|e| StorageError::ResponseParsing(e.to_string()))?;

        // The signing endpoint returns a relative path.
        if parsed.signed_url.starts_with("http") {
            Ok(parsed.signed_url)
        } else {
            Ok(format!(
                "{}/{}",
                self.base_url,
                parsed.signed_url.trim_start_matches('/')
            ))
        }
    }

    fn download(&self, url: &str, path: &str, limit: u64) -> Result<Vec<u8>, StorageError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(StorageError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(StorageError::Http {
                status: status.as_u16(),
                body,
            });
        }

        // Reject on the declared length before pulling the body when the
        // server provides one.
        if let Some(len) = response.content_length() {
            if len > limit {
                return Err(StorageError::TooLarge {
                    path: path.to_string(),
                    size: len,
                    limit,
                });
            }
        }

        let bytes = response
            .bytes()
            .map_err(|e| StorageError::ResponseParsing(e.to_string()))?;
        if bytes.len() as u64 > limit {
            return Err(StorageError::TooLarge {
                path: path.to_string(),
                size: bytes.len() as u64,
                limit,
            });
        }
        Ok(bytes.to_vec())
    }
}
