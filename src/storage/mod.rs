//! Object storage access.
//!
//! Uploaded patient files live in an external object store and are fetched
//! through short-lived signed read URLs. The `ObjectStore` trait is the seam;
//! `HttpObjectStore` is the real implementation, `MockObjectStore` serves the
//! extraction worker tests.

pub mod http;

pub use http::HttpObjectStore;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Cannot reach object storage at {0}")]
    Connection(String),

    #[error("Object storage returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object {path} exceeds the size ceiling ({size} > {limit} bytes)")]
    TooLarge { path: String, size: u64, limit: u64 },

    #[error("Failed to parse storage response: {0}")]
    ResponseParsing(String),
}

/// Seam between the pipeline and the object store.
pub trait ObjectStore: Send + Sync {
    /// Resolve a short-lived read URL for a stored object.
    fn signed_url(&self, path: &str) -> Result<String, StorageError>;

    /// Download an object, enforcing `limit` bytes as a hard ceiling on the
    /// actual payload (the declared size is checked separately upstream).
    fn download(&self, url: &str, path: &str, limit: u64) -> Result<Vec<u8>, StorageError>;
}

// ═══════════════════════════════════════════════════════════
// Mock store for tests
// ═══════════════════════════════════════════════════════════

use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory object store keyed by storage path.
pub struct MockObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_object(self, path: &str, bytes: &[u8]) -> Self {
        self.objects
            .lock()
            .unwrap()
            .insert(path.to_string(), bytes.to_vec());
        self
    }
}

impl Default for MockObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for MockObjectStore {
    fn signed_url(&self, path: &str) -> Result<String, StorageError> {
        if self.objects.lock().unwrap().contains_key(path) {
            Ok(format!("https://mock.storage/signed/{path}"))
        } else {
            Err(StorageError::NotFound(path.to_string()))
        }
    }

    fn download(&self, _url: &str, path: &str, limit: u64) -> Result<Vec<u8>, StorageError> {
        let objects = self.objects.lock().unwrap();
        let bytes = objects
            .get(path)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        if bytes.len() as u64 > limit {
            return Err(StorageError::TooLarge {
                path: path.to_string(),
                size: bytes.len() as u64,
                limit,
            });
        }
        Ok(bytes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_store_roundtrip() {
        let store = MockObjectStore::new().with_object("uploads/a.pdf", b"%PDF-1.7");
        let url = store.signed_url("uploads/a.pdf").unwrap();
        assert!(url.contains("uploads/a.pdf"));
        let bytes = store.download(&url, "uploads/a.pdf", 1024).unwrap();
        assert_eq!(bytes, b"%PDF-1.7");
    }

    #[test]
    fn mock_store_missing_object() {
        let store = MockObjectStore::new();
        assert!(matches!(
            store.signed_url("uploads/missing.pdf"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn mock_store_enforces_limit() {
        let store = MockObjectStore::new().with_object("uploads/big.pdf", &[0u8; 64]);
        let result = store.download("url", "uploads/big.pdf", 32);
        assert!(matches!(result, Err(StorageError::TooLarge { size: 64, .. })));
    }
}
