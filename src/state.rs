//! Shared application state for the HTTP trigger endpoints.
//!
//! Nothing pipeline-related is cached here: every invocation opens its own
//! database connection and constructs its own service clients through the
//! injected factories, so stage functions stay stateless and concurrency
//! safety lives entirely in the data store. The factories exist so tests can
//! swap `GeminiClient`/`HttpObjectStore` for mocks.

use std::sync::Arc;

use rusqlite::Connection;

use crate::ai::{AiClient, GeminiClient};
use crate::config::ServiceConfig;
use crate::db::{self, DatabaseError};
use crate::storage::{HttpObjectStore, ObjectStore};

/// HTTP timeout for outbound AI calls. Generation on large contexts is slow;
/// this bounds the socket, not the pipeline (which has its own ceilings).
const AI_HTTP_TIMEOUT_SECS: u64 = 180;

/// HTTP timeout for object storage calls.
const STORAGE_HTTP_TIMEOUT_SECS: u64 = 60;

pub type AiFactory = Arc<dyn Fn() -> Box<dyn AiClient> + Send + Sync>;
pub type StoreFactory = Arc<dyn Fn() -> Box<dyn ObjectStore> + Send + Sync>;

pub struct AppState {
    pub config: ServiceConfig,
    ai_factory: AiFactory,
    store_factory: StoreFactory,
}

impl AppState {
    /// Production state: real Gemini + HTTP object store clients.
    pub fn new(config: ServiceConfig) -> Self {
        let ai_config = config.clone();
        let store_config = config.clone();
        Self {
            config,
            ai_factory: Arc::new(move || {
                Box::new(GeminiClient::new(
                    &ai_config.genai_base_url,
                    &ai_config.genai_api_key,
                    &ai_config.genai_model,
                    AI_HTTP_TIMEOUT_SECS,
                ))
            }),
            store_factory: Arc::new(move || {
                Box::new(HttpObjectStore::new(
                    &store_config.storage_base_url,
                    &store_config.storage_service_key,
                    STORAGE_HTTP_TIMEOUT_SECS,
                ))
            }),
        }
    }

    /// State with injected clients (tests).
    pub fn with_clients(
        config: ServiceConfig,
        ai_factory: AiFactory,
        store_factory: StoreFactory,
    ) -> Self {
        Self {
            config,
            ai_factory,
            store_factory,
        }
    }

    /// Open a fresh database connection for one invocation.
    pub fn open_db(&self) -> Result<Connection, DatabaseError> {
        db::open_database(&self.config.db_path)
    }

    /// Construct an AI client scoped to one invocation. Must be called from
    /// a blocking context (the client is a blocking HTTP client).
    pub fn ai_client(&self) -> Box<dyn AiClient> {
        (self.ai_factory)()
    }

    /// Construct an object store client scoped to one invocation.
    pub fn object_store(&self) -> Box<dyn ObjectStore> {
        (self.store_factory)()
    }
}
