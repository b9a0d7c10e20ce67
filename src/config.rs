//! Service configuration, read once at startup from the environment.
//!
//! Every tunable has a default so a local instance starts with nothing but
//! `PREVISIT_DB_PATH` and the AI credentials set. The pipeline-facing subset
//! lives in `PipelineConfig` so workers can be tested without touching the
//! environment.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

pub const APP_NAME: &str = "Previsit";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address the HTTP trigger endpoints bind to.
    pub bind_addr: SocketAddr,
    /// Path of the SQLite database file.
    pub db_path: PathBuf,
    /// Base URL this instance is reachable at, used for the internal
    /// stage hand-off call (file extraction → summary generation).
    pub self_base_url: String,
    /// Generative-AI service endpoint + credentials.
    pub genai_base_url: String,
    pub genai_api_key: String,
    pub genai_model: String,
    /// Object storage endpoint + service credential.
    pub storage_base_url: String,
    pub storage_service_key: String,
    pub pipeline: PipelineConfig,
}

/// Tunables consumed by the pipeline workers.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Lease duration after which a stale `processing` status is reclaimable.
    pub lock_timeout_minutes: i64,
    /// Hard ceiling on a single uploaded file (declared and actual bytes).
    pub max_file_bytes: u64,
    /// Wall-clock ceiling on remote-document readiness polling.
    pub upload_poll_ceiling_secs: u64,
    /// Interval between remote-document state polls.
    pub upload_poll_interval_secs: u64,
    /// Delay before reading the file list, so near-simultaneous uploads
    /// batch into one run instead of one run per file.
    pub debounce_secs: u64,
    /// Maximum attempts against the generative-AI service per summary run.
    pub max_ai_attempts: u32,
    /// Linear backoff unit between retry attempts.
    pub retry_backoff_secs: u64,
    /// Extended pause before the final attempt, to absorb rate limiting.
    pub final_attempt_pause_secs: u64,
    /// Per-document character ceiling when assembling the prompt context.
    pub context_char_cap: usize,
    /// Ceiling on the persisted `error_message` column.
    pub error_message_cap: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_minutes: 5,
            max_file_bytes: 10 * 1024 * 1024,
            upload_poll_ceiling_secs: 60,
            upload_poll_interval_secs: 2,
            debounce_secs: 2,
            max_ai_attempts: 3,
            retry_backoff_secs: 5,
            final_attempt_pause_secs: 60,
            context_char_cap: 4000,
            error_message_cap: 500,
        }
    }
}

impl PipelineConfig {
    /// Test configuration with all delays zeroed out.
    pub fn fast() -> Self {
        Self {
            debounce_secs: 0,
            retry_backoff_secs: 0,
            final_attempt_pause_secs: 0,
            upload_poll_interval_secs: 0,
            upload_poll_ceiling_secs: 1,
            ..Self::default()
        }
    }
}

impl ServiceConfig {
    /// Build the configuration from environment variables.
    pub fn from_env() -> Self {
        let bind_addr = env_or("PREVISIT_BIND_ADDR", "127.0.0.1:8787")
            .parse()
            .unwrap_or_else(|_| "127.0.0.1:8787".parse().expect("literal addr parses"));
        let self_base_url = env::var("PREVISIT_SELF_BASE_URL")
            .unwrap_or_else(|_| format!("http://{bind_addr}"));

        Self {
            bind_addr,
            db_path: PathBuf::from(env_or("PREVISIT_DB_PATH", "previsit.db")),
            self_base_url,
            genai_base_url: env_or(
                "GENAI_BASE_URL",
                "https://generativelanguage.googleapis.com",
            ),
            genai_api_key: env::var("GENAI_API_KEY").unwrap_or_default(),
            genai_model: env_or("GENAI_MODEL", "gemini-2.0-flash"),
            storage_base_url: env::var("STORAGE_BASE_URL").unwrap_or_default(),
            storage_service_key: env::var("STORAGE_SERVICE_KEY").unwrap_or_default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_defaults_match_contract() {
        let config = PipelineConfig::default();
        assert_eq!(config.lock_timeout_minutes, 5);
        assert_eq!(config.max_file_bytes, 10 * 1024 * 1024);
        assert_eq!(config.upload_poll_ceiling_secs, 60);
        assert_eq!(config.max_ai_attempts, 3);
        assert_eq!(config.final_attempt_pause_secs, 60);
        assert_eq!(config.context_char_cap, 4000);
        assert_eq!(config.debounce_secs, 2);
    }

    #[test]
    fn fast_config_has_no_delays() {
        let config = PipelineConfig::fast();
        assert_eq!(config.debounce_secs, 0);
        assert_eq!(config.retry_backoff_secs, 0);
        assert_eq!(config.final_attempt_pause_secs, 0);
        // The non-delay limits stay at production values
        assert_eq!(config.max_ai_attempts, 3);
        assert_eq!(config.max_file_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, env!("CARGO_PKG_VERSION"));
    }
}
