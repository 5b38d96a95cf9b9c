//! Ambient configuration for the finance orchestration core.
//!
//! Provides [`CoreConfig`], loaded from environment variables the way the rest of the crate's
//! env-var overrides are read (see [`crate::integration_config`]). Nothing here parses a config
//! file - callers that want one can build a `CoreConfig` by hand.
//!
//! # Example
//!
//! ```rust
//! use finagent_core::config::CoreConfig;
//!
//! let config = CoreConfig::from_env();
//! assert!(config.context_byte_budget > 0);
//! ```

use std::env;
use std::path::PathBuf;

/// Global configuration for the orchestration core, sourced from environment variables.
///
/// Fields with no corresponding env var (the resource bounds from spec §5) are fixed
/// constants rather than configurable knobs, matching the source system's behavior.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// LLM provider identifier, e.g. `"openai"`. Read from `LITELLM_PROVIDER`.
    pub llm_provider: String,
    /// API key for the OpenAI-compatible LLM gateway. Read from `OPENAI_API_KEY`.
    pub openai_api_key: Option<String>,
    /// Embedding model identifier. Read from `EMBEDDING_MODEL`, defaults to
    /// `"text-embedding-3-small"`.
    pub embedding_model: String,
    /// Alpha Vantage API key. Read from `ALPHA_VANTAGE_API_KEY`.
    pub alpha_vantage_api_key: Option<String>,
    /// Financial Modeling Prep API key. Read from `FMP_API_KEY`.
    pub fmp_api_key: Option<String>,
    /// Directory backing the vector store, when the adapter in use is file-based.
    /// Read from `CHROMA_DB_PATH`, defaults to `"./chroma_db"`.
    pub chroma_db_path: PathBuf,
    /// Directory session snapshots and query history are written to.
    pub sessions_dir: PathBuf,
    /// Directory log files are written to, if the log sink in use is file-based.
    /// Read from `LOG_DIR`, defaults to `"./logs"`.
    pub log_dir: PathBuf,
    /// Log level filter string consumed by `env_logger`. Read from `LOG_LEVEL`,
    /// defaults to `"info"`.
    pub log_level: String,
    /// Byte-size target that triggers `StateManager::prune_context` between pipeline nodes.
    /// Fixed per spec §5.
    pub context_byte_budget: usize,
    /// TTL, in seconds, for `ContextCache` entries. Fixed per spec §5.
    pub context_cache_ttl_secs: u64,
    /// TTL, in seconds, for the vector-store query result cache. Fixed per spec §5.
    pub vector_query_cache_ttl_secs: u64,
    /// Maximum number of entries retained in the query-history ring. Fixed per spec §5.
    pub query_history_capacity: usize,
}

impl CoreConfig {
    /// Build a [`CoreConfig`] from the process environment, falling back to the documented
    /// defaults for anything unset. Never panics or fails - callers without any secrets
    /// configured simply get a config where the corresponding integrations report disabled.
    pub fn from_env() -> Self {
        CoreConfig {
            llm_provider: env::var("LITELLM_PROVIDER").unwrap_or_else(|_| "openai".to_string()),
            openai_api_key: env::var("OPENAI_API_KEY").ok(),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            alpha_vantage_api_key: env::var("ALPHA_VANTAGE_API_KEY").ok(),
            fmp_api_key: env::var("FMP_API_KEY").ok(),
            chroma_db_path: env::var("CHROMA_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./chroma_db")),
            sessions_dir: PathBuf::from("./sessions"),
            log_dir: env::var("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./logs")),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            context_byte_budget: 1_000_000,
            context_cache_ttl_secs: 86_400,
            vector_query_cache_ttl_secs: 3_600,
            query_history_capacity: 100,
        }
    }

    /// Initialize `env_logger` at the configured level. Idempotent - safe to call more than
    /// once (subsequent calls are no-ops, matching `env_logger`'s `try_init` contract).
    pub fn init_logging(&self) {
        let _ = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(&self.log_level),
        )
        .try_init();
    }
}

impl Default for CoreConfig {
    /// Equivalent to [`CoreConfig::from_env`] with no environment variables set: every
    /// optional secret is `None` and every directory points at a relative default.
    fn default() -> Self {
        CoreConfig {
            llm_provider: "openai".to_string(),
            openai_api_key: None,
            embedding_model: "text-embedding-3-small".to_string(),
            alpha_vantage_api_key: None,
            fmp_api_key: None,
            chroma_db_path: PathBuf::from("./chroma_db"),
            sessions_dir: PathBuf::from("./sessions"),
            log_dir: PathBuf::from("./logs"),
            log_level: "info".to_string(),
            context_byte_budget: 1_000_000,
            context_cache_ttl_secs: 86_400,
            vector_query_cache_ttl_secs: 3_600,
            query_history_capacity: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_secrets_and_sane_bounds() {
        let config = CoreConfig::default();
        assert!(config.openai_api_key.is_none());
        assert!(config.alpha_vantage_api_key.is_none());
        assert_eq!(config.context_byte_budget, 1_000_000);
        assert_eq!(config.query_history_capacity, 100);
    }
}
