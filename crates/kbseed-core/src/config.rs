//! kbseed Configuration Management
//!
//! Handles configuration from environment variables and TOML files, with
//! defaults matching the hosted Chroma and Hugging Face endpoints.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const REDACTED: &str = "********";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Vector store connection
    pub store: StoreConfig,

    /// Embedding provider
    pub embedding: EmbeddingConfig,

    /// Ingestion run settings
    pub ingest: IngestConfig,

    /// Query settings
    pub query: QueryConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env(|key| std::env::var(key).ok())
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(self) -> Result<Self, ConfigError> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Overlay every variable `lookup` knows about onto this configuration
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Vector store
        if let Some(url) = lookup("CHROMA_API_URL") {
            self.store.api_url = url;
        }
        if let Some(key) = lookup("CHROMA_API_KEY") {
            self.store.api_key = Some(key);
        }
        if let Some(tenant) = lookup("CHROMA_TENANT") {
            self.store.tenant = Some(tenant);
        }
        if let Some(database) = lookup("CHROMA_DATABASE") {
            self.store.database = database;
        }
        if let Some(collection) = lookup("CHROMA_COLLECTION") {
            self.store.collection = collection;
        }
        if let Some(secs) = lookup("CHROMA_TIMEOUT_SECS") {
            self.store.timeout_secs = parse_value("CHROMA_TIMEOUT_SECS", secs)?;
        }

        // Embedding provider
        if let Some(url) = lookup("HF_API_URL") {
            self.embedding.api_url = url;
        }
        if let Some(token) = lookup("HF_TOKEN") {
            self.embedding.api_token = Some(token);
        }
        if let Some(model) = lookup("EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Some(dimension) = lookup("EMBEDDING_DIMENSIONS") {
            self.embedding.dimension = parse_value("EMBEDDING_DIMENSIONS", dimension)?;
        }
        if let Some(secs) = lookup("EMBEDDING_TIMEOUT_SECS") {
            self.embedding.timeout_secs = parse_value("EMBEDDING_TIMEOUT_SECS", secs)?;
        }

        // Ingestion
        if let Some(path) = lookup("KBSEED_CHUNKS_PATH") {
            self.ingest.chunks_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("KBSEED_VIDEOS_PATH") {
            self.ingest.videos_path = PathBuf::from(path);
        }
        if let Some(ms) = lookup("KBSEED_THROTTLE_MS") {
            self.ingest.throttle_ms = parse_value("KBSEED_THROTTLE_MS", ms)?;
        }
        if let Some(policy) = lookup("KBSEED_CLEAR_POLICY") {
            self.ingest.clear_policy = policy.parse()?;
        }

        // Query
        if let Some(k) = lookup("KBSEED_TOP_K") {
            self.query.top_k = parse_value("KBSEED_TOP_K", k)?;
        }

        // Logging
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(self)
    }

    /// Check that everything needed to talk to both services is present
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if is_blank(&self.store.api_key) {
            missing.push("CHROMA_API_KEY");
        }
        if is_blank(&self.store.tenant) {
            missing.push("CHROMA_TENANT");
        }
        if is_blank(&self.embedding.api_token) {
            missing.push("HF_TOKEN");
        }
        if self.store.collection.trim().is_empty() {
            missing.push("CHROMA_COLLECTION");
        }
        if !missing.is_empty() {
            return Err(ConfigError::MissingRequired(missing.join(", ")));
        }

        if self.embedding.dimension == 0 {
            return Err(ConfigError::InvalidValue {
                key: "EMBEDDING_DIMENSIONS".to_string(),
                value: "0".to_string(),
            });
        }
        if self.query.top_k == 0 {
            return Err(ConfigError::InvalidValue {
                key: "KBSEED_TOP_K".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(())
    }

    /// Copy with credentials masked, for display
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.store.api_key.is_some() {
            config.store.api_key = Some(REDACTED.to_string());
        }
        if config.embedding.api_token.is_some() {
            config.embedding.api_token = Some(REDACTED.to_string());
        }
        config
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

fn parse_value<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

/// Vector store (Chroma v2 REST) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base URL of the REST API, including the version prefix
    pub api_url: String,

    /// Token sent in the `X-Chroma-Token` header
    pub api_key: Option<String>,

    /// Tenant id
    pub tenant: Option<String>,

    /// Database name
    pub database: String,

    /// Collection name
    pub collection: String,

    /// Description stored on the collection when it is created
    pub collection_description: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Retries for rate-limited or 5xx responses
    pub max_retries: u32,

    /// First retry delay in milliseconds (doubles per retry)
    pub retry_base_ms: u64,
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.trychroma.com/api/v2".to_string(),
            api_key: None,
            tenant: None,
            database: "Prod".to_string(),
            collection: "sharematch_faq".to_string(),
            collection_description: "ShareMatch FAQ embeddings".to_string(),
            timeout_secs: 60,
            max_retries: 3,
            retry_base_ms: 500,
        }
    }
}

/// Embedding provider (Hugging Face feature extraction) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Models base URL; the model id and pipeline path are appended
    pub api_url: String,

    /// Bearer token
    pub api_token: Option<String>,

    /// Model identifier
    pub model: String,

    /// Declared output dimensionality of the model
    pub dimension: usize,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Wait before the single retry after a model-loading response
    pub cold_start_delay_secs: u64,
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cold_start_delay(&self) -> Duration {
        Duration::from_secs(self.cold_start_delay_secs)
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_url: "https://router.huggingface.co/hf-inference/models".to_string(),
            api_token: None,
            model: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            dimension: 384,
            timeout_secs: 120,
            cold_start_delay_secs: 20,
        }
    }
}

/// When the collection is cleared during a reseed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClearPolicy {
    /// Clear before embedding anything
    #[default]
    Eager,
    /// Embed everything first, clear only when there is something to upload
    Staged,
}

impl std::str::FromStr for ClearPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "eager" => Ok(Self::Eager),
            "staged" => Ok(Self::Staged),
            _ => Err(ConfigError::InvalidValue {
                key: "KBSEED_CLEAR_POLICY".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Ingestion run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// JSON file with pre-chunked text (`[{content, page}]`)
    pub chunks_path: PathBuf,

    /// JSON video manifest (`[{id, title, content, r2_file_name?}]`)
    pub videos_path: PathBuf,

    /// `source` metadata recorded for text chunks
    pub text_source_name: String,

    /// `source` metadata recorded for videos
    pub video_source_name: String,

    /// Minimum spacing between embedding calls in milliseconds
    pub throttle_ms: u64,

    pub clear_policy: ClearPolicy,
}

impl IngestConfig {
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunks_path: PathBuf::from("data/faq_chunks.json"),
            videos_path: PathBuf::from("data/videos.json"),
            text_source_name: "faq.pdf".to_string(),
            video_source_name: "videos.json".to_string(),
            throttle_ms: 500,
            clear_policy: ClearPolicy::Eager,
        }
    }
}

/// Query configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Number of nearest documents returned
    pub top_k: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { top_k: 4 }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}
