//! Configuration management for ClauseForge services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Redis configuration (document-frequency cache)
    #[serde(default)]
    pub redis: Option<RedisConfig>,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Vector index (dense + sparse) configuration
    #[serde(default)]
    pub vector_index: VectorIndexConfig,

    /// Reranker service configuration
    #[serde(default)]
    pub reranker: RerankerConfig,

    /// BM25 encoder parameters
    #[serde(default)]
    pub bm25: Bm25Config,

    /// Hybrid retrieval configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Corpus statistics configuration
    #[serde(default)]
    pub corpus_stats: CorpusStatsConfig,

    /// Queue configuration (SQS)
    #[serde(default)]
    pub queue: QueueConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    /// Redis URL
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum attempts per request
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,

    /// Batch size for embedding requests
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VectorIndexConfig {
    /// API key for the index data plane
    pub api_key: Option<String>,

    /// Index name -> data-plane host URL
    #[serde(default)]
    pub hosts: HashMap<String, String>,

    /// Dense index name -> sparse index name
    #[serde(default)]
    pub sparse_indexes: HashMap<String, String>,

    /// Dense index used when a request does not name one
    #[serde(default = "default_dense_index")]
    pub default_dense_index: String,

    /// Request timeout in seconds
    #[serde(default = "default_index_timeout")]
    pub timeout_secs: u64,

    /// Vectors per upsert request
    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RerankerConfig {
    /// Reranking enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Provider: together, passthrough
    #[serde(default = "default_reranker_provider")]
    pub provider: String,

    /// API key for the reranker
    pub api_key: Option<String>,

    /// API base URL
    #[serde(default = "default_reranker_base")]
    pub api_base: String,

    /// Relevance model
    #[serde(default = "default_reranker_model")]
    pub model: String,

    /// Minimum relevance score kept after reranking
    #[serde(default = "default_rerank_threshold")]
    pub threshold: f32,

    /// Metadata key holding the chunk text
    #[serde(default = "default_text_key")]
    pub text_key: String,

    /// Request timeout in seconds
    #[serde(default = "default_reranker_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Bm25Config {
    /// Term frequency saturation
    #[serde(default = "default_k1")]
    pub k1: f32,

    /// Length normalization
    #[serde(default = "default_b")]
    pub b: f32,

    /// Size of the hashed vocabulary space
    #[serde(default = "default_vocab_size")]
    pub vocab_size: u32,

    /// Drop English stopwords during tokenization
    #[serde(default = "default_enabled")]
    pub remove_stopwords: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// RRF constant k
    #[serde(default = "default_rrf_k")]
    pub rrf_k: u32,

    /// Matches requested from each branch
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Per-branch timeout in milliseconds
    #[serde(default = "default_branch_timeout")]
    pub branch_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorpusStatsConfig {
    /// Aggregation service endpoint (local computation only when unset)
    pub aggregation_url: Option<String>,

    /// Attempts against the aggregation service before falling back
    #[serde(default = "default_stats_attempts")]
    pub max_attempts: u32,

    /// First backoff delay in milliseconds
    #[serde(default = "default_stats_backoff")]
    pub initial_backoff_ms: u64,

    /// Aggregation request timeout in seconds
    #[serde(default = "default_stats_timeout")]
    pub timeout_secs: u64,

    /// Serve document frequencies from a TTL cache (staleness accepted)
    #[serde(default)]
    pub doc_freq_cache_enabled: bool,

    /// TTL of cached document frequencies
    #[serde(default = "default_doc_freq_ttl")]
    pub doc_freq_cache_ttl_secs: u64,

    /// Relative avgdl drift that triggers a reindex
    #[serde(default = "default_drift_threshold")]
    pub reindex_drift_threshold: f64,

    /// Rows fetched per reindex page
    #[serde(default = "default_reindex_page_size")]
    pub reindex_page_size: u64,

    /// Concurrent sparse updates during reindex
    #[serde(default = "default_reindex_concurrency")]
    pub reindex_concurrency: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// SQS maintenance queue URL
    pub maintenance_queue_url: Option<String>,

    /// Dead letter queue URL
    pub dlq_url: Option<String>,

    /// Maximum messages to receive per poll
    #[serde(default = "default_queue_batch_size")]
    pub batch_size: u32,

    /// Long polling timeout in seconds
    #[serde(default = "default_queue_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Visibility timeout in seconds
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_max_connections() -> u32 { 50 }
fn default_min_connections() -> u32 { 5 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dimension() -> usize { 1536 }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_batch_size() -> usize { 100 }
fn default_dense_index() -> String { "contracts-dense".to_string() }
fn default_index_timeout() -> u64 { 10 }
fn default_upsert_batch_size() -> usize { 100 }
fn default_reranker_provider() -> String { "together".to_string() }
fn default_reranker_base() -> String { "https://api.together.xyz/v1".to_string() }
fn default_reranker_model() -> String { "Salesforce/Llama-Rank-V1".to_string() }
fn default_rerank_threshold() -> f32 { 0.30 }
fn default_text_key() -> String { "text".to_string() }
fn default_reranker_timeout() -> u64 { 15 }
fn default_k1() -> f32 { 1.5 }
fn default_b() -> f32 { 0.75 }
fn default_vocab_size() -> u32 { 2_147_483_647 }
fn default_rrf_k() -> u32 { 60 }
fn default_top_k() -> usize { 20 }
fn default_branch_timeout() -> u64 { 5_000 }
fn default_stats_attempts() -> u32 { 3 }
fn default_stats_backoff() -> u64 { 200 }
fn default_stats_timeout() -> u64 { 5 }
fn default_doc_freq_ttl() -> u64 { 60 }
fn default_drift_threshold() -> f64 { 0.10 }
fn default_reindex_page_size() -> u64 { 500 }
fn default_reindex_concurrency() -> usize { 8 }
fn default_queue_batch_size() -> u32 { 10 }
fn default_queue_poll_timeout() -> u64 { 20 }
fn default_visibility_timeout() -> u64 { 300 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "clauseforge".to_string() }
fn default_enabled() -> bool { true }

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            hosts: HashMap::new(),
            sparse_indexes: HashMap::new(),
            default_dense_index: default_dense_index(),
            timeout_secs: default_index_timeout(),
            upsert_batch_size: default_upsert_batch_size(),
        }
    }
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            provider: default_reranker_provider(),
            api_key: None,
            api_base: default_reranker_base(),
            model: default_reranker_model(),
            threshold: default_rerank_threshold(),
            text_key: default_text_key(),
            timeout_secs: default_reranker_timeout(),
        }
    }
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self {
            k1: default_k1(),
            b: default_b(),
            vocab_size: default_vocab_size(),
            remove_stopwords: default_enabled(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            top_k: default_top_k(),
            branch_timeout_ms: default_branch_timeout(),
        }
    }
}

impl Default for CorpusStatsConfig {
    fn default() -> Self {
        Self {
            aggregation_url: None,
            max_attempts: default_stats_attempts(),
            initial_backoff_ms: default_stats_backoff(),
            timeout_secs: default_stats_timeout(),
            doc_freq_cache_enabled: false,
            doc_freq_cache_ttl_secs: default_doc_freq_ttl(),
            reindex_drift_threshold: default_drift_threshold(),
            reindex_page_size: default_reindex_page_size(),
            reindex_concurrency: default_reindex_concurrency(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            maintenance_queue_url: None,
            dlq_url: None,
            batch_size: default_queue_batch_size(),
            poll_timeout_secs: default_queue_poll_timeout(),
            visibility_timeout_secs: default_visibility_timeout(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__RETRIEVAL__RRF_K=60
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }
}

impl RetrievalConfig {
    /// Per-branch timeout as Duration
    pub fn branch_timeout(&self) -> Duration {
        Duration::from_millis(self.branch_timeout_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgres://localhost/clauseforge".to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            redis: None,
            embedding: EmbeddingConfig::default(),
            vector_index: VectorIndexConfig::default(),
            reranker: RerankerConfig::default(),
            bm25: Bm25Config::default(),
            retrieval: RetrievalConfig::default(),
            corpus_stats: CorpusStatsConfig::default(),
            queue: QueueConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
