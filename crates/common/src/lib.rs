//! ClauseForge Common Library
//!
//! Shared code for the ClauseForge retrieval services including:
//! - Term-frequency storage and the `TermFrequencyStore` seam
//! - Embedding client abstraction
//! - Error types and handling
//! - Configuration management
//! - Redis cache and SQS queue clients
//! - Metrics and per-query execution context

pub mod cache;
pub mod config;
pub mod context;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod metrics;
pub mod queue;

// Re-export commonly used types
pub use config::AppConfig;
pub use context::QueryContext;
pub use db::{CorpusScope, TermFrequencyStore};
pub use embeddings::Embedder;
pub use errors::{AppError, Result};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
