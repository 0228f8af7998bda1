//! Error types for ClauseForge services
//!
//! Provides a single error enum for the retrieval stack with:
//! - Distinct variants for each external collaborator
//! - Machine-readable error codes
//! - Transient vs. fatal classification used by retry and degradation paths

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    InvalidFormat,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,

    // External service errors (8xxx)
    UpstreamError,
    EmbeddingError,
    VectorIndexError,
    AggregationError,
    RerankerError,
    QueueError,
    CacheError,
    Cancelled,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::InvalidFormat => 1003,

            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,

            ErrorCode::UpstreamError => 8001,
            ErrorCode::EmbeddingError => 8002,
            ErrorCode::VectorIndexError => 8003,
            ErrorCode::AggregationError => 8004,
            ErrorCode::RerankerError => 8005,
            ErrorCode::QueueError => 8006,
            ErrorCode::CacheError => 8007,
            ErrorCode::Cancelled => 8009,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // External service errors
    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("Vector index error ({index}): {message}")]
    VectorIndex { index: String, message: String },

    #[error("Corpus aggregation service error: {message}")]
    AggregationService { message: String },

    #[error("Reranker error: {message}")]
    Reranker { message: String },

    #[error("Queue error: {message}")]
    QueueError { message: String },

    #[error("Cache error: {message}")]
    CacheError { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Operation cancelled: {message}")]
    Cancelled { message: String },

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        AppError::Configuration {
            message: message.into(),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::VectorIndex { .. } => ErrorCode::VectorIndexError,
            AppError::AggregationService { .. } => ErrorCode::AggregationError,
            AppError::Reranker { .. } => ErrorCode::RerankerError,
            AppError::QueueError { .. } => ErrorCode::QueueError,
            AppError::CacheError { .. } => ErrorCode::CacheError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Cancelled { .. } => ErrorCode::Cancelled,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Transient I/O failures: worth a bounded retry, or a degraded result.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Database(_)
                | AppError::DatabaseConnection { .. }
                | AppError::EmbeddingError { .. }
                | AppError::VectorIndex { .. }
                | AppError::AggregationService { .. }
                | AppError::Reranker { .. }
                | AppError::QueueError { .. }
                | AppError::CacheError { .. }
                | AppError::HttpClient(_)
        )
    }

    /// Deployment errors that must never be retried
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::Configuration { .. })
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::CacheError {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::VectorIndex {
            index: "contracts-dense".into(),
            message: "503".into(),
        };
        assert_eq!(err.code(), ErrorCode::VectorIndexError);
        assert_eq!(err.code().as_code(), 8003);
    }

    #[test]
    fn test_configuration_is_fatal_not_transient() {
        let err = AppError::configuration("no sparse index mapped for 'contracts'");
        assert!(err.is_fatal());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_io_errors_are_transient() {
        let err = AppError::AggregationService {
            message: "connection refused".into(),
        };
        assert!(err.is_transient());
        assert!(!err.is_fatal());

        let err = AppError::Cancelled {
            message: "deadline".into(),
        };
        assert!(!err.is_transient());
    }
}
