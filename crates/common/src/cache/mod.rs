//! Redis cache integration
//!
//! Provides:
//! - Connection management
//! - A string-store seam with Redis and in-memory backends
//! - Load-through JSON caching for corpus statistics

use crate::config::RedisConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Redis cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Redis URL (redis://host:port)
    pub url: String,
    /// Key prefix for namespacing
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "clauseforge".to_string(),
        }
    }
}

impl From<&RedisConfig> for CacheConfig {
    fn from(config: &RedisConfig) -> Self {
        Self {
            url: config.url.clone(),
            ..Default::default()
        }
    }
}

/// String storage behind [`get_or_load`]
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get_raw(&self, key: &str) -> Result<Option<String>>;

    async fn set_raw(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;
}

/// Redis cache client
pub struct Cache {
    connection: RwLock<MultiplexedConnection>,
    config: CacheConfig,
}

impl Cache {
    /// Create a new cache client
    pub async fn new(config: CacheConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| AppError::CacheError {
            message: format!("Failed to create Redis client: {}", e),
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to connect to Redis: {}", e),
            })?;

        Ok(Self {
            connection: RwLock::new(connection),
            config,
        })
    }

    /// Build a prefixed key
    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.config.key_prefix, key)
    }

    /// Ping Redis to check connectivity
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.write().await;
        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Redis ping failed: {}", e),
            })?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for Cache {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        conn.get(&full_key).await.map_err(|e| AppError::CacheError {
            message: format!("Failed to get key '{}': {}", full_key, e),
        })
    }

    async fn set_raw(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        let _: () = conn
            .set_ex(&full_key, value, ttl_secs)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to set key '{}': {}", full_key, e),
            })?;

        debug!(key = %full_key, ttl_secs, "Cache set");
        Ok(())
    }
}

/// Process-local cache for tests and single-node runs. Entries never expire.
#[derive(Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set_raw(&self, key: &str, value: &str, _ttl_secs: u64) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Load-through read of a JSON value.
///
/// Cache failures never fail the call: an unreachable cache or an unreadable
/// entry degrades to the loader. Loader errors are returned as-is.
pub async fn get_or_load<T, F, Fut>(
    cache: &dyn CacheStore,
    key: &str,
    ttl_secs: u64,
    loader: F,
) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    match cache.get_raw(key).await {
        Ok(Some(json)) => match serde_json::from_str(&json) {
            Ok(cached) => {
                debug!(key, "Cache hit");
                crate::metrics::record_cache(true, key_family(key));
                return Ok(cached);
            }
            Err(e) => warn!(key, error = %e, "Unreadable cache entry, loading from source"),
        },
        Ok(None) => {
            debug!(key, "Cache miss");
            crate::metrics::record_cache(false, key_family(key));
        }
        Err(e) => warn!(error = %e, "Cache read failed, loading from source"),
    }

    let value = loader().await?;

    match serde_json::to_string(&value) {
        Ok(json) => {
            if let Err(e) = cache.set_raw(key, &json, ttl_secs).await {
                warn!(error = %e, "Failed to cache value, continuing without cache");
            }
        }
        Err(e) => warn!(error = %e, "Failed to serialize value for cache"),
    }

    Ok(value)
}

fn key_family(key: &str) -> &str {
    key.split(':').next().unwrap_or(key)
}

/// Cache key builder helpers
pub mod keys {
    /// Build a document-frequency cache key for a hashed scope
    pub fn doc_freq(org_id: &str, scope_hash: &str) -> String {
        format!("docfreq:{}:{}", org_id, scope_hash)
    }
}
