//! avgdl providers
//!
//! The aggregation service owns the running (chunk count, total length) sum
//! per organization and answers every delta with the resulting avgdl. The
//! local provider recomputes the same figure from the term-frequency rows.

use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use clauseforge_common::config::CorpusStatsConfig;
use clauseforge_common::db::TermFrequencyStore;
use clauseforge_common::errors::{AppError, Result};
use clauseforge_common::metrics;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Unacknowledged deltas kept per organization before the oldest is dropped
const MAX_HELD_DELTAS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeltaAction {
    Update,
    Delete,
}

/// Additive change to an organization's length statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusDelta {
    pub org_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    pub total_chunks: i64,
    pub total_document_length: i64,
    pub action: DeltaAction,
}

impl CorpusDelta {
    pub fn update(
        org_id: impl Into<String>,
        file_id: impl Into<String>,
        total_chunks: i64,
        total_document_length: i64,
    ) -> Self {
        Self {
            org_id: org_id.into(),
            file_id: Some(file_id.into()),
            total_chunks,
            total_document_length,
            action: DeltaAction::Update,
        }
    }

    pub fn delete(
        org_id: impl Into<String>,
        file_id: Option<String>,
        total_chunks: i64,
        total_document_length: i64,
    ) -> Self {
        Self {
            org_id: org_id.into(),
            file_id,
            total_chunks,
            total_document_length,
            action: DeltaAction::Delete,
        }
    }

    /// Zero `UPDATE`, which reads the current value without changing it
    pub fn read(org_id: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            file_id: None,
            total_chunks: 0,
            total_document_length: 0,
            action: DeltaAction::Update,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.total_chunks == 0 && self.total_document_length == 0
    }
}

#[async_trait]
pub trait CorpusStatsProvider: Send + Sync {
    /// Current avgdl of an organization
    async fn get(&self, org_id: &str) -> Result<f64>;

    /// Apply a delta and return the resulting avgdl
    async fn apply_delta(&self, delta: &CorpusDelta) -> Result<f64>;

    fn name(&self) -> &'static str;
}

#[derive(Deserialize)]
struct AvgdlResponse {
    avgdl: f64,
}

/// Client for the corpus aggregation service
pub struct RemoteCorpusStats {
    client: reqwest::Client,
    url: String,
}

impl RemoteCorpusStats {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl CorpusStatsProvider for RemoteCorpusStats {
    async fn get(&self, org_id: &str) -> Result<f64> {
        self.apply_delta(&CorpusDelta::read(org_id)).await
    }

    async fn apply_delta(&self, delta: &CorpusDelta) -> Result<f64> {
        let response = self
            .client
            .post(&self.url)
            .json(delta)
            .send()
            .await
            .map_err(|e| AppError::AggregationService {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::AggregationService {
                message: format!("API error {}: {}", status, body),
            });
        }

        let body: AvgdlResponse =
            response.json().await.map_err(|e| AppError::AggregationService {
                message: format!("Failed to parse response: {}", e),
            })?;

        if !body.avgdl.is_finite() || body.avgdl < 0.0 {
            return Err(AppError::AggregationService {
                message: format!("Invalid avgdl {}", body.avgdl),
            });
        }

        Ok(body.avgdl)
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

/// `SUM(tf) / COUNT(*)` over active rows
pub struct LocalCorpusStats {
    store: Arc<dyn TermFrequencyStore>,
}

impl LocalCorpusStats {
    pub fn new(store: Arc<dyn TermFrequencyStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CorpusStatsProvider for LocalCorpusStats {
    async fn get(&self, org_id: &str) -> Result<f64> {
        Ok(self.store.totals(org_id).await?.avgdl())
    }

    /// Rows are already the source of truth, so a delta only triggers a recompute
    async fn apply_delta(&self, delta: &CorpusDelta) -> Result<f64> {
        self.get(&delta.org_id).await
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

/// Remote provider with bounded retries, then the local provider.
///
/// Never fails: when both sides fail the result is 0, which the encoder
/// treats as "no length normalization".
///
/// A delta the aggregation service never acknowledged is held in memory and
/// replayed, in order, before the next call for the same organization.
/// Held deltas do not survive a restart.
pub struct FallbackCorpusStats<R, L> {
    remote: R,
    local: L,
    max_attempts: u32,
    initial_backoff: Duration,
    held: Mutex<HashMap<String, Vec<CorpusDelta>>>,
}

impl<R, L> FallbackCorpusStats<R, L>
where
    R: CorpusStatsProvider,
    L: CorpusStatsProvider,
{
    pub fn new(remote: R, local: L, max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            remote,
            local,
            max_attempts: max_attempts.max(1),
            initial_backoff,
            held: Mutex::new(HashMap::new()),
        }
    }

    /// Deltas waiting for replay to the aggregation service
    pub async fn held_deltas(&self, org_id: &str) -> Vec<CorpusDelta> {
        self.held.lock().await.get(org_id).cloned().unwrap_or_default()
    }

    async fn hold(&self, delta: &CorpusDelta) {
        warn!(
            org_id = %delta.org_id,
            file_id = ?delta.file_id,
            total_chunks = delta.total_chunks,
            total_document_length = delta.total_document_length,
            action = ?delta.action,
            "Holding corpus delta for replay"
        );

        let mut held = self.held.lock().await;
        let queue = held.entry(delta.org_id.clone()).or_default();
        if queue.len() >= MAX_HELD_DELTAS {
            let dropped = queue.remove(0);
            warn!(
                org_id = %dropped.org_id,
                file_id = ?dropped.file_id,
                total_chunks = dropped.total_chunks,
                total_document_length = dropped.total_document_length,
                action = ?dropped.action,
                "Dropping oldest held corpus delta"
            );
        }
        queue.push(delta.clone());
    }

    /// Send held deltas of an org in order. On failure the unsent ones are
    /// put back ahead of anything held in the meantime.
    async fn replay_held(&self, org_id: &str) -> Result<()> {
        let queued = self.held.lock().await.remove(org_id).unwrap_or_default();
        if queued.is_empty() {
            return Ok(());
        }

        let count = queued.len();
        let mut remaining = queued.into_iter();
        while let Some(delta) = remaining.next() {
            if let Err(e) = self.remote_with_retry(&delta).await {
                let mut unsent = vec![delta];
                unsent.extend(remaining);
                let mut held = self.held.lock().await;
                let queue = held.entry(org_id.to_string()).or_default();
                unsent.append(queue);
                *queue = unsent;
                return Err(e);
            }
        }

        info!(org_id, replayed = count, "Replayed held corpus deltas");
        Ok(())
    }

    async fn remote_with_retry(&self, delta: &CorpusDelta) -> Result<f64> {
        let policy = ExponentialBackoff {
            initial_interval: self.initial_backoff,
            current_interval: self.initial_backoff,
            max_interval: self.initial_backoff * 8,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };

        let mut attempt = 0u32;
        retry(policy, || {
            attempt += 1;
            let current = attempt;
            async move {
                self.remote.apply_delta(delta).await.map_err(|e| {
                    if current >= self.max_attempts || !e.is_transient() {
                        backoff::Error::permanent(e)
                    } else {
                        warn!(
                            org_id = %delta.org_id,
                            attempt = current,
                            error = %e,
                            "Aggregation service call failed, retrying"
                        );
                        backoff::Error::transient(e)
                    }
                })
            }
        })
        .await
    }

    async fn resolve(&self, delta: &CorpusDelta) -> f64 {
        let remote = match self.replay_held(&delta.org_id).await {
            Ok(()) => self.remote_with_retry(delta).await,
            Err(e) => Err(e),
        };

        match remote {
            Ok(avgdl) => {
                debug!(org_id = %delta.org_id, avgdl, "avgdl from aggregation service");
                return avgdl;
            }
            Err(e) => {
                warn!(
                    org_id = %delta.org_id,
                    provider = self.remote.name(),
                    error = %e,
                    "Aggregation service unavailable, computing avgdl locally"
                );
                metrics::record_corpus_stats_fallback(&delta.org_id);
                if !delta.is_noop() {
                    self.hold(delta).await;
                }
            }
        }

        match self.local.apply_delta(delta).await {
            Ok(avgdl) => avgdl,
            Err(e) => {
                warn!(org_id = %delta.org_id, error = %e, "Local avgdl failed, using 0");
                0.0
            }
        }
    }
}

#[async_trait]
impl<R, L> CorpusStatsProvider for FallbackCorpusStats<R, L>
where
    R: CorpusStatsProvider,
    L: CorpusStatsProvider,
{
    async fn get(&self, org_id: &str) -> Result<f64> {
        Ok(self.resolve(&CorpusDelta::read(org_id)).await)
    }

    async fn apply_delta(&self, delta: &CorpusDelta) -> Result<f64> {
        Ok(self.resolve(delta).await)
    }

    fn name(&self) -> &'static str {
        "fallback"
    }
}

/// Provider for the configured deployment: remote with local fallback when an
/// aggregation URL is set, otherwise local only.
pub fn corpus_stats_from_config(
    config: &CorpusStatsConfig,
    store: Arc<dyn TermFrequencyStore>,
) -> Result<Arc<dyn CorpusStatsProvider>> {
    let local = LocalCorpusStats::new(store);

    match &config.aggregation_url {
        Some(url) => {
            let remote = RemoteCorpusStats::new(url, Duration::from_secs(config.timeout_secs))?;
            Ok(Arc::new(FallbackCorpusStats::new(
                remote,
                local,
                config.max_attempts,
                Duration::from_millis(config.initial_backoff_ms),
            )))
        }
        None => Ok(Arc::new(local)),
    }
}
