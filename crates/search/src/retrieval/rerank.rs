//! Reranking of fused candidates
//!
//! The adapter sends the head of the RRF list to a relevance model, replaces
//! RRF scores with model scores and drops weak results. A failing model
//! never fails the query: the RRF list is returned as-is.

use super::{FusedCandidate, RankedMatch};
use async_trait::async_trait;
use clauseforge_common::config::RerankerConfig;
use clauseforge_common::errors::{AppError, Result};
use clauseforge_common::metrics;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Score the model assigned to `documents[index]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RerankScore {
    pub index: usize,
    pub score: f32,
}

#[async_trait]
pub trait RerankerService: Send + Sync {
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<RerankScore>>;

    fn name(&self) -> &str;
}

/// How many fused candidates are sent for reranking
pub fn top_n(len: usize) -> usize {
    if len <= 5 {
        len
    } else {
        ((len as f64 * 0.75).floor() as usize).max(1)
    }
}

/// Client for Together-AI-compatible `/rerank` endpoints
pub struct TogetherReranker {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
    return_documents: bool,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f32,
}

impl TogetherReranker {
    pub fn new(api_key: String, config: &RerankerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/rerank", config.api_base.trim_end_matches('/')),
            model: config.model.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RerankerService for TogetherReranker {
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<RerankScore>> {
        let request = RerankRequest {
            model: &self.model,
            query,
            documents,
            top_n: documents.len(),
            return_documents: false,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Reranker {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Reranker {
                message: format!("API error {}: {}", status, body),
            });
        }

        let result: RerankResponse = response.json().await.map_err(|e| AppError::Reranker {
            message: format!("Failed to parse response: {}", e),
        })?;

        Ok(result
            .results
            .into_iter()
            .map(|r| RerankScore {
                index: r.index,
                score: r.relevance_score,
            })
            .collect())
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Keeps the given order, scoring it in `(0, 1]`
pub struct PassthroughReranker;

#[async_trait]
impl RerankerService for PassthroughReranker {
    async fn rerank(&self, _query: &str, documents: &[String]) -> Result<Vec<RerankScore>> {
        let len = documents.len() as f32;
        Ok((0..documents.len())
            .map(|index| RerankScore {
                index,
                score: 1.0 - index as f32 / len,
            })
            .collect())
    }

    fn name(&self) -> &str {
        "passthrough"
    }
}

pub struct RerankerAdapter {
    service: Arc<dyn RerankerService>,
    threshold: f32,
    text_key: String,
}

impl RerankerAdapter {
    pub fn new(service: Arc<dyn RerankerService>, threshold: f32, text_key: impl Into<String>) -> Self {
        Self {
            service,
            threshold,
            text_key: text_key.into(),
        }
    }

    /// Adapter over the configured provider. Disabled reranking keeps RRF
    /// order and applies no threshold.
    pub fn from_config(config: &RerankerConfig) -> Result<Self> {
        if !config.enabled {
            return Ok(Self::new(Arc::new(PassthroughReranker), 0.0, &config.text_key));
        }

        let service: Arc<dyn RerankerService> = match config.provider.as_str() {
            "together" => {
                let api_key = config.api_key.clone().ok_or_else(|| {
                    AppError::configuration("reranker.api_key is required for provider 'together'")
                })?;
                Arc::new(TogetherReranker::new(api_key, config)?)
            }
            "passthrough" => Arc::new(PassthroughReranker),
            other => {
                return Err(AppError::configuration(format!(
                    "Unknown reranker provider: {}",
                    other
                )))
            }
        };

        Ok(Self::new(service, config.threshold, &config.text_key))
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    fn text_of<'a>(&self, candidate: &'a FusedCandidate) -> Option<&'a str> {
        candidate
            .metadata
            .get(&self.text_key)
            .and_then(|v| v.as_str())
            .filter(|t| !t.trim().is_empty())
    }

    /// Rerank the head of the fused list.
    ///
    /// Candidates without text are not sent and do not come back. If the
    /// service fails, every candidate is returned in RRF order with its RRF
    /// score.
    pub async fn rerank(&self, query: &str, candidates: Vec<FusedCandidate>) -> Vec<RankedMatch> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let n = top_n(candidates.len());
        let (sent, documents): (Vec<usize>, Vec<String>) = candidates[..n]
            .iter()
            .enumerate()
            .filter_map(|(i, c)| self.text_of(c).map(|text| (i, text.to_string())))
            .unzip();

        if documents.is_empty() {
            debug!(candidates = candidates.len(), "No candidate carries text, nothing to rerank");
            metrics::record_rerank(true, 0);
            return Vec::new();
        }

        let scores = match self.service.rerank(query, &documents).await {
            Ok(scores) => scores,
            Err(e) => {
                warn!(
                    reranker = self.service.name(),
                    error = %e,
                    "Reranker failed, returning fused order"
                );
                metrics::record_rerank(false, candidates.len());
                return candidates.into_iter().map(RankedMatch::from).collect();
            }
        };

        let mut seen = HashSet::new();
        let mut results: Vec<RankedMatch> = scores
            .into_iter()
            .filter(|s| s.score >= self.threshold)
            .filter_map(|s| sent.get(s.index).copied().map(|pos| (pos, s.score)))
            .filter(|(pos, _)| seen.insert(*pos))
            .map(|(pos, score)| {
                let candidate = &candidates[pos];
                RankedMatch {
                    id: candidate.id.clone(),
                    score,
                    metadata: candidate.metadata.clone(),
                }
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });

        debug!(
            sent = documents.len(),
            kept = results.len(),
            threshold = self.threshold,
            "Reranked candidates"
        );
        metrics::record_rerank(true, results.len());
        results
    }
}
