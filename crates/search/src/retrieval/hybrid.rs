//! Hybrid retrieval combining sparse (BM25) and dense search
//!
//! Both branches run as spawned tasks under a child of the caller's
//! [`QueryContext`]. A branch that errors, times out or panics contributes
//! an empty list; the query only fails when both branches were cancelled.

use super::{fusion, RankedMatch, RerankerAdapter};
use crate::corpus::{unresolved_scope, CorpusStatisticsStore};
use crate::index::{scope_filter, IndexRegistry, QueryRequest, QueryVector, VectorIndex};
use clauseforge_common::config::RetrievalConfig;
use clauseforge_common::context::QueryContext;
use clauseforge_common::db::CorpusScope;
use clauseforge_common::embeddings::Embedder;
use clauseforge_common::errors::{AppError, Result};
use clauseforge_common::metrics::{self, BranchOutcome};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info_span, instrument, warn, Instrument};

/// Per-query state, logged on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryPhase {
    Idle,
    Dispatch,
    Joined,
    Empty,
    Fused,
}

/// Hybrid search parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridRequest {
    pub query: String,
    pub scope: CorpusScope,
    /// Dense index to search; its sparse companion comes from the registry
    pub dense_index: String,
    /// Precomputed query embedding, skipping the embedder
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    /// Matches requested from each branch, 0 for the configured default
    #[serde(default)]
    pub top_k: usize,
    /// Cap on the final list
    #[serde(default)]
    pub limit: Option<usize>,
}

impl HybridRequest {
    pub fn new(query: impl Into<String>, scope: CorpusScope, dense_index: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            scope,
            dense_index: dense_index.into(),
            embedding: None,
            top_k: 0,
            limit: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Hybrid search result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridResponse {
    pub matches: Vec<RankedMatch>,
    /// `Empty` when neither branch matched, `Fused` otherwise
    pub phase: QueryPhase,
    pub sparse_count: usize,
    pub dense_count: usize,
    pub took_ms: u64,
}

/// What one branch produced
#[derive(Debug)]
enum Branch {
    Matches(Vec<RankedMatch>),
    Failed,
    Cancelled,
}

impl Branch {
    fn outcome(&self) -> BranchOutcome {
        match self {
            Branch::Matches(m) if m.is_empty() => BranchOutcome::Empty,
            Branch::Matches(_) => BranchOutcome::Ok,
            Branch::Failed => BranchOutcome::Failed,
            Branch::Cancelled => BranchOutcome::Cancelled,
        }
    }

    fn into_matches(self) -> Vec<RankedMatch> {
        match self {
            Branch::Matches(m) => m,
            Branch::Failed | Branch::Cancelled => Vec::new(),
        }
    }
}

/// Run one branch under cancellation and a timeout, absorbing its errors
async fn guarded<F>(ctx: QueryContext, name: &'static str, timeout: Duration, work: F) -> Branch
where
    F: Future<Output = Result<Vec<RankedMatch>>>,
{
    tokio::select! {
        biased;
        _ = ctx.done() => {
            debug!(branch = name, "Branch cancelled");
            Branch::Cancelled
        }
        result = tokio::time::timeout(timeout, work) => match result {
            Ok(Ok(matches)) => Branch::Matches(matches),
            Ok(Err(e)) => {
                warn!(branch = name, error = %e, "Branch failed, continuing without it");
                Branch::Failed
            }
            Err(_) => {
                warn!(branch = name, timeout_ms = timeout.as_millis() as u64, "Branch timed out");
                Branch::Failed
            }
        },
    }
}

pub struct HybridExecutor {
    corpus: Arc<CorpusStatisticsStore>,
    index: Arc<dyn VectorIndex>,
    registry: IndexRegistry,
    embedder: Arc<dyn Embedder>,
    reranker: Arc<RerankerAdapter>,
    rrf_k: u32,
    default_top_k: usize,
    branch_timeout: Duration,
}

impl HybridExecutor {
    pub fn new(
        corpus: Arc<CorpusStatisticsStore>,
        index: Arc<dyn VectorIndex>,
        registry: IndexRegistry,
        embedder: Arc<dyn Embedder>,
        reranker: Arc<RerankerAdapter>,
    ) -> Self {
        let defaults = RetrievalConfig::default();
        Self {
            corpus,
            index,
            registry,
            embedder,
            reranker,
            rrf_k: defaults.rrf_k,
            default_top_k: defaults.top_k,
            branch_timeout: defaults.branch_timeout(),
        }
    }

    pub fn with_config(mut self, config: &RetrievalConfig) -> Self {
        self.rrf_k = config.rrf_k;
        self.default_top_k = config.top_k.max(1);
        self.branch_timeout = config.branch_timeout();
        self
    }

    fn transition(&self, ctx: &QueryContext, phase: QueryPhase) {
        debug!(request_id = %ctx.request_id(), phase = ?phase, "Hybrid query phase");
    }

    /// Run a hybrid query: sparse and dense branches in parallel, RRF fusion,
    /// then reranking.
    #[instrument(skip_all, fields(request_id = %ctx.request_id(), org_id = %request.scope.org_id))]
    pub async fn search(&self, ctx: &QueryContext, request: HybridRequest) -> Result<HybridResponse> {
        let start = Instant::now();
        self.transition(ctx, QueryPhase::Idle);

        if !request.scope.is_resolved() {
            return Err(unresolved_scope(&request.scope));
        }
        let sparse_index = self.registry.sparse_index(&request.dense_index)?.to_string();
        let top_k = if request.top_k == 0 {
            self.default_top_k
        } else {
            request.top_k
        };
        let filter = scope_filter(&request.scope);
        let namespace = request.scope.org_id.clone();

        self.transition(ctx, QueryPhase::Dispatch);

        let sparse_work = {
            let corpus = self.corpus.clone();
            let index = self.index.clone();
            let scope = request.scope.clone();
            let query = request.query.clone();
            let namespace = namespace.clone();
            let filter = filter.clone();
            async move {
                let freqs = corpus.compute_doc_freq(&scope).await?;
                let vector = corpus.encoder().encode_query(&query, &freqs);
                if vector.is_empty() {
                    debug!(documents = freqs.n, "Empty sparse query vector, skipping sparse index");
                    return Ok(Vec::new());
                }

                let query = QueryRequest {
                    vector: QueryVector::Sparse(vector),
                    namespace,
                    top_k,
                    filter: Some(filter),
                    include_metadata: true,
                };
                index.query(&sparse_index, &query).await
            }
        };

        let dense_work = {
            let embedder = self.embedder.clone();
            let index = self.index.clone();
            let query = request.query.clone();
            let embedding = request.embedding.clone();
            let dense_index = request.dense_index.clone();
            async move {
                let embedding = match embedding {
                    Some(embedding) => embedding,
                    None => embedder.embed(&query).await?,
                };

                let query = QueryRequest {
                    vector: QueryVector::Dense(embedding),
                    namespace,
                    top_k,
                    filter: Some(filter),
                    include_metadata: true,
                };
                index.query(&dense_index, &query).await
            }
        };

        let sparse_span = info_span!(parent: ctx.span(), "sparse_branch", request_id = %ctx.request_id());
        let dense_span = info_span!(parent: ctx.span(), "dense_branch", request_id = %ctx.request_id());

        let sparse_task = tokio::spawn(
            guarded(ctx.child(), "sparse", self.branch_timeout, sparse_work).instrument(sparse_span),
        );
        let dense_task = tokio::spawn(
            guarded(ctx.child(), "dense", self.branch_timeout, dense_work).instrument(dense_span),
        );

        let (sparse, dense) = tokio::join!(sparse_task, dense_task);
        let sparse = sparse.unwrap_or_else(|e| {
            warn!(branch = "sparse", error = %e, "Branch task panicked");
            Branch::Failed
        });
        let dense = dense.unwrap_or_else(|e| {
            warn!(branch = "dense", error = %e, "Branch task panicked");
            Branch::Failed
        });

        metrics::record_branch("sparse", sparse.outcome());
        metrics::record_branch("dense", dense.outcome());
        self.transition(ctx, QueryPhase::Joined);

        if matches!(sparse, Branch::Cancelled) && matches!(dense, Branch::Cancelled) {
            return Err(AppError::Cancelled {
                message: "both retrieval branches were cancelled".to_string(),
            });
        }

        let sparse = sparse.into_matches();
        let dense = dense.into_matches();
        let (sparse_count, dense_count) = (sparse.len(), dense.len());

        if sparse.is_empty() && dense.is_empty() {
            self.transition(ctx, QueryPhase::Empty);
            metrics::record_search(start.elapsed().as_secs_f64(), 0);
            return Ok(HybridResponse {
                matches: Vec::new(),
                phase: QueryPhase::Empty,
                sparse_count,
                dense_count,
                took_ms: start.elapsed().as_millis() as u64,
            });
        }

        let fused = fusion::merge(sparse, dense, self.rrf_k);
        let mut matches = self.reranker.rerank(&request.query, fused).await;
        if let Some(limit) = request.limit {
            matches.truncate(limit);
        }

        self.transition(ctx, QueryPhase::Fused);
        metrics::record_search(start.elapsed().as_secs_f64(), matches.len());

        Ok(HybridResponse {
            matches,
            phase: QueryPhase::Fused,
            sparse_count,
            dense_count,
            took_ms: start.elapsed().as_millis() as u64,
        })
    }
}
