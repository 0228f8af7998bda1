//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with SLO-aligned histograms
//! and standardized naming conventions.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};

/// Metrics prefix for all ClauseForge metrics
pub const METRICS_PREFIX: &str = "clauseforge";

/// SLO-aligned histogram buckets for retrieval latency (in seconds)
/// Targets: P50 < 250ms, P99 < 1s (two network branches plus a rerank call)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms - P50 target
    0.500,  // 500ms
    1.000,  // 1s - P99 target
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
];

/// Buckets for embedding latency (typically slower)
pub const EMBEDDING_BUCKETS: &[f64] = &[
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
];

/// Outcome of one hybrid search branch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchOutcome {
    Ok,
    Empty,
    Failed,
    Cancelled,
}

impl BranchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            BranchOutcome::Ok => "ok",
            BranchOutcome::Empty => "empty",
            BranchOutcome::Failed => "failed",
            BranchOutcome::Cancelled => "cancelled",
        }
    }
}

/// Register all metric descriptions
pub fn register_metrics() {
    // Search metrics
    describe_counter!(
        format!("{}_search_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of hybrid search queries"
    );

    describe_histogram!(
        format!("{}_search_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Hybrid search latency in seconds"
    );

    describe_gauge!(
        format!("{}_search_results_count", METRICS_PREFIX),
        Unit::Count,
        "Number of results returned from search"
    );

    describe_counter!(
        format!("{}_search_branch_total", METRICS_PREFIX),
        Unit::Count,
        "Sparse/dense branch outcomes"
    );

    describe_counter!(
        format!("{}_rerank_total", METRICS_PREFIX),
        Unit::Count,
        "Reranker calls by outcome"
    );

    // Corpus statistics metrics
    describe_counter!(
        format!("{}_corpus_stats_fallback_total", METRICS_PREFIX),
        Unit::Count,
        "avgdl lookups served by the local fallback"
    );

    describe_histogram!(
        format!("{}_doc_freq_rows", METRICS_PREFIX),
        Unit::Count,
        "Term-frequency rows scanned per document-frequency computation"
    );

    // Maintenance metrics
    describe_counter!(
        format!("{}_chunks_ingested_total", METRICS_PREFIX),
        Unit::Count,
        "Total chunks ingested"
    );

    describe_counter!(
        format!("{}_chunks_archived_total", METRICS_PREFIX),
        Unit::Count,
        "Total chunks archived"
    );

    describe_counter!(
        format!("{}_chunks_reindexed_total", METRICS_PREFIX),
        Unit::Count,
        "Total sparse vectors recomputed by reindex"
    );

    // Embedding metrics
    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API requests"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    describe_counter!(
        format!("{}_embedding_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API errors"
    );

    // Cache metrics
    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache misses"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record search metrics
pub fn record_search(duration_secs: f64, result_count: usize) {
    counter!(format!("{}_search_queries_total", METRICS_PREFIX)).increment(1);

    histogram!(format!("{}_search_duration_seconds", METRICS_PREFIX)).record(duration_secs);

    gauge!(format!("{}_search_results_count", METRICS_PREFIX)).set(result_count as f64);
}

/// Helper to record one branch of a hybrid search
pub fn record_branch(branch: &'static str, outcome: BranchOutcome) {
    counter!(
        format!("{}_search_branch_total", METRICS_PREFIX),
        "branch" => branch,
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Helper to record reranker calls
pub fn record_rerank(success: bool, kept: usize) {
    let status = if success { "success" } else { "degraded" };
    counter!(
        format!("{}_rerank_total", METRICS_PREFIX),
        "status" => status
    )
    .increment(1);

    gauge!(format!("{}_rerank_kept_count", METRICS_PREFIX)).set(kept as f64);
}

/// Helper to record an avgdl lookup served locally
pub fn record_corpus_stats_fallback(org_id: &str) {
    counter!(
        format!("{}_corpus_stats_fallback_total", METRICS_PREFIX),
        "org" => org_id.to_string()
    )
    .increment(1);
}

/// Helper to record the size of a document-frequency scan
pub fn record_doc_freq_scan(rows: usize) {
    histogram!(format!("{}_doc_freq_rows", METRICS_PREFIX)).record(rows as f64);
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, batch_size: usize, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    } else {
        counter!(
            format!("{}_embedding_errors_total", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .increment(1);
    }

    tracing::trace!(model, batch_size, success, "Embedding call recorded");
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool, cache_name: &str) {
    if hit {
        counter!(
            format!("{}_cache_hits_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_cache_misses_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    }
}

/// Helper to record maintenance job metrics
pub fn record_maintenance(job: &'static str, chunks: usize) {
    let name = match job {
        "ingest" => "chunks_ingested_total",
        "delete" => "chunks_archived_total",
        _ => "chunks_reindexed_total",
    };
    counter!(format!("{}_{}", METRICS_PREFIX, name)).increment(chunks as u64);
}
