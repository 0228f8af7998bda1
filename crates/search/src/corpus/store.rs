//! Corpus statistics store
//!
//! Owns the term-frequency rows of every chunk and the avgdl provider, and
//! derives everything BM25 needs from them: document frequencies for query
//! encoding, avgdl for document encoding, and sparse re-encoding when avgdl
//! drifts.

use super::provider::{CorpusDelta, CorpusStatsProvider};
use crate::bm25::{Bm25Encoder, DocumentFrequencies, SparseVector, TermFrequencies};
use crate::index::VectorIndex;
use clauseforge_common::cache::{get_or_load, keys, CacheStore};
use clauseforge_common::config::CorpusStatsConfig;
use clauseforge_common::db::{
    ArchiveSummary, CorpusScope, NewTermFrequency, TermFrequencyStore, UpsertOutcome,
};
use clauseforge_common::errors::{AppError, Result};
use clauseforge_common::metrics;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// A chunk after its term frequencies were persisted
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    pub outcome: UpsertOutcome,
    pub term_frequencies: TermFrequencies,
}

/// Outcome of one sparse reindex run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReindexReport {
    pub org_id: String,
    pub avgdl: f64,
    pub updated: usize,
    /// Rows with no terms, which have no sparse vector
    pub skipped: usize,
    pub failed: usize,
}

impl ReindexReport {
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

pub struct CorpusStatisticsStore {
    store: Arc<dyn TermFrequencyStore>,
    stats: Arc<dyn CorpusStatsProvider>,
    encoder: Bm25Encoder,
    cache: Option<Arc<dyn CacheStore>>,
    doc_freq_cache_ttl_secs: u64,
    reindex_page_size: u64,
    reindex_concurrency: usize,
}

impl CorpusStatisticsStore {
    pub fn new(
        store: Arc<dyn TermFrequencyStore>,
        stats: Arc<dyn CorpusStatsProvider>,
        encoder: Bm25Encoder,
    ) -> Self {
        let defaults = CorpusStatsConfig::default();
        Self {
            store,
            stats,
            encoder,
            cache: None,
            doc_freq_cache_ttl_secs: defaults.doc_freq_cache_ttl_secs,
            reindex_page_size: defaults.reindex_page_size,
            reindex_concurrency: defaults.reindex_concurrency,
        }
    }

    /// Apply the cache and reindex settings. The document-frequency cache is
    /// only used when enabled in config and a cache is supplied.
    pub fn with_config(
        mut self,
        config: &CorpusStatsConfig,
        cache: Option<Arc<dyn CacheStore>>,
    ) -> Self {
        self.cache = cache.filter(|_| config.doc_freq_cache_enabled);
        self.doc_freq_cache_ttl_secs = config.doc_freq_cache_ttl_secs;
        self.reindex_page_size = config.reindex_page_size.max(1);
        self.reindex_concurrency = config.reindex_concurrency.max(1);
        self
    }

    pub fn encoder(&self) -> &Bm25Encoder {
        &self.encoder
    }

    pub fn term_store(&self) -> &Arc<dyn TermFrequencyStore> {
        &self.store
    }

    /// Tokenize a chunk and persist its term frequencies, replacing any
    /// previous row with the same `chunk_id`.
    pub async fn upsert_chunk_tf(
        &self,
        org_id: &str,
        user_id: Option<&str>,
        file_id: &str,
        chunk_id: &str,
        text: &str,
    ) -> Result<StoredChunk> {
        let term_frequencies = self.encoder.term_frequencies(text);

        let outcome = self
            .store
            .upsert(NewTermFrequency {
                chunk_id: chunk_id.to_string(),
                org_id: org_id.to_string(),
                file_id: file_id.to_string(),
                user_id: user_id.map(str::to_string),
                term_frequency: term_frequencies.to_map(),
                tf: term_frequencies.length(),
            })
            .await?;

        debug!(
            chunk_id,
            length = outcome.length,
            previous = ?outcome.previous_length,
            "Stored chunk term frequencies"
        );

        Ok(StoredChunk {
            outcome,
            term_frequencies,
        })
    }

    /// Soft-delete every active chunk of the given files
    pub async fn archive_chunks(&self, org_id: &str, file_ids: &[String]) -> Result<ArchiveSummary> {
        let summary = self.store.archive_files(org_id, file_ids).await?;
        info!(
            org_id,
            files = file_ids.len(),
            chunks = summary.chunk_count,
            "Archived chunks"
        );
        Ok(summary)
    }

    /// Per-term document frequencies over the scope's active chunks.
    ///
    /// This scans every row in scope on each call and grows with the corpus.
    /// With `doc_freq_cache_enabled` the result is reused for the configured
    /// TTL, trading freshness for latency.
    ///
    /// A tag-restricted scope without resolved `file_ids` is rejected.
    #[instrument(skip_all, fields(org_id = %scope.org_id))]
    pub async fn compute_doc_freq(&self, scope: &CorpusScope) -> Result<DocumentFrequencies> {
        if !scope.is_resolved() {
            return Err(unresolved_scope(scope));
        }

        match &self.cache {
            Some(cache) => {
                let key = keys::doc_freq(&scope.org_id, &scope_hash(scope)?);
                get_or_load(cache.as_ref(), &key, self.doc_freq_cache_ttl_secs, || {
                    self.scan_doc_freq(scope)
                })
                .await
            }
            None => self.scan_doc_freq(scope).await,
        }
    }

    async fn scan_doc_freq(&self, scope: &CorpusScope) -> Result<DocumentFrequencies> {
        let rows = self.store.active_rows(scope).await?;
        metrics::record_doc_freq_scan(rows.len());

        let mut df: HashMap<u32, u64> = HashMap::new();
        for row in &rows {
            for (&index, &count) in &row.term_frequency {
                if count > 0 {
                    *df.entry(index).or_insert(0) += 1;
                }
            }
        }

        debug!(documents = rows.len(), terms = df.len(), "Computed document frequencies");
        Ok(DocumentFrequencies {
            df,
            n: rows.len() as u64,
        })
    }

    /// Current avgdl of an organization. Provider failures degrade to a
    /// locally computed or zero value and are never returned.
    pub async fn get_avgdl(&self, org_id: &str) -> f64 {
        match self.stats.get(org_id).await {
            Ok(avgdl) => avgdl,
            Err(e) => {
                warn!(org_id, provider = self.stats.name(), error = %e, "avgdl unavailable, using 0");
                0.0
            }
        }
    }

    /// Send an additive delta and return the resulting avgdl
    pub async fn apply_delta(&self, delta: &CorpusDelta) -> f64 {
        match self.stats.apply_delta(delta).await {
            Ok(avgdl) => avgdl,
            Err(e) => {
                warn!(
                    org_id = %delta.org_id,
                    provider = self.stats.name(),
                    error = %e,
                    "Failed to apply corpus delta"
                );
                self.get_avgdl(&delta.org_id).await
            }
        }
    }

    /// Re-encode every active chunk of an organization under the current
    /// avgdl and write the vectors to the sparse index in place.
    ///
    /// The new index state is only recorded when every update succeeded, so
    /// a partial run is picked up again by the next drift check.
    #[instrument(skip_all, fields(org_id = %org_id, sparse_index = %sparse_index))]
    pub async fn reindex(
        &self,
        org_id: &str,
        index: &dyn VectorIndex,
        sparse_index: &str,
    ) -> Result<ReindexReport> {
        let avgdl = self.get_avgdl(org_id).await;
        let mut report = ReindexReport {
            org_id: org_id.to_string(),
            avgdl,
            ..ReindexReport::default()
        };

        let mut after: Option<String> = None;
        loop {
            let page = self
                .store
                .rows_for_org_page(org_id, after.as_deref(), self.reindex_page_size)
                .await?;
            if page.is_empty() {
                break;
            }
            let last_page = (page.len() as u64) < self.reindex_page_size;
            after = page.last().map(|row| row.chunk_id.clone());

            let mut updates: Vec<(String, SparseVector)> = Vec::with_capacity(page.len());
            for row in page {
                let tf = TermFrequencies::from(&row.term_frequency);
                let vector = self.encoder.encode_document(avgdl, &tf, row.tf);
                if vector.is_empty() {
                    report.skipped += 1;
                } else {
                    updates.push((row.chunk_id, vector));
                }
            }

            let results: Vec<Result<()>> = stream::iter(updates)
                .map(|(id, vector)| async move {
                    index
                        .update_sparse(sparse_index, org_id, &id, &vector)
                        .await
                        .map_err(|e| {
                            warn!(chunk_id = %id, error = %e, "Sparse update failed");
                            e
                        })
                })
                .buffer_unordered(self.reindex_concurrency)
                .collect()
                .await;

            for result in results {
                match result {
                    Ok(()) => report.updated += 1,
                    Err(_) => report.failed += 1,
                }
            }

            if last_page {
                break;
            }
        }

        if report.is_complete() {
            self.store.set_index_state(org_id, avgdl).await?;
        }

        metrics::record_maintenance("reindex", report.updated);
        info!(
            avgdl,
            updated = report.updated,
            skipped = report.skipped,
            failed = report.failed,
            "Sparse reindex finished"
        );
        Ok(report)
    }
}

pub(crate) fn unresolved_scope(scope: &CorpusScope) -> AppError {
    AppError::InvalidFormat {
        message: format!(
            "scope of org {} has access tags but no resolved file_ids",
            scope.org_id
        ),
    }
}

/// Stable digest of the parts of a scope that affect document frequencies
fn scope_hash(scope: &CorpusScope) -> Result<String> {
    let encoded = serde_json::to_vec(&scope.file_ids)?;
    Ok(hex::encode(Sha256::digest(encoded)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bm25::hash_term;
    use crate::corpus::LocalCorpusStats;
    use crate::index::{IndexVector, QueryRequest};
    use crate::retrieval::RankedMatch;
    use async_trait::async_trait;
    use clauseforge_common::cache::InMemoryCache;
    use clauseforge_common::db::InMemoryTermFrequencyStore;
    use tokio::sync::Mutex;

    /// Records sparse updates; fails for ids listed in `fail_ids`
    #[derive(Default)]
    struct RecordingIndex {
        updates: Mutex<Vec<(String, String, SparseVector)>>,
        fail_ids: Vec<String>,
    }

    #[async_trait]
    impl VectorIndex for RecordingIndex {
        async fn query(&self, _index: &str, _request: &QueryRequest) -> Result<Vec<RankedMatch>> {
            Ok(Vec::new())
        }

        async fn upsert(&self, _index: &str, _ns: &str, vectors: Vec<IndexVector>) -> Result<usize> {
            Ok(vectors.len())
        }

        async fn delete(&self, _index: &str, _ns: &str, _ids: &[String]) -> Result<()> {
            Ok(())
        }

        async fn update_sparse(
            &self,
            index: &str,
            namespace: &str,
            id: &str,
            sparse: &SparseVector,
        ) -> Result<()> {
            if self.fail_ids.iter().any(|f| f == id) {
                return Err(AppError::VectorIndex {
                    index: index.to_string(),
                    message: "rejected".into(),
                });
            }
            self.updates
                .lock()
                .await
                .push((namespace.to_string(), id.to_string(), sparse.clone()));
            Ok(())
        }
    }

    fn corpus(store: Arc<InMemoryTermFrequencyStore>) -> CorpusStatisticsStore {
        let stats = Arc::new(LocalCorpusStats::new(store.clone()));
        CorpusStatisticsStore::new(store, stats, Bm25Encoder::default())
    }

    #[tokio::test]
    async fn test_upsert_and_doc_freq() {
        let store = Arc::new(InMemoryTermFrequencyStore::new());
        let corpus = corpus(store.clone());

        corpus
            .upsert_chunk_tf("acme", Some("u1"), "f1", "acme#f1#0", "Escrow release escrow")
            .await
            .unwrap();
        corpus
            .upsert_chunk_tf("acme", None, "f2", "acme#f2#0", "Escrow agent")
            .await
            .unwrap();
        corpus
            .upsert_chunk_tf("globex", None, "g1", "globex#g1#0", "Escrow")
            .await
            .unwrap();

        let vocab = corpus.encoder().params().vocab_size;
        let freqs = corpus.compute_doc_freq(&CorpusScope::org("acme")).await.unwrap();
        assert_eq!(freqs.n, 2);
        assert_eq!(freqs.get(hash_term("escrow", vocab)), 2);
        assert_eq!(freqs.get(hash_term("release", vocab)), 1);
        assert_eq!(freqs.get(hash_term("arbitration", vocab)), 0);

        let scoped = corpus
            .compute_doc_freq(&CorpusScope::org("acme").with_files(["f2"]))
            .await
            .unwrap();
        assert_eq!(scoped.n, 1);
        assert_eq!(scoped.get(hash_term("release", vocab)), 0);
    }

    struct UnreachableCache;

    #[async_trait]
    impl CacheStore for UnreachableCache {
        async fn get_raw(&self, _key: &str) -> Result<Option<String>> {
            Err(AppError::CacheError { message: "connection refused".into() })
        }

        async fn set_raw(&self, _key: &str, _value: &str, _ttl_secs: u64) -> Result<()> {
            Err(AppError::CacheError { message: "connection refused".into() })
        }
    }

    fn cached_config() -> CorpusStatsConfig {
        CorpusStatsConfig {
            doc_freq_cache_enabled: true,
            ..CorpusStatsConfig::default()
        }
    }

    #[tokio::test]
    async fn test_cached_doc_freq_is_reused_per_scope() {
        let store = Arc::new(InMemoryTermFrequencyStore::new());
        let cache = Arc::new(InMemoryCache::new());
        let corpus = corpus(store.clone()).with_config(&cached_config(), Some(cache.clone()));

        corpus.upsert_chunk_tf("acme", None, "f1", "acme#f1#0", "escrow release").await.unwrap();
        corpus.upsert_chunk_tf("acme", None, "f2", "acme#f2#0", "escrow agent").await.unwrap();

        let first = corpus.compute_doc_freq(&CorpusScope::org("acme")).await.unwrap();
        assert_eq!(first.n, 2);

        // Served from the cache until the entry expires
        corpus.upsert_chunk_tf("acme", None, "f3", "acme#f3#0", "escrow").await.unwrap();
        let cached = corpus.compute_doc_freq(&CorpusScope::org("acme")).await.unwrap();
        assert_eq!(cached, first);

        let scoped = corpus
            .compute_doc_freq(&CorpusScope::org("acme").with_files(["f3"]))
            .await
            .unwrap();
        assert_eq!(scoped.n, 1);
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_unreachable_cache_scans_rows() {
        let store = Arc::new(InMemoryTermFrequencyStore::new());
        let corpus = corpus(store.clone())
            .with_config(&cached_config(), Some(Arc::new(UnreachableCache)));

        corpus.upsert_chunk_tf("acme", None, "f1", "acme#f1#0", "escrow release").await.unwrap();
        let freqs = corpus.compute_doc_freq(&CorpusScope::org("acme")).await.unwrap();
        assert_eq!(freqs.n, 1);

        corpus.upsert_chunk_tf("acme", None, "f2", "acme#f2#0", "escrow").await.unwrap();
        let freqs = corpus.compute_doc_freq(&CorpusScope::org("acme")).await.unwrap();
        assert_eq!(freqs.n, 2);
    }

    #[tokio::test]
    async fn test_cache_ignored_when_disabled() {
        let store = Arc::new(InMemoryTermFrequencyStore::new());
        let cache = Arc::new(InMemoryCache::new());
        let corpus = corpus(store.clone())
            .with_config(&CorpusStatsConfig::default(), Some(cache.clone()));

        corpus.upsert_chunk_tf("acme", None, "f1", "acme#f1#0", "escrow").await.unwrap();
        corpus.compute_doc_freq(&CorpusScope::org("acme")).await.unwrap();
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_tag_scope_without_files_is_rejected() {
        let store = Arc::new(InMemoryTermFrequencyStore::new());
        let corpus = corpus(store.clone());
        corpus.upsert_chunk_tf("acme", None, "nda_file", "acme#nda_file#0", "mutual nondisclosure").await.unwrap();
        corpus.upsert_chunk_tf("acme", None, "msa_file", "acme#msa_file#0", "master services").await.unwrap();
        corpus.upsert_chunk_tf("acme", None, "msa_file", "acme#msa_file#1", "fees").await.unwrap();

        let err = corpus
            .compute_doc_freq(&CorpusScope::org("acme").with_tags(["nda"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidFormat { .. }));

        let resolved = corpus
            .compute_doc_freq(&CorpusScope::org("acme").with_tags(["nda"]).with_files(["nda_file"]))
            .await
            .unwrap();
        assert_eq!(resolved.n, 1);
    }

    #[tokio::test]
    async fn test_reingest_reports_previous_length() {
        let store = Arc::new(InMemoryTermFrequencyStore::new());
        let corpus = corpus(store.clone());

        let first = corpus
            .upsert_chunk_tf("acme", None, "f1", "acme#f1#0", "payment terms net thirty")
            .await
            .unwrap();
        assert_eq!(first.outcome.previous_length, None);
        assert_eq!(first.outcome.length, 4);

        let second = corpus
            .upsert_chunk_tf("acme", None, "f1", "acme#f1#0", "payment terms")
            .await
            .unwrap();
        assert_eq!(second.outcome.previous_length, Some(4));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_archived_chunks_leave_statistics() {
        let store = Arc::new(InMemoryTermFrequencyStore::new());
        let corpus = corpus(store.clone());

        corpus.upsert_chunk_tf("acme", None, "f1", "acme#f1#0", "alpha beta").await.unwrap();
        corpus.upsert_chunk_tf("acme", None, "f2", "acme#f2#0", "gamma").await.unwrap();
        assert_eq!(corpus.get_avgdl("acme").await, 1.5);

        let summary = corpus.archive_chunks("acme", &["f1".to_string()]).await.unwrap();
        assert_eq!(summary.chunk_count, 1);
        assert_eq!(summary.total_length, 2);
        assert_eq!(store.len().await, 2);

        assert_eq!(corpus.get_avgdl("acme").await, 1.0);
        let freqs = corpus.compute_doc_freq(&CorpusScope::org("acme")).await.unwrap();
        assert_eq!(freqs.n, 1);
    }

    #[tokio::test]
    async fn test_empty_corpus() {
        let corpus = corpus(Arc::new(InMemoryTermFrequencyStore::new()));
        let freqs = corpus.compute_doc_freq(&CorpusScope::org("acme")).await.unwrap();
        assert_eq!(freqs.n, 0);
        assert_eq!(corpus.get_avgdl("acme").await, 0.0);
    }

    #[tokio::test]
    async fn test_reindex_updates_every_active_chunk() {
        let store = Arc::new(InMemoryTermFrequencyStore::new());
        let corpus = corpus(store.clone()).with_config(
            &CorpusStatsConfig {
                reindex_page_size: 2,
                ..CorpusStatsConfig::default()
            },
            None,
        );

        for i in 0..5 {
            let text = "clause ".repeat(i + 1);
            corpus
                .upsert_chunk_tf("acme", None, "f1", &format!("acme#f1#{}", i), &text)
                .await
                .unwrap();
        }
        corpus.upsert_chunk_tf("acme", None, "f2", "acme#f2#0", "of the").await.unwrap();
        corpus.upsert_chunk_tf("acme", None, "f3", "acme#f3#0", "archived").await.unwrap();
        corpus.archive_chunks("acme", &["f3".to_string()]).await.unwrap();

        let index = RecordingIndex::default();
        let report = corpus.reindex("acme", &index, "contracts-sparse").await.unwrap();

        assert_eq!(report.updated, 5);
        assert_eq!(report.skipped, 1);
        assert!(report.is_complete());
        // 15 terms over 6 active chunks
        assert_eq!(report.avgdl, 2.5);

        let updates = index.updates.lock().await;
        assert!(updates.iter().all(|(ns, _, _)| ns == "acme"));
        assert!(updates.iter().all(|(_, id, _)| id != "acme#f3#0"));

        let state = store.index_state("acme").await.unwrap().unwrap();
        assert_eq!(state.indexed_avgdl, 2.5);
    }

    #[tokio::test]
    async fn test_partial_reindex_keeps_old_state() {
        let store = Arc::new(InMemoryTermFrequencyStore::new());
        let corpus = corpus(store.clone());
        corpus.upsert_chunk_tf("acme", None, "f1", "acme#f1#0", "alpha").await.unwrap();
        corpus.upsert_chunk_tf("acme", None, "f1", "acme#f1#1", "beta").await.unwrap();

        let index = RecordingIndex {
            fail_ids: vec!["acme#f1#1".into()],
            ..RecordingIndex::default()
        };
        let report = corpus.reindex("acme", &index, "sparse").await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.failed, 1);
        assert!(store.index_state("acme").await.unwrap().is_none());
    }

    #[test]
    fn test_scope_hash_ignores_tags() {
        let a = CorpusScope::org("acme").with_files(["f1", "f2"]);
        let b = CorpusScope::org("acme").with_files(["f2", "f1"]).with_tags(["nda"]);
        assert_eq!(scope_hash(&a).unwrap(), scope_hash(&b).unwrap());
        assert_ne!(scope_hash(&a).unwrap(), scope_hash(&CorpusScope::org("acme")).unwrap());
    }
}
