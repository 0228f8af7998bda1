//! Corpus maintenance processor
//!
//! Keeps term-frequency rows, corpus statistics and both vector indexes in
//! step as files are ingested, removed and re-encoded.

use crate::jobs::{ChunkPayload, DeleteJob, IngestJob, MaintenanceJob, ReindexJob};
use clauseforge_common::config::AppConfig;
use clauseforge_common::db::{CorpusScope, IndexState};
use clauseforge_common::embeddings::Embedder;
use clauseforge_common::errors::AppError;
use clauseforge_common::metrics;
use clauseforge_search::corpus::{chunk_id, CorpusDelta, CorpusStatisticsStore, ReindexReport};
use clauseforge_search::index::{IndexRegistry, IndexVector, VectorIndex};
use clauseforge_search::retrieval::Metadata;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Processor configuration
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Dense index used when a job does not name one
    pub default_dense_index: String,
    /// Texts per embedding request
    pub embed_batch_size: usize,
    /// Relative avgdl drift that triggers a reindex
    pub drift_threshold: f64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self::from_app(&AppConfig::default())
    }
}

impl ProcessorConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            default_dense_index: config.vector_index.default_dense_index.clone(),
            embed_batch_size: config.embedding.batch_size.max(1),
            drift_threshold: config.corpus_stats.reindex_drift_threshold,
        }
    }
}

pub struct MaintenanceProcessor {
    corpus: Arc<CorpusStatisticsStore>,
    index: Arc<dyn VectorIndex>,
    registry: IndexRegistry,
    embedder: Arc<dyn Embedder>,
    config: ProcessorConfig,
}

impl MaintenanceProcessor {
    pub fn new(
        corpus: Arc<CorpusStatisticsStore>,
        index: Arc<dyn VectorIndex>,
        registry: IndexRegistry,
        embedder: Arc<dyn Embedder>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            corpus,
            index,
            registry,
            embedder,
            config,
        }
    }

    /// Run one job to completion. Ingest and delete return a reindex job
    /// when they pushed the organization's avgdl past the drift threshold.
    pub async fn process(&self, job: MaintenanceJob) -> Result<Option<MaintenanceJob>, MaintenanceError> {
        match job {
            MaintenanceJob::Ingest(job) => {
                self.ingest(&job).await?;
                self.follow_up(&job.org_id, job.dense_index).await
            }
            MaintenanceJob::Delete(job) => {
                self.delete(&job).await?;
                self.follow_up(&job.org_id, job.dense_index).await
            }
            MaintenanceJob::Reindex(job) => self.reindex(&job).await.map(|_| None),
        }
    }

    /// Index the chunks of one file into the corpus statistics and both
    /// vector indexes. Re-ingesting a file overwrites its chunks in place and
    /// retires the chunks the new version no longer has.
    #[instrument(skip_all, fields(org_id = %job.org_id, file_id = %job.file_id))]
    pub async fn ingest(&self, job: &IngestJob) -> Result<(), MaintenanceError> {
        let (dense_index, sparse_index) = self.resolve_indexes(job.dense_index.as_deref())?;

        let chunks: Vec<(String, &ChunkPayload)> = job
            .chunks
            .iter()
            .filter(|chunk| !chunk.text.trim().is_empty())
            .map(|chunk| (chunk_id(&job.org_id, &job.file_id, chunk.ordinal), chunk))
            .collect();
        let stale = self.stale_chunks(job, &chunks).await?;
        if chunks.is_empty() && stale.is_empty() {
            info!("Ingest job has no text, nothing to index");
            return Ok(());
        }

        info!(
            chunk_count = chunks.len(),
            stale_count = stale.len(),
            dense_index = %dense_index,
            "Processing ingest job"
        );

        // Embeddings come first so a failed embedding call leaves no rows
        // behind and the redelivered job computes the same delta.
        let payloads: Vec<&ChunkPayload> = chunks.iter().map(|(_, chunk)| *chunk).collect();
        let embeddings = self.embed_chunks(&payloads).await?;

        // Stale vectors go before their rows, as in a delete
        self.remove_vectors(&dense_index, &sparse_index, &job.org_id, &stale)
            .await?;

        let mut stored = Vec::with_capacity(chunks.len());
        for (id, chunk) in &chunks {
            let row = self
                .corpus
                .upsert_chunk_tf(
                    &job.org_id,
                    job.user_id.as_deref(),
                    &job.file_id,
                    id,
                    &chunk.text,
                )
                .await?;
            stored.push(row);
        }

        let retired = self
            .corpus
            .term_store()
            .archive_chunk_ids(&job.org_id, &stale)
            .await?;

        let new_chunks = stored
            .iter()
            .filter(|row| row.outcome.previous_length.is_none())
            .count() as i64;
        let length_delta: i64 = stored
            .iter()
            .map(|row| {
                i64::from(row.outcome.length) - i64::from(row.outcome.previous_length.unwrap_or(0))
            })
            .sum();
        let mut avgdl = self
            .corpus
            .apply_delta(&CorpusDelta::update(
                job.org_id.as_str(),
                job.file_id.as_str(),
                new_chunks,
                length_delta,
            ))
            .await;
        if retired.chunk_count > 0 {
            avgdl = self
                .corpus
                .apply_delta(&CorpusDelta::delete(
                    job.org_id.as_str(),
                    Some(job.file_id.clone()),
                    retired.chunk_count as i64,
                    retired.total_length as i64,
                ))
                .await;
        }
        debug!(new_chunks, length_delta, retired = retired.chunk_count, avgdl, "Applied corpus delta");

        let mut dense = Vec::with_capacity(stored.len());
        let mut sparse = Vec::with_capacity(stored.len());
        for ((row, (id, chunk)), values) in stored.into_iter().zip(chunks).zip(embeddings) {
            let metadata = chunk_metadata(job, chunk);
            let vector = self.corpus.encoder().encode_document(
                avgdl,
                &row.term_frequencies,
                row.outcome.length,
            );
            if vector.is_empty() {
                debug!(chunk_id = %id, "Chunk has no indexable terms, skipping sparse vector");
            } else {
                sparse.push(IndexVector::sparse(id.clone(), vector, metadata.clone()));
            }
            dense.push(IndexVector::dense(id, values, metadata));
        }

        let chunk_count = dense.len();
        let dense_count = if dense.is_empty() {
            0
        } else {
            self.index
                .upsert(&dense_index, &job.org_id, dense)
                .await
                .map_err(MaintenanceError::Index)?
        };
        let sparse_count = if sparse.is_empty() {
            0
        } else {
            self.index
                .upsert(&sparse_index, &job.org_id, sparse)
                .await
                .map_err(MaintenanceError::Index)?
        };

        metrics::record_maintenance("ingest", chunk_count);
        info!(
            dense_count,
            sparse_count,
            retired = retired.chunk_count,
            avgdl,
            "Ingest job completed"
        );
        Ok(())
    }

    /// Active chunks of the job's file that the new version does not carry
    async fn stale_chunks(
        &self,
        job: &IngestJob,
        chunks: &[(String, &ChunkPayload)],
    ) -> Result<Vec<String>, MaintenanceError> {
        let keep: HashSet<&str> = chunks.iter().map(|(id, _)| id.as_str()).collect();
        let scope = CorpusScope::org(job.org_id.as_str()).with_files([job.file_id.as_str()]);

        Ok(self
            .corpus
            .term_store()
            .active_rows(&scope)
            .await?
            .into_iter()
            .map(|row| row.chunk_id)
            .filter(|id| !keep.contains(id.as_str()))
            .collect())
    }

    async fn remove_vectors(
        &self,
        dense_index: &str,
        sparse_index: &str,
        org_id: &str,
        ids: &[String],
    ) -> Result<(), MaintenanceError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.index
            .delete(dense_index, org_id, ids)
            .await
            .map_err(MaintenanceError::Index)?;
        self.index
            .delete(sparse_index, org_id, ids)
            .await
            .map_err(MaintenanceError::Index)
    }

    /// Remove files from both indexes and the corpus statistics.
    ///
    /// Vectors are deleted before the rows are archived, so a failed delete
    /// leaves the rows active and the redelivered job finds the same ids.
    #[instrument(skip_all, fields(org_id = %job.org_id, files = job.file_ids.len()))]
    pub async fn delete(&self, job: &DeleteJob) -> Result<(), MaintenanceError> {
        let (dense_index, sparse_index) = self.resolve_indexes(job.dense_index.as_deref())?;
        if job.file_ids.is_empty() {
            return Ok(());
        }

        let scope = CorpusScope::org(job.org_id.as_str()).with_files(job.file_ids.iter().cloned());
        let ids: Vec<String> = self
            .corpus
            .term_store()
            .active_rows(&scope)
            .await?
            .into_iter()
            .map(|row| row.chunk_id)
            .collect();

        self.remove_vectors(&dense_index, &sparse_index, &job.org_id, &ids)
            .await?;

        let summary = self.corpus.archive_chunks(&job.org_id, &job.file_ids).await?;
        if summary.chunk_count > 0 {
            let file_id = match job.file_ids.as_slice() {
                [only] => Some(only.clone()),
                _ => None,
            };
            let avgdl = self
                .corpus
                .apply_delta(&CorpusDelta::delete(
                    job.org_id.as_str(),
                    file_id,
                    summary.chunk_count as i64,
                    summary.total_length as i64,
                ))
                .await;
            debug!(avgdl, "Applied corpus delta");
        }

        metrics::record_maintenance("delete", summary.chunk_count as usize);
        info!(
            vectors = ids.len(),
            archived = summary.chunk_count,
            "Delete job completed"
        );
        Ok(())
    }

    /// Re-encode the organization's sparse vectors when avgdl has drifted
    /// past the threshold since the last reindex. Returns `None` when no
    /// reindex was needed.
    #[instrument(skip_all, fields(org_id = %job.org_id, force = job.force))]
    pub async fn reindex(&self, job: &ReindexJob) -> Result<Option<ReindexReport>, MaintenanceError> {
        let (_, sparse_index) = self.resolve_indexes(job.dense_index.as_deref())?;

        if !self.drifted(&job.org_id, job.force).await? {
            return Ok(None);
        }

        let report = self
            .corpus
            .reindex(&job.org_id, self.index.as_ref(), &sparse_index)
            .await?;
        if !report.is_complete() {
            return Err(MaintenanceError::IncompleteReindex {
                org_id: job.org_id.clone(),
                failed: report.failed,
            });
        }
        Ok(Some(report))
    }

    async fn follow_up(
        &self,
        org_id: &str,
        dense_index: Option<String>,
    ) -> Result<Option<MaintenanceJob>, MaintenanceError> {
        if !self.drifted(org_id, false).await? {
            return Ok(None);
        }
        info!(org_id, "avgdl drifted past threshold, scheduling reindex");
        Ok(Some(MaintenanceJob::Reindex(ReindexJob {
            org_id: org_id.to_string(),
            force: false,
            dense_index,
        })))
    }

    async fn drifted(&self, org_id: &str, force: bool) -> Result<bool, MaintenanceError> {
        let current = self.corpus.get_avgdl(org_id).await;
        let state = self.corpus.term_store().index_state(org_id).await?;
        let drifted = needs_reindex(current, state.as_ref(), self.config.drift_threshold, force);
        if !drifted {
            debug!(
                org_id,
                avgdl = current,
                indexed_avgdl = state.as_ref().map(|s| s.indexed_avgdl),
                "avgdl within drift threshold"
            );
        }
        Ok(drifted)
    }

    fn resolve_indexes(&self, requested: Option<&str>) -> Result<(String, String), MaintenanceError> {
        let dense = requested.unwrap_or(&self.config.default_dense_index);
        let sparse = self
            .registry
            .sparse_index(dense)
            .map_err(|e| MaintenanceError::Configuration(e.to_string()))?;
        Ok((dense.to_string(), sparse.to_string()))
    }

    async fn embed_chunks(&self, chunks: &[&ChunkPayload]) -> Result<Vec<Vec<f32>>, MaintenanceError> {
        let mut embeddings = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.config.embed_batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self
                .embedder
                .embed_batch(&texts)
                .await
                .map_err(|e| MaintenanceError::EmbeddingFailed(e.to_string()))?;
            if vectors.len() != batch.len() {
                return Err(MaintenanceError::EmbeddingCountMismatch {
                    expected: batch.len(),
                    actual: vectors.len(),
                });
            }
            embeddings.extend(vectors);
        }
        Ok(embeddings)
    }
}

/// Relative change of avgdl since it was last indexed. Any change away from
/// an empty corpus counts as unbounded drift.
pub fn avgdl_drift(current: f64, indexed: f64) -> f64 {
    if indexed <= 0.0 {
        if current > 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    } else {
        (current - indexed).abs() / indexed
    }
}

pub fn needs_reindex(current: f64, state: Option<&IndexState>, threshold: f64, force: bool) -> bool {
    if force {
        return true;
    }
    match state {
        None => true,
        Some(state) => avgdl_drift(current, state.indexed_avgdl) > threshold,
    }
}

/// Metadata stored on both vectors of a chunk. The chunk's own metadata is
/// kept, but the indexing fields always win.
fn chunk_metadata(job: &IngestJob, chunk: &ChunkPayload) -> Metadata {
    let mut metadata = chunk.metadata.clone();
    metadata.insert("text".into(), Value::from(chunk.text.as_str()));
    metadata.insert("org_id".into(), Value::from(job.org_id.as_str()));
    metadata.insert("file_id".into(), Value::from(job.file_id.as_str()));
    metadata.insert("chunk_ordinal".into(), Value::from(chunk.ordinal));
    metadata.insert("tags".into(), Value::from(job.tags.clone()));
    metadata
}

#[derive(Debug, thiserror::Error)]
pub enum MaintenanceError {
    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Embedding service returned {actual} vectors for {expected} texts")]
    EmbeddingCountMismatch { expected: usize, actual: usize },

    #[error("Vector index error: {0}")]
    Index(AppError),

    #[error("Reindex of {org_id} incomplete: {failed} updates failed")]
    IncompleteReindex { org_id: String, failed: usize },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Storage error: {0}")]
    Storage(#[from] AppError),
}

impl MaintenanceError {
    /// Errors that a redelivery of the same message cannot fix
    pub fn is_permanent(&self) -> bool {
        match self {
            MaintenanceError::Configuration(_) => true,
            MaintenanceError::Storage(e) | MaintenanceError::Index(e) => e.is_fatal(),
            _ => false,
        }
    }
}

impl From<MaintenanceError> for AppError {
    fn from(e: MaintenanceError) -> Self {
        match e {
            MaintenanceError::Storage(e) | MaintenanceError::Index(e) => e,
            MaintenanceError::Configuration(message) => AppError::Configuration { message },
            other => AppError::Internal {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use clauseforge_common::db::{InMemoryTermFrequencyStore, TermFrequencyStore};
    use clauseforge_common::embeddings::MockEmbedder;
    use clauseforge_common::errors::Result;
    use clauseforge_search::bm25::{Bm25Encoder, SparseVector};
    use clauseforge_search::corpus::{CorpusStatsProvider, DeltaAction, LocalCorpusStats};
    use clauseforge_search::index::QueryRequest;
    use clauseforge_search::retrieval::RankedMatch;
    use serde_json::json;
    use tokio::sync::Mutex;

    const DENSE: &str = "contracts-dense";
    const SPARSE: &str = "contracts-sparse";

    /// Vector index fake keyed by (index, namespace)
    #[derive(Default)]
    struct MemoryIndex {
        upserts: Mutex<Vec<(String, String, IndexVector)>>,
        deletes: Mutex<Vec<(String, String, Vec<String>)>>,
        updates: Mutex<Vec<(String, String)>>,
        fail_deletes: bool,
    }

    impl MemoryIndex {
        async fn upserted(&self, index: &str) -> Vec<IndexVector> {
            self.upserts
                .lock()
                .await
                .iter()
                .filter(|(i, _, _)| i == index)
                .map(|(_, _, v)| v.clone())
                .collect()
        }
    }

    #[async_trait]
    impl VectorIndex for MemoryIndex {
        async fn query(&self, _index: &str, _request: &QueryRequest) -> Result<Vec<RankedMatch>> {
            Ok(Vec::new())
        }

        async fn upsert(&self, index: &str, namespace: &str, vectors: Vec<IndexVector>) -> Result<usize> {
            let count = vectors.len();
            let mut upserts = self.upserts.lock().await;
            for vector in vectors {
                upserts.push((index.to_string(), namespace.to_string(), vector));
            }
            Ok(count)
        }

        async fn delete(&self, index: &str, namespace: &str, ids: &[String]) -> Result<()> {
            if self.fail_deletes {
                return Err(AppError::VectorIndex {
                    index: index.to_string(),
                    message: "unavailable".into(),
                });
            }
            self.deletes
                .lock()
                .await
                .push((index.to_string(), namespace.to_string(), ids.to_vec()));
            Ok(())
        }

        async fn update_sparse(
            &self,
            index: &str,
            _namespace: &str,
            id: &str,
            _sparse: &SparseVector,
        ) -> Result<()> {
            self.updates
                .lock()
                .await
                .push((index.to_string(), id.to_string()));
            Ok(())
        }
    }

    /// Records every delta and answers from the rows
    struct RecordingStats {
        deltas: Mutex<Vec<CorpusDelta>>,
        local: LocalCorpusStats,
    }

    #[async_trait]
    impl CorpusStatsProvider for RecordingStats {
        async fn get(&self, org_id: &str) -> Result<f64> {
            self.local.get(org_id).await
        }

        async fn apply_delta(&self, delta: &CorpusDelta) -> Result<f64> {
            self.deltas.lock().await.push(delta.clone());
            self.local.apply_delta(delta).await
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(AppError::EmbeddingError {
                message: "quota exceeded".into(),
            })
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(AppError::EmbeddingError {
                message: "quota exceeded".into(),
            })
        }

        fn model_name(&self) -> &str {
            "failing"
        }

        fn dimension(&self) -> usize {
            4
        }
    }

    struct Harness {
        processor: MaintenanceProcessor,
        store: Arc<InMemoryTermFrequencyStore>,
        stats: Arc<RecordingStats>,
        index: Arc<MemoryIndex>,
    }

    fn harness_with(index: MemoryIndex, embedder: Arc<dyn Embedder>) -> Harness {
        let store = Arc::new(InMemoryTermFrequencyStore::new());
        let stats = Arc::new(RecordingStats {
            deltas: Mutex::new(Vec::new()),
            local: LocalCorpusStats::new(store.clone()),
        });
        let corpus = Arc::new(CorpusStatisticsStore::new(
            store.clone(),
            stats.clone(),
            Bm25Encoder::default(),
        ));
        let index = Arc::new(index);
        let mut registry = IndexRegistry::default();
        registry.register(DENSE, SPARSE);

        let processor = MaintenanceProcessor::new(
            corpus,
            index.clone(),
            registry,
            embedder,
            ProcessorConfig {
                default_dense_index: DENSE.to_string(),
                embed_batch_size: 2,
                drift_threshold: 0.10,
            },
        );
        Harness {
            processor,
            store,
            stats,
            index,
        }
    }

    fn harness() -> Harness {
        harness_with(MemoryIndex::default(), Arc::new(MockEmbedder::new(4)))
    }

    fn ingest_job(texts: &[&str]) -> IngestJob {
        IngestJob {
            org_id: "acme".into(),
            user_id: Some("u1".into()),
            file_id: "msa".into(),
            dense_index: None,
            tags: vec!["nda".into()],
            chunks: texts
                .iter()
                .enumerate()
                .map(|(i, text)| ChunkPayload {
                    ordinal: i as u32,
                    text: text.to_string(),
                    metadata: Metadata::new(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_ingest_writes_rows_delta_and_vectors() {
        let h = harness();
        let mut job = ingest_job(&[
            "Escrow release conditions",
            "   ",
            "Indemnification by the supplier",
        ]);
        job.chunks[0].metadata.insert("page".into(), json!(3));
        job.chunks[0].metadata.insert("org_id".into(), json!("spoofed"));

        h.processor.ingest(&job).await.unwrap();

        assert_eq!(h.store.len().await, 2);
        assert!(h.store.get("acme#msa#1").await.is_none());

        let deltas = h.stats.deltas.lock().await;
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].action, DeltaAction::Update);
        assert_eq!(deltas[0].file_id.as_deref(), Some("msa"));
        assert_eq!(deltas[0].total_chunks, 2);
        // "escrow release conditions" + "indemnification supplier"
        assert_eq!(deltas[0].total_document_length, 5);

        let dense = h.index.upserted(DENSE).await;
        assert_eq!(dense.len(), 2);
        assert!(dense.iter().all(|v| v.values.as_ref().map(Vec::len) == Some(4)));

        let first = &dense[0];
        assert_eq!(first.id, "acme#msa#0");
        assert_eq!(first.metadata["text"], "Escrow release conditions");
        assert_eq!(first.metadata["org_id"], "acme");
        assert_eq!(first.metadata["file_id"], "msa");
        assert_eq!(first.metadata["chunk_ordinal"], 0);
        assert_eq!(first.metadata["tags"], json!(["nda"]));
        assert_eq!(first.metadata["page"], 3);

        let sparse = h.index.upserted(SPARSE).await;
        assert_eq!(sparse.len(), 2);
        assert_eq!(sparse[1].id, "acme#msa#2");
        assert_eq!(sparse[1].metadata, dense[1].metadata);
        assert!(sparse.iter().all(|v| v.sparse_values.is_some()));

        let namespaces: Vec<String> = h
            .index
            .upserts
            .lock()
            .await
            .iter()
            .map(|(_, ns, _)| ns.clone())
            .collect();
        assert!(namespaces.iter().all(|ns| ns == "acme"));
    }

    #[tokio::test]
    async fn test_reingest_sends_length_difference() {
        let h = harness();
        h.processor
            .ingest(&ingest_job(&["payment terms net thirty days"]))
            .await
            .unwrap();
        h.processor
            .ingest(&ingest_job(&["payment terms", "late fees"]))
            .await
            .unwrap();

        let deltas = h.stats.deltas.lock().await;
        assert_eq!(deltas[0].total_chunks, 1);
        assert_eq!(deltas[0].total_document_length, 5);
        // chunk 0 shrinks from 5 to 2 terms, chunk 1 is new with 2 terms
        assert_eq!(deltas[1].total_chunks, 1);
        assert_eq!(deltas[1].total_document_length, -1);
        assert_eq!(h.store.len().await, 2);
    }

    #[tokio::test]
    async fn test_shrinking_reingest_retires_dropped_chunks() {
        let h = harness();
        h.processor
            .ingest(&ingest_job(&["escrow agent", "termination for convenience", "governing law"]))
            .await
            .unwrap();
        h.processor.ingest(&ingest_job(&["escrow agent"])).await.unwrap();

        let active = h
            .store
            .active_rows(&CorpusScope::org("acme").with_files(["msa"]))
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].chunk_id, "acme#msa#0");

        let deletes = h.index.deletes.lock().await;
        let indexes: Vec<&str> = deletes.iter().map(|(i, _, _)| i.as_str()).collect();
        assert_eq!(indexes, vec![DENSE, SPARSE]);
        let mut ids = deletes[0].2.clone();
        ids.sort();
        assert_eq!(ids, vec!["acme#msa#1", "acme#msa#2"]);
        assert!(deletes.iter().all(|(_, ns, _)| ns == "acme"));

        let deltas = h.stats.deltas.lock().await;
        assert_eq!(deltas.len(), 3);
        assert_eq!(deltas[1].action, DeltaAction::Update);
        assert_eq!(deltas[1].total_chunks, 0);
        assert_eq!(deltas[1].total_document_length, 0);
        // "termination convenience" + "governing law"
        assert_eq!(deltas[2].action, DeltaAction::Delete);
        assert_eq!(deltas[2].file_id.as_deref(), Some("msa"));
        assert_eq!(deltas[2].total_chunks, 2);
        assert_eq!(deltas[2].total_document_length, 4);

        assert_eq!(h.processor.corpus.get_avgdl("acme").await, 2.0);
    }

    #[tokio::test]
    async fn test_reingest_without_text_retires_every_chunk() {
        let h = harness();
        h.processor.ingest(&ingest_job(&["escrow agent"])).await.unwrap();
        h.processor.ingest(&ingest_job(&["  "])).await.unwrap();

        let active = h.store.active_rows(&CorpusScope::org("acme")).await.unwrap();
        assert!(active.is_empty());
        assert_eq!(h.index.deletes.lock().await.len(), 2);
        let dense_upserts = h.index.upserted(DENSE).await;
        assert_eq!(dense_upserts.len(), 1);
    }

    #[tokio::test]
    async fn test_stopword_only_chunk_gets_no_sparse_vector() {
        let h = harness();
        h.processor
            .ingest(&ingest_job(&["of the and", "governing law"]))
            .await
            .unwrap();

        assert_eq!(h.index.upserted(DENSE).await.len(), 2);
        let sparse = h.index.upserted(SPARSE).await;
        assert_eq!(sparse.len(), 1);
        assert_eq!(sparse[0].id, "acme#msa#1");
    }

    #[tokio::test]
    async fn test_embedding_failure_writes_nothing() {
        let h = harness_with(MemoryIndex::default(), Arc::new(FailingEmbedder));
        let err = h
            .processor
            .ingest(&ingest_job(&["Escrow release"]))
            .await
            .unwrap_err();

        assert!(matches!(err, MaintenanceError::EmbeddingFailed(_)));
        assert!(!err.is_permanent());
        assert!(h.store.is_empty().await);
        assert!(h.stats.deltas.lock().await.is_empty());
        assert!(h.index.upserts.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_dense_index_is_permanent() {
        let h = harness();
        let mut job = ingest_job(&["Escrow release"]);
        job.dense_index = Some("unmapped".into());

        let err = h.processor.ingest(&job).await.unwrap_err();
        assert!(matches!(err, MaintenanceError::Configuration(_)));
        assert!(err.is_permanent());
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_removes_vectors_and_archives() {
        let h = harness();
        h.processor
            .ingest(&ingest_job(&["escrow agent", "termination for convenience"]))
            .await
            .unwrap();

        h.processor
            .delete(&DeleteJob {
                org_id: "acme".into(),
                file_ids: vec!["msa".into()],
                dense_index: None,
            })
            .await
            .unwrap();

        let deletes = h.index.deletes.lock().await;
        assert_eq!(deletes.len(), 2);
        let indexes: Vec<&str> = deletes.iter().map(|(i, _, _)| i.as_str()).collect();
        assert_eq!(indexes, vec![DENSE, SPARSE]);
        let mut ids = deletes[0].2.clone();
        ids.sort();
        assert_eq!(ids, vec!["acme#msa#0", "acme#msa#1"]);

        let deltas = h.stats.deltas.lock().await;
        let last = deltas.last().unwrap();
        assert_eq!(last.action, DeltaAction::Delete);
        assert_eq!(last.file_id.as_deref(), Some("msa"));
        assert_eq!(last.total_chunks, 2);
        assert_eq!(last.total_document_length, 4);

        let active = h
            .store
            .active_rows(&CorpusScope::org("acme"))
            .await
            .unwrap();
        assert!(active.is_empty());
        assert_eq!(h.store.len().await, 2);
    }

    #[tokio::test]
    async fn test_failed_vector_delete_keeps_rows_active() {
        let h = harness_with(
            MemoryIndex {
                fail_deletes: true,
                ..MemoryIndex::default()
            },
            Arc::new(MockEmbedder::new(4)),
        );
        h.processor.ingest(&ingest_job(&["escrow agent"])).await.unwrap();

        let err = h
            .processor
            .delete(&DeleteJob {
                org_id: "acme".into(),
                file_ids: vec!["msa".into()],
                dense_index: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, MaintenanceError::Index(_)));
        assert!(!err.is_permanent());
        let active = h.store.active_rows(&CorpusScope::org("acme")).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(h.stats.deltas.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_of_unknown_file_is_noop() {
        let h = harness();
        h.processor
            .delete(&DeleteJob {
                org_id: "acme".into(),
                file_ids: vec!["missing".into()],
                dense_index: None,
            })
            .await
            .unwrap();

        assert!(h.index.deletes.lock().await.is_empty());
        assert!(h.stats.deltas.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_reindex_follows_drift() {
        let h = harness();
        h.processor
            .ingest(&ingest_job(&["escrow agent", "termination for convenience"]))
            .await
            .unwrap();
        let job = ReindexJob {
            org_id: "acme".into(),
            force: false,
            dense_index: None,
        };

        // no recorded state yet
        let report = h.processor.reindex(&job).await.unwrap().unwrap();
        assert_eq!(report.updated, 2);
        assert_eq!(report.avgdl, 2.0);
        assert_eq!(h.index.updates.lock().await.len(), 2);

        // unchanged corpus
        assert!(h.processor.reindex(&job).await.unwrap().is_none());

        // 2 -> 3 terms per chunk is 50% drift
        h.processor
            .ingest(&ingest_job(&[
                "escrow agent",
                "termination for convenience",
                "confidential information disclosed recipient party affiliates",
                "assignment consent",
            ]))
            .await
            .unwrap();
        let report = h.processor.reindex(&job).await.unwrap().unwrap();
        assert_eq!(report.updated, 4);

        let state = h.store.index_state("acme").await.unwrap().unwrap();
        assert_eq!(state.indexed_avgdl, report.avgdl);
    }

    #[tokio::test]
    async fn test_forced_reindex_ignores_drift() {
        let h = harness();
        h.processor.ingest(&ingest_job(&["escrow agent"])).await.unwrap();
        let job = ReindexJob {
            org_id: "acme".into(),
            force: false,
            dense_index: None,
        };
        h.processor.reindex(&job).await.unwrap();

        let forced = ReindexJob { force: true, ..job };
        assert!(h.processor.reindex(&forced).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_process_dispatches_by_type() {
        let h = harness();
        let job: MaintenanceJob = serde_json::from_value(json!({
            "type": "ingest",
            "org_id": "acme",
            "file_id": "msa",
            "chunks": [{ "ordinal": 0, "text": "Limitation of liability" }]
        }))
        .unwrap();
        assert_eq!(job.describe(), "ingest 1 chunks of msa");

        // first ingest of an org has no recorded index state
        let follow_up = h.processor.process(job.clone()).await.unwrap();
        assert_eq!(h.store.len().await, 1);
        let Some(MaintenanceJob::Reindex(reindex)) = follow_up else {
            panic!("expected a reindex follow-up");
        };
        assert_eq!(reindex.org_id, "acme");
        assert!(!reindex.force);

        let again = h
            .processor
            .process(MaintenanceJob::Reindex(reindex))
            .await
            .unwrap();
        assert!(again.is_none());
        assert!(h.store.index_state("acme").await.unwrap().is_some());

        // same content, same avgdl
        assert!(h.processor.process(job).await.unwrap().is_none());
    }

    #[test]
    fn test_avgdl_drift() {
        assert_eq!(avgdl_drift(110.0, 100.0), 0.10);
        assert_eq!(avgdl_drift(50.0, 100.0), 0.5);
        assert_eq!(avgdl_drift(0.0, 0.0), 0.0);
        assert!(avgdl_drift(3.0, 0.0).is_infinite());
    }

    #[test]
    fn test_needs_reindex() {
        let state = IndexState {
            org_id: "acme".into(),
            indexed_avgdl: 100.0,
            updated_at: chrono::Utc::now(),
        };

        assert!(needs_reindex(100.0, None, 0.10, false));
        assert!(!needs_reindex(105.0, Some(&state), 0.10, false));
        assert!(!needs_reindex(110.0, Some(&state), 0.10, false));
        assert!(needs_reindex(111.0, Some(&state), 0.10, false));
        assert!(needs_reindex(100.0, Some(&state), 0.10, true));
    }
}
