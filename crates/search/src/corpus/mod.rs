//! Corpus statistics
//!
//! BM25 weights depend on two corpus-wide figures: the average document
//! length (avgdl), maintained per organization from additive deltas, and
//! per-term document frequencies, computed over the query's scope.

mod provider;
mod store;

pub use provider::{
    corpus_stats_from_config, CorpusDelta, CorpusStatsProvider, DeltaAction, FallbackCorpusStats,
    LocalCorpusStats, RemoteCorpusStats,
};
pub use store::{CorpusStatisticsStore, ReindexReport, StoredChunk};
pub(crate) use store::unresolved_scope;

/// Composite chunk key, stable across re-ingest
pub fn chunk_id(org_id: &str, file_id: &str, ordinal: u32) -> String {
    format!("{}#{}#{}", org_id, file_id, ordinal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id() {
        assert_eq!(chunk_id("acme", "msa-2024", 3), "acme#msa-2024#3");
    }
}
