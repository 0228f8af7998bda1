//! ClauseForge Search
//!
//! Hybrid sparse+dense retrieval over legal contracts:
//! - BM25 sparse encoding with hashed term indices
//! - Corpus statistics (avgdl, document frequencies) and sparse reindexing
//! - Vector index client with result normalization
//! - RRF fusion, reranking and the hybrid query executor

pub mod bm25;
pub mod corpus;
pub mod index;
pub mod retrieval;

pub use bm25::{Bm25Encoder, Bm25Params, SparseVector};
pub use corpus::{CorpusStatisticsStore, CorpusStatsProvider};
pub use index::{IndexRegistry, VectorIndex};
pub use retrieval::{FusedCandidate, HybridExecutor, HybridRequest, RankedMatch, RerankerAdapter};
