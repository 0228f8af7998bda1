//! Hybrid retrieval
//!
//! Provides:
//! - Parallel sparse (BM25) and dense branch execution
//! - Reciprocal Rank Fusion of the two result lists
//! - Reranking of the fused list against a hosted relevance model

mod fusion;
mod hybrid;
mod rerank;

pub use fusion::{merge, DEFAULT_RRF_K};
pub use hybrid::{HybridExecutor, HybridRequest, HybridResponse, QueryPhase};
pub use rerank::{
    top_n, PassthroughReranker, RerankScore, RerankerAdapter, RerankerService, TogetherReranker,
};

use serde::{Deserialize, Serialize};

/// Free-form match metadata as stored alongside index records
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A match from one branch, or a final reranked result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedMatch {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: Metadata,
}

impl RankedMatch {
    pub fn new(id: impl Into<String>, score: f32) -> Self {
        Self {
            id: id.into(),
            score,
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Result of fusing the sparse and dense lists for one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedCandidate {
    pub id: String,
    pub rrf_score: f64,
    /// 1-based rank in the sparse list
    pub sparse_rank: Option<usize>,
    /// 1-based rank in the dense list
    pub dense_rank: Option<usize>,
    pub sparse_score: Option<f32>,
    pub dense_score: Option<f32>,
    pub metadata: Metadata,
}

impl From<FusedCandidate> for RankedMatch {
    fn from(candidate: FusedCandidate) -> Self {
        RankedMatch {
            id: candidate.id,
            score: candidate.rrf_score as f32,
            metadata: candidate.metadata,
        }
    }
}
