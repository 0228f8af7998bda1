//! Vector index client
//!
//! Dense and sparse vectors live in separate hosted indexes. Everything the
//! pipeline needs from them is expressed by [`VectorIndex`]; raw responses
//! are normalized into [`RankedMatch`] at this boundary.

mod filter;
mod normalize;
mod pinecone;
mod registry;

pub use filter::scope_filter;
pub use normalize::normalize_matches;
pub use pinecone::PineconeIndex;
pub use registry::IndexRegistry;

use crate::bm25::SparseVector;
use crate::retrieval::{Metadata, RankedMatch};
use async_trait::async_trait;
use clauseforge_common::errors::Result;
use serde::{Deserialize, Serialize};

/// Query vector for one branch
#[derive(Debug, Clone, PartialEq)]
pub enum QueryVector {
    Dense(Vec<f32>),
    Sparse(SparseVector),
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub vector: QueryVector,
    /// Namespace, one per organization
    pub namespace: String,
    pub top_k: usize,
    /// Metadata filter in the index's filter language
    pub filter: Option<serde_json::Value>,
    pub include_metadata: bool,
}

/// A record to write into an index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexVector {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sparse_values: Option<SparseVector>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl IndexVector {
    pub fn dense(id: impl Into<String>, values: Vec<f32>, metadata: Metadata) -> Self {
        Self {
            id: id.into(),
            values: Some(values),
            sparse_values: None,
            metadata,
        }
    }

    pub fn sparse(id: impl Into<String>, sparse: SparseVector, metadata: Metadata) -> Self {
        Self {
            id: id.into(),
            values: None,
            sparse_values: Some(sparse),
            metadata,
        }
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Nearest matches for a dense or sparse query vector
    async fn query(&self, index: &str, request: &QueryRequest) -> Result<Vec<RankedMatch>>;

    /// Insert or overwrite records, returning how many were written
    async fn upsert(&self, index: &str, namespace: &str, vectors: Vec<IndexVector>)
        -> Result<usize>;

    async fn delete(&self, index: &str, namespace: &str, ids: &[String]) -> Result<()>;

    /// Replace the sparse values of one record, keeping its metadata
    async fn update_sparse(
        &self,
        index: &str,
        namespace: &str,
        id: &str,
        sparse: &SparseVector,
    ) -> Result<()>;
}
