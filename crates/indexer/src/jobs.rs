//! Corpus maintenance job messages
//!
//! Jobs arrive on the maintenance queue as JSON tagged by `type`.

use clauseforge_search::retrieval::Metadata;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MaintenanceJob {
    Ingest(IngestJob),
    Delete(DeleteJob),
    Reindex(ReindexJob),
}

impl MaintenanceJob {
    pub fn kind(&self) -> &'static str {
        match self {
            MaintenanceJob::Ingest(_) => "ingest",
            MaintenanceJob::Delete(_) => "delete",
            MaintenanceJob::Reindex(_) => "reindex",
        }
    }

    pub fn org_id(&self) -> &str {
        match self {
            MaintenanceJob::Ingest(job) => &job.org_id,
            MaintenanceJob::Delete(job) => &job.org_id,
            MaintenanceJob::Reindex(job) => &job.org_id,
        }
    }

    /// One-line summary for logs
    pub fn describe(&self) -> String {
        match self {
            MaintenanceJob::Ingest(job) => {
                format!("ingest {} chunks of {}", job.chunks.len(), job.file_id)
            }
            MaintenanceJob::Delete(job) => format!("delete {} files", job.file_ids.len()),
            MaintenanceJob::Reindex(job) if job.force => "forced reindex".to_string(),
            MaintenanceJob::Reindex(_) => "reindex".to_string(),
        }
    }
}

/// Chunks of one file to index or re-index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestJob {
    pub org_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub file_id: String,
    /// Dense index to write; the configured default when absent
    #[serde(default)]
    pub dense_index: Option<String>,
    /// Access tags stored on every vector for query-time filtering
    #[serde(default)]
    pub tags: Vec<String>,
    pub chunks: Vec<ChunkPayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub ordinal: u32,
    pub text: String,
    /// Extra metadata copied onto both vectors
    #[serde(default)]
    pub metadata: Metadata,
}

/// Files removed from an organization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteJob {
    pub org_id: String,
    pub file_ids: Vec<String>,
    #[serde(default)]
    pub dense_index: Option<String>,
}

/// Sparse re-encoding of an organization when avgdl drifted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReindexJob {
    pub org_id: String,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub dense_index: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_ingest() {
        let job: MaintenanceJob = serde_json::from_value(json!({
            "type": "ingest",
            "org_id": "acme",
            "file_id": "msa",
            "chunks": [
                { "ordinal": 0, "text": "Term and termination" },
                { "ordinal": 1, "text": "Fees", "metadata": { "page": 2 } }
            ]
        }))
        .unwrap();

        assert_eq!(job.kind(), "ingest");
        assert_eq!(job.org_id(), "acme");
        let MaintenanceJob::Ingest(ingest) = job else {
            panic!("expected ingest job");
        };
        assert_eq!(ingest.chunks.len(), 2);
        assert_eq!(ingest.chunks[1].metadata["page"], 2);
        assert!(ingest.dense_index.is_none());
        assert!(ingest.tags.is_empty());
    }

    #[test]
    fn test_decode_delete_and_reindex() {
        let delete: MaintenanceJob = serde_json::from_value(json!({
            "type": "delete", "org_id": "acme", "file_ids": ["a", "b"]
        }))
        .unwrap();
        assert_eq!(delete.kind(), "delete");

        let reindex: MaintenanceJob =
            serde_json::from_value(json!({ "type": "reindex", "org_id": "acme" })).unwrap();
        assert_eq!(
            reindex,
            MaintenanceJob::Reindex(ReindexJob {
                org_id: "acme".into(),
                force: false,
                dense_index: None
            })
        );
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result = serde_json::from_value::<MaintenanceJob>(json!({ "type": "purge", "org_id": "a" }));
        assert!(result.is_err());
    }
}
