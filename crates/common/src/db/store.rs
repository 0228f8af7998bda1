//! Term-frequency persistence seam
//!
//! The corpus statistics layer only needs a handful of operations from the
//! relational store. They are expressed here as a trait so the Postgres
//! repository and the in-memory store are interchangeable.

use crate::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The chunks visible to a query.
///
/// `file_ids` is the permitted document set already resolved from the
/// caller's access tags; `None` means every file of the org. `access_tags`
/// are only used as a metadata filter against the vector index, so a scope
/// with tags must also carry its resolved `file_ids`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorpusScope {
    pub org_id: String,
    pub file_ids: Option<BTreeSet<String>>,
    pub access_tags: Vec<String>,
}

impl CorpusScope {
    /// Scope covering every active chunk of an organization
    pub fn org(org_id: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            ..Default::default()
        }
    }

    pub fn with_files<I, S>(mut self, file_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.file_ids = Some(file_ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.access_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// False for a tag-restricted scope whose files were never resolved.
    /// Statistics over such a scope would cover the whole organization.
    pub fn is_resolved(&self) -> bool {
        self.access_tags.is_empty() || self.file_ids.is_some()
    }

    /// Whether a row of `org_id`/`file_id` falls inside this scope
    pub fn contains(&self, org_id: &str, file_id: &str) -> bool {
        self.org_id == org_id
            && self
                .file_ids
                .as_ref()
                .map_or(true, |files| files.contains(file_id))
    }
}

/// A term-frequency row as the retrieval layer sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermFrequencyRow {
    pub chunk_id: String,
    pub org_id: String,
    pub file_id: String,
    pub user_id: Option<String>,
    pub term_frequency: BTreeMap<u32, u32>,
    pub tf: u32,
    pub is_archived: bool,
}

/// Payload for an idempotent upsert keyed by `chunk_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTermFrequency {
    pub chunk_id: String,
    pub org_id: String,
    pub file_id: String,
    pub user_id: Option<String>,
    pub term_frequency: BTreeMap<u32, u32>,
    pub tf: u32,
}

/// What an upsert replaced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub chunk_id: String,
    pub length: u32,
    /// Length of the active row this upsert overwrote, if any
    pub previous_length: Option<u32>,
}

/// Rows flipped to archived by one call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub chunk_ids: Vec<String>,
    pub chunk_count: u64,
    pub total_length: u64,
}

/// Aggregate length statistics over active chunks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorpusTotals {
    pub chunk_count: u64,
    pub total_length: u64,
}

impl CorpusTotals {
    /// `SUM(tf) / COUNT(*)`, or 0 for an empty corpus
    pub fn avgdl(&self) -> f64 {
        if self.chunk_count == 0 {
            0.0
        } else {
            self.total_length as f64 / self.chunk_count as f64
        }
    }
}

/// avgdl recorded at the last sparse (re)index of an organization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexState {
    pub org_id: String,
    pub indexed_avgdl: f64,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait TermFrequencyStore: Send + Sync {
    /// Insert or replace the row for `chunk_id`; re-ingest un-archives it
    async fn upsert(&self, row: NewTermFrequency) -> Result<UpsertOutcome>;

    /// Mark every active chunk of the given files as archived
    async fn archive_files(&self, org_id: &str, file_ids: &[String]) -> Result<ArchiveSummary>;

    /// Mark the given active chunks of an org as archived
    async fn archive_chunk_ids(&self, org_id: &str, chunk_ids: &[String]) -> Result<ArchiveSummary>;

    /// All active rows inside a scope
    async fn active_rows(&self, scope: &CorpusScope) -> Result<Vec<TermFrequencyRow>>;

    /// Active rows of an org ordered by `chunk_id`, starting after `after`
    async fn rows_for_org_page(
        &self,
        org_id: &str,
        after: Option<&str>,
        limit: u64,
    ) -> Result<Vec<TermFrequencyRow>>;

    /// Chunk count and summed length over active rows of an org
    async fn totals(&self, org_id: &str) -> Result<CorpusTotals>;

    async fn index_state(&self, org_id: &str) -> Result<Option<IndexState>>;

    async fn set_index_state(&self, org_id: &str, indexed_avgdl: f64) -> Result<()>;
}
