//! In-memory term-frequency store for tests and local runs

use crate::db::store::{
    ArchiveSummary, CorpusScope, CorpusTotals, IndexState, NewTermFrequency, TermFrequencyRow,
    TermFrequencyStore, UpsertOutcome,
};
use crate::errors::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryTermFrequencyStore {
    rows: RwLock<BTreeMap<String, TermFrequencyRow>>,
    states: RwLock<HashMap<String, IndexState>>,
}

impl InMemoryTermFrequencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total stored rows, archived included
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    pub async fn get(&self, chunk_id: &str) -> Option<TermFrequencyRow> {
        self.rows.read().await.get(chunk_id).cloned()
    }
}

#[async_trait]
impl TermFrequencyStore for InMemoryTermFrequencyStore {
    async fn upsert(&self, row: NewTermFrequency) -> Result<UpsertOutcome> {
        let mut rows = self.rows.write().await;

        let previous_length = rows
            .get(&row.chunk_id)
            .filter(|existing| !existing.is_archived)
            .map(|existing| existing.tf);

        let outcome = UpsertOutcome {
            chunk_id: row.chunk_id.clone(),
            length: row.tf,
            previous_length,
        };

        rows.insert(
            row.chunk_id.clone(),
            TermFrequencyRow {
                chunk_id: row.chunk_id,
                org_id: row.org_id,
                file_id: row.file_id,
                user_id: row.user_id,
                term_frequency: row.term_frequency,
                tf: row.tf,
                is_archived: false,
            },
        );

        Ok(outcome)
    }

    async fn archive_files(&self, org_id: &str, file_ids: &[String]) -> Result<ArchiveSummary> {
        let mut rows = self.rows.write().await;
        let mut summary = ArchiveSummary::default();

        for row in rows.values_mut() {
            if row.is_archived || row.org_id != org_id || !file_ids.contains(&row.file_id) {
                continue;
            }
            row.is_archived = true;
            summary.chunk_count += 1;
            summary.total_length += row.tf as u64;
            summary.chunk_ids.push(row.chunk_id.clone());
        }

        Ok(summary)
    }

    async fn archive_chunk_ids(&self, org_id: &str, chunk_ids: &[String]) -> Result<ArchiveSummary> {
        let mut rows = self.rows.write().await;
        let mut summary = ArchiveSummary::default();

        for id in chunk_ids {
            let Some(row) = rows.get_mut(id) else { continue };
            if row.is_archived || row.org_id != org_id {
                continue;
            }
            row.is_archived = true;
            summary.chunk_count += 1;
            summary.total_length += row.tf as u64;
            summary.chunk_ids.push(row.chunk_id.clone());
        }

        Ok(summary)
    }

    async fn active_rows(&self, scope: &CorpusScope) -> Result<Vec<TermFrequencyRow>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|row| !row.is_archived && scope.contains(&row.org_id, &row.file_id))
            .cloned()
            .collect())
    }

    async fn rows_for_org_page(
        &self,
        org_id: &str,
        after: Option<&str>,
        limit: u64,
    ) -> Result<Vec<TermFrequencyRow>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|row| !row.is_archived && row.org_id == org_id)
            .filter(|row| after.map_or(true, |after| row.chunk_id.as_str() > after))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn totals(&self, org_id: &str) -> Result<CorpusTotals> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|row| !row.is_archived && row.org_id == org_id)
            .fold(CorpusTotals::default(), |mut acc, row| {
                acc.chunk_count += 1;
                acc.total_length += row.tf as u64;
                acc
            }))
    }

    async fn index_state(&self, org_id: &str) -> Result<Option<IndexState>> {
        Ok(self.states.read().await.get(org_id).cloned())
    }

    async fn set_index_state(&self, org_id: &str, indexed_avgdl: f64) -> Result<()> {
        self.states.write().await.insert(
            org_id.to_string(),
            IndexState {
                org_id: org_id.to_string(),
                indexed_avgdl,
                updated_at: chrono::Utc::now(),
            },
        );
        Ok(())
    }
}
