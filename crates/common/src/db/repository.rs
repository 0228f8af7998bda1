//! Repository pattern for term-frequency storage
//!
//! Postgres implementation of [`TermFrequencyStore`]. Upserts go through raw
//! SQL so the previous length can be returned atomically with the write;
//! everything else uses the SeaORM query builder.
//!
//! Writers of the same `chunk_id` are serialized by a transaction-scoped
//! advisory lock. Under READ COMMITTED the upsert statement then takes its
//! snapshot after the other writer committed, so `prev` sees that row.

use crate::db::models::*;
use crate::db::store::{
    ArchiveSummary, CorpusScope, CorpusTotals, IndexState, NewTermFrequency, TermFrequencyRow,
    TermFrequencyStore, UpsertOutcome,
};
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use sea_orm::sea_query::{Expr, OnConflict, SimpleExpr};
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, Statement, TransactionTrait,
};
use tracing::warn;

const UPSERT_LOCK_SQL: &str = "SELECT pg_advisory_xact_lock(hashtext($1))";

const UPSERT_SQL: &str = r#"
    WITH prev AS (
        SELECT tf FROM chunk_term_frequencies
        WHERE chunk_id = $1 AND COALESCE(is_archived, FALSE) = FALSE
    )
    INSERT INTO chunk_term_frequencies (
        chunk_id, file_id, org_id, user_id, term_frequency, tf,
        is_archived, created_at, updated_at
    )
    VALUES ($1, $2, $3, $4, $5::jsonb, $6, NULL, NOW(), NOW())
    ON CONFLICT (chunk_id) DO UPDATE SET
        file_id = EXCLUDED.file_id,
        org_id = EXCLUDED.org_id,
        user_id = EXCLUDED.user_id,
        term_frequency = EXCLUDED.term_frequency,
        tf = EXCLUDED.tf,
        is_archived = NULL,
        updated_at = NOW()
    RETURNING (SELECT tf FROM prev) AS previous_tf
"#;

const TOTALS_SQL: &str = r#"
    SELECT COUNT(*)::BIGINT AS chunk_count,
           COALESCE(SUM(tf), 0)::BIGINT AS total_length
    FROM chunk_term_frequencies
    WHERE org_id = $1 AND COALESCE(is_archived, FALSE) = FALSE
"#;

/// Repository for corpus statistics rows
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    fn active() -> Condition {
        Condition::any()
            .add(TermFrequencyColumn::IsArchived.is_null())
            .add(TermFrequencyColumn::IsArchived.eq(false))
    }

    fn into_row(model: TermFrequency) -> TermFrequencyRow {
        let term_frequency = model.parse_term_frequency().unwrap_or_else(|| {
            warn!(chunk_id = %model.chunk_id, "Unreadable term_frequency payload, treating as empty");
            Default::default()
        });
        let is_archived = !model.is_active();

        TermFrequencyRow {
            chunk_id: model.chunk_id,
            org_id: model.org_id,
            file_id: model.file_id,
            user_id: model.user_id,
            term_frequency,
            tf: model.tf.max(0) as u32,
            is_archived,
        }
    }

    async fn archive_where(&self, org_id: &str, rows: SimpleExpr) -> Result<ArchiveSummary> {
        let now = chrono::Utc::now().fixed_offset();
        let archived = TermFrequencyEntity::update_many()
            .col_expr(TermFrequencyColumn::IsArchived, Expr::value(true))
            .col_expr(TermFrequencyColumn::UpdatedAt, Expr::value(now))
            .filter(TermFrequencyColumn::OrgId.eq(org_id))
            .filter(rows)
            .filter(Self::active())
            .exec_with_returning(self.write_conn())
            .await?;

        let mut summary = ArchiveSummary::default();
        for model in archived {
            summary.chunk_count += 1;
            summary.total_length += model.tf.max(0) as u64;
            summary.chunk_ids.push(model.chunk_id);
        }

        Ok(summary)
    }
}

#[async_trait]
impl TermFrequencyStore for Repository {
    async fn upsert(&self, row: NewTermFrequency) -> Result<UpsertOutcome> {
        let payload = serde_json::to_value(&row.term_frequency)?;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            UPSERT_SQL,
            vec![
                row.chunk_id.clone().into(),
                row.file_id.into(),
                row.org_id.into(),
                row.user_id.into(),
                payload.into(),
                (row.tf as i32).into(),
            ],
        );

        let txn = self.write_conn().begin().await?;
        txn.execute(Statement::from_sql_and_values(
            DbBackend::Postgres,
            UPSERT_LOCK_SQL,
            vec![row.chunk_id.clone().into()],
        ))
        .await?;

        let result = txn
            .query_one(stmt)
            .await?
            .ok_or_else(|| AppError::Internal {
                message: format!("Upsert of chunk {} returned no row", row.chunk_id),
            })?;
        let previous: Option<i32> = result.try_get("", "previous_tf")?;

        txn.commit().await?;

        Ok(UpsertOutcome {
            chunk_id: row.chunk_id,
            length: row.tf,
            previous_length: previous.map(|tf| tf.max(0) as u32),
        })
    }

    async fn archive_files(&self, org_id: &str, file_ids: &[String]) -> Result<ArchiveSummary> {
        if file_ids.is_empty() {
            return Ok(ArchiveSummary::default());
        }
        self.archive_where(org_id, TermFrequencyColumn::FileId.is_in(file_ids.iter().cloned()))
            .await
    }

    async fn archive_chunk_ids(&self, org_id: &str, chunk_ids: &[String]) -> Result<ArchiveSummary> {
        if chunk_ids.is_empty() {
            return Ok(ArchiveSummary::default());
        }
        self.archive_where(org_id, TermFrequencyColumn::ChunkId.is_in(chunk_ids.iter().cloned()))
            .await
    }

    async fn active_rows(&self, scope: &CorpusScope) -> Result<Vec<TermFrequencyRow>> {
        let mut query = TermFrequencyEntity::find()
            .filter(TermFrequencyColumn::OrgId.eq(scope.org_id.as_str()))
            .filter(Self::active());

        if let Some(files) = &scope.file_ids {
            if files.is_empty() {
                return Ok(Vec::new());
            }
            query = query.filter(TermFrequencyColumn::FileId.is_in(files.iter().cloned()));
        }

        let models = query.all(self.read_conn()).await?;
        Ok(models.into_iter().map(Self::into_row).collect())
    }

    async fn rows_for_org_page(
        &self,
        org_id: &str,
        after: Option<&str>,
        limit: u64,
    ) -> Result<Vec<TermFrequencyRow>> {
        let mut query = TermFrequencyEntity::find()
            .filter(TermFrequencyColumn::OrgId.eq(org_id))
            .filter(Self::active());

        if let Some(after) = after {
            query = query.filter(TermFrequencyColumn::ChunkId.gt(after));
        }

        let models = query
            .order_by_asc(TermFrequencyColumn::ChunkId)
            .limit(limit)
            .all(self.read_conn())
            .await?;

        Ok(models.into_iter().map(Self::into_row).collect())
    }

    async fn totals(&self, org_id: &str) -> Result<CorpusTotals> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            TOTALS_SQL,
            vec![org_id.into()],
        );

        let Some(row) = self.read_conn().query_one(stmt).await? else {
            return Ok(CorpusTotals::default());
        };

        let chunk_count: i64 = row.try_get("", "chunk_count")?;
        let total_length: i64 = row.try_get("", "total_length")?;

        Ok(CorpusTotals {
            chunk_count: chunk_count.max(0) as u64,
            total_length: total_length.max(0) as u64,
        })
    }

    async fn index_state(&self, org_id: &str) -> Result<Option<IndexState>> {
        let state = IndexStateEntity::find_by_id(org_id.to_string())
            .one(self.read_conn())
            .await?;

        Ok(state.map(|s| IndexState {
            org_id: s.org_id,
            indexed_avgdl: s.indexed_avgdl,
            updated_at: s.updated_at.with_timezone(&chrono::Utc),
        }))
    }

    async fn set_index_state(&self, org_id: &str, indexed_avgdl: f64) -> Result<()> {
        let state = IndexStateActiveModel {
            org_id: Set(org_id.to_string()),
            indexed_avgdl: Set(indexed_avgdl),
            updated_at: Set(chrono::Utc::now().fixed_offset()),
        };

        IndexStateEntity::insert(state)
            .on_conflict(
                OnConflict::column(IndexStateColumn::OrgId)
                    .update_columns([IndexStateColumn::IndexedAvgdl, IndexStateColumn::UpdatedAt])
                    .to_owned(),
            )
            .exec(self.write_conn())
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{MockDatabase, MockExecResult, Value};
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_upsert_takes_chunk_lock_before_reading_previous_row() {
        let conn = MockDatabase::new(DbBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .append_query_results([vec![BTreeMap::from([(
                "previous_tf".to_string(),
                Value::Int(Some(4)),
            )])]])
            .into_connection();
        let repo = Repository::new(DbPool {
            primary: conn.clone(),
            replica: None,
        });

        let outcome = repo
            .upsert(NewTermFrequency {
                chunk_id: "acme#f1#0".into(),
                org_id: "acme".into(),
                file_id: "f1".into(),
                user_id: None,
                term_frequency: BTreeMap::from([(7, 2)]),
                tf: 2,
            })
            .await
            .unwrap();
        assert_eq!(outcome.previous_length, Some(4));
        assert_eq!(outcome.length, 2);

        let statements = format!("{:?}", conn.into_transaction_log());
        let lock = statements.find("pg_advisory_xact_lock").unwrap();
        let upsert = statements.find("ON CONFLICT (chunk_id)").unwrap();
        assert!(lock < upsert);
    }
}
