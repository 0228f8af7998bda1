//! Per-chunk term frequencies backing BM25 corpus statistics

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "chunk_term_frequencies")]
pub struct Model {
    /// Composite `org#file#ordinal`, stable across re-ingest
    #[sea_orm(primary_key, auto_increment = false)]
    pub chunk_id: String,

    pub file_id: String,

    pub org_id: String,

    pub user_id: Option<String>,

    /// Sparse map of hashed term index -> count, keys stored as strings
    #[sea_orm(column_type = "JsonBinary")]
    pub term_frequency: Json,

    /// Sum of all counts (document length)
    pub tf: i32,

    /// Soft-delete marker; NULL and false both mean active
    pub is_archived: Option<bool>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Decode the stored JSON map into term index -> count
    pub fn parse_term_frequency(&self) -> Option<BTreeMap<u32, u32>> {
        serde_json::from_value(self.term_frequency.clone()).ok()
    }

    pub fn is_active(&self) -> bool {
        !self.is_archived.unwrap_or(false)
    }
}
