//! avgdl the sparse vectors of an organization were last encoded under

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "corpus_index_state")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub org_id: String,

    pub indexed_avgdl: f64,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
