use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// An attachment occupying one slot (`file`, `media_file` or `log_file`) of a
/// delivery. The bytes live in the blob store under `content_hash`.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "delivery_file")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub delivery_id: i32,
    #[sea_orm(belongs_to, from = "delivery_id", to = "id", on_delete = "Cascade")]
    pub delivery: HasOne<super::delivery::Entity>,

    pub slot: String,
    pub content_hash: String,
    pub filename: String,
    pub content_type: String,
    pub size: i64,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
