use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "delivery")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub transport_model_id: i32,
    #[sea_orm(belongs_to, from = "transport_model_id", to = "id", on_delete = "Restrict")]
    pub transport_model: HasOne<super::transport_model::Entity>,

    pub vehicle_number: String,

    pub packaging_id: i32,
    #[sea_orm(belongs_to, from = "packaging_id", to = "id", on_delete = "Restrict")]
    pub packaging: HasOne<super::packaging_type::Entity>,

    pub service_id: i32,
    #[sea_orm(belongs_to, from = "service_id", to = "id", on_delete = "Restrict")]
    pub service: HasOne<super::service_type::Entity>,

    pub tech_state_id: i32,
    #[sea_orm(belongs_to, from = "tech_state_id", to = "id", on_delete = "Restrict")]
    pub tech_state: HasOne<super::tech_state::Entity>,

    pub status_id: i32,
    #[sea_orm(belongs_to, from = "status_id", to = "id", on_delete = "Restrict")]
    pub status: HasOne<super::delivery_status::Entity>,

    #[sea_orm(column_type = "Decimal(Some((6, 2)))")]
    pub distance_km: Decimal,
    pub send_time: DateTimeUtc,
    pub delivery_time: DateTimeUtc,
    pub travel_time: Option<chrono::NaiveTime>,

    pub from_address: String,
    pub to_address: String,
    #[sea_orm(column_type = "Text")]
    pub comment: String,

    /// NULL only for rows written before the creator was tracked.
    pub created_by_id: Option<i32>,
    #[sea_orm(belongs_to, from = "created_by_id", to = "id", on_delete = "Restrict")]
    pub creator: HasOne<super::user::Entity>,

    #[sea_orm(has_many)]
    pub files: HasMany<super::delivery_file::Entity>,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
