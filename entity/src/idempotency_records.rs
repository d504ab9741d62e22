//! `SeaORM` Entity, dedupe record keyed by the gateway payment token

use super::sea_orm_active_enums::IdempotencyStatus;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "idempotency_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub idem_key: String,
    pub user_id: Uuid,
    pub status: IdempotencyStatus,
    pub request_fingerprint: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub response_snapshot: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub error_snapshot: Option<String>,
    /// When the current attempt took ownership of the key
    pub locked_at: TimeDateTimeWithTimeZone,
    pub expires_at: TimeDateTimeWithTimeZone,
    pub created_at: TimeDateTimeWithTimeZone,
    pub updated_at: TimeDateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
