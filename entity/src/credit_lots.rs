//! `SeaORM` Entity, a discrete lot of credit ("cookie batch")

use super::sea_orm_active_enums::{LotSource, LotType};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "credit_lots")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub account_id: Uuid,
    pub lot_type: LotType,
    pub source: LotSource,
    pub qty_total: i64,
    pub qty_remain: i64,
    pub expires_at: Option<TimeDateTimeWithTimeZone>,
    pub order_line_id: Option<Uuid>,
    pub created_at: TimeDateTimeWithTimeZone,
    pub updated_at: TimeDateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::accounts::Entity",
        from = "Column::AccountId",
        to = "super::accounts::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Accounts,
    #[sea_orm(
        belongs_to = "super::order_lines::Entity",
        from = "Column::OrderLineId",
        to = "super::order_lines::Column::Id",
        on_update = "NoAction",
        on_delete = "SetNull"
    )]
    OrderLines,
    #[sea_orm(has_many = "super::credit_lot_consumptions::Entity")]
    CreditLotConsumptions,
}

impl Related<super::accounts::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Accounts.def()
    }
}

impl Related<super::order_lines::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderLines.def()
    }
}

impl Related<super::credit_lot_consumptions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CreditLotConsumptions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
