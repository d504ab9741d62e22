//! `SeaORM` Entity

use super::sea_orm_active_enums::{ItemType, OrderLineStatus};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_lines")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    pub line_no: i32,
    pub item_type: ItemType,
    /// Exactly one of course_id / section_id / package_id is set, matching item_type
    pub course_id: Option<Uuid>,
    pub section_id: Option<Uuid>,
    pub package_id: Option<String>,
    pub title: String,
    pub quantity: i32,
    pub unit_price: i64,
    pub original_amount: i64,
    pub discount_amount: i64,
    pub final_amount: i64,
    pub coupon_instance_id: Option<Uuid>,
    pub status: OrderLineStatus,
    pub created_at: TimeDateTimeWithTimeZone,
    pub updated_at: TimeDateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::orders::Entity",
        from = "Column::OrderId",
        to = "super::orders::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Orders,
    #[sea_orm(has_many = "super::credit_lots::Entity")]
    CreditLots,
}

impl Related<super::orders::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Orders.def()
    }
}

impl Related<super::credit_lots::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CreditLots.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
