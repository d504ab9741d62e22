//! `SeaORM` Entity, coupon definition shared by its instances

use super::sea_orm_active_enums::DiscountType;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub discount_type: DiscountType,
    /// Percent (0-100) for PERCENTAGE, flat amount for FIXED
    pub discount_value: i64,
    pub max_discount: Option<i64>,
    pub min_order_amount: i64,
    pub valid_from: Option<TimeDateTimeWithTimeZone>,
    pub valid_until: Option<TimeDateTimeWithTimeZone>,
    pub active: bool,
    pub created_at: TimeDateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::coupon_instances::Entity")]
    CouponInstances,
}

impl Related<super::coupon_instances::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CouponInstances.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
