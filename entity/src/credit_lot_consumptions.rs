//! `SeaORM` Entity, which lots a debit drew from

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "credit_lot_consumptions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub lot_id: Uuid,
    pub ledger_entry_id: Uuid,
    pub order_id: Option<Uuid>,
    pub amount: i64,
    pub created_at: TimeDateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::credit_lots::Entity",
        from = "Column::LotId",
        to = "super::credit_lots::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    CreditLots,
    #[sea_orm(
        belongs_to = "super::ledger_entries::Entity",
        from = "Column::LedgerEntryId",
        to = "super::ledger_entries::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    LedgerEntries,
}

impl Related<super::credit_lots::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CreditLots.def()
    }
}

impl Related<super::ledger_entries::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LedgerEntries.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
