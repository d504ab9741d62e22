use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // One account per user, created lazily
        manager
            .create_table(
                Table::create()
                    .table(Accounts::Table)
                    .if_not_exists()
                    .col(pk_uuid(Accounts::Id))
                    .col(uuid(Accounts::UserId).not_null())
                    .col(
                        timestamp_with_time_zone(Accounts::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_accounts_user_id")
                    .table(Accounts::Table)
                    .col(Accounts::UserId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Balances::Table)
                    .if_not_exists()
                    .col(pk_uuid(Balances::Id))
                    .col(uuid(Balances::AccountId).not_null())
                    .col(string_len(Balances::Unit, 16).not_null())
                    .col(big_integer(Balances::Amount).not_null().default(0))
                    .col(big_integer(Balances::FrozenAmount).not_null().default(0))
                    .col(
                        timestamp_with_time_zone(Balances::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .col(
                        timestamp_with_time_zone(Balances::UpdatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_balances_account_id")
                            .from(Balances::Table, Balances::AccountId)
                            .to(Accounts::Table, Accounts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // At most one balance per (account, unit)
        manager
            .create_index(
                Index::create()
                    .name("idx_balances_account_unit")
                    .table(Balances::Table)
                    .col(Balances::AccountId)
                    .col(Balances::Unit)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Append-only audit trail
        manager
            .create_table(
                Table::create()
                    .table(LedgerEntries::Table)
                    .if_not_exists()
                    .col(pk_uuid(LedgerEntries::Id))
                    .col(uuid(LedgerEntries::AccountId).not_null())
                    .col(string_len(LedgerEntries::EntryType, 16).not_null())
                    .col(big_integer(LedgerEntries::Amount).not_null())
                    .col(big_integer(LedgerEntries::BalanceAfter).not_null())
                    .col(text(LedgerEntries::Note).not_null())
                    .col(string_len_null(LedgerEntries::ReferenceType, 32))
                    .col(uuid_null(LedgerEntries::ReferenceId))
                    .col(
                        timestamp_with_time_zone(LedgerEntries::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_ledger_entries_account_id")
                            .from(LedgerEntries::Table, LedgerEntries::AccountId)
                            .to(Accounts::Table, Accounts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_ledger_entries_account_created")
                    .table(LedgerEntries::Table)
                    .col(LedgerEntries::AccountId)
                    .col(LedgerEntries::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_ledger_entries_reference")
                    .table(LedgerEntries::Table)
                    .col(LedgerEntries::ReferenceType)
                    .col(LedgerEntries::ReferenceId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CreditLots::Table)
                    .if_not_exists()
                    .col(pk_uuid(CreditLots::Id))
                    .col(uuid(CreditLots::AccountId).not_null())
                    .col(string_len(CreditLots::LotType, 16).not_null())
                    .col(string_len(CreditLots::Source, 16).not_null())
                    .col(big_integer(CreditLots::QtyTotal).not_null())
                    .col(big_integer(CreditLots::QtyRemain).not_null())
                    .col(timestamp_with_time_zone_null(CreditLots::ExpiresAt))
                    .col(uuid_null(CreditLots::OrderLineId))
                    .col(
                        timestamp_with_time_zone(CreditLots::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .col(
                        timestamp_with_time_zone(CreditLots::UpdatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .check(Expr::col(CreditLots::QtyRemain).gte(0))
                    .check(Expr::col(CreditLots::QtyRemain).lte(Expr::col(CreditLots::QtyTotal)))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_credit_lots_account_id")
                            .from(CreditLots::Table, CreditLots::AccountId)
                            .to(Accounts::Table, Accounts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_credit_lots_order_line_id")
                            .from(CreditLots::Table, CreditLots::OrderLineId)
                            .to(OrderLines::Table, OrderLines::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_credit_lots_account_remaining")
                    .table(CreditLots::Table)
                    .col(CreditLots::AccountId)
                    .col(CreditLots::QtyRemain)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_credit_lots_order_line_id")
                    .table(CreditLots::Table)
                    .col(CreditLots::OrderLineId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CreditLotConsumptions::Table)
                    .if_not_exists()
                    .col(pk_uuid(CreditLotConsumptions::Id))
                    .col(uuid(CreditLotConsumptions::LotId).not_null())
                    .col(uuid(CreditLotConsumptions::LedgerEntryId).not_null())
                    .col(uuid_null(CreditLotConsumptions::OrderId))
                    .col(big_integer(CreditLotConsumptions::Amount).not_null())
                    .col(
                        timestamp_with_time_zone(CreditLotConsumptions::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_credit_lot_consumptions_lot_id")
                            .from(CreditLotConsumptions::Table, CreditLotConsumptions::LotId)
                            .to(CreditLots::Table, CreditLots::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_credit_lot_consumptions_ledger_entry_id")
                            .from(
                                CreditLotConsumptions::Table,
                                CreditLotConsumptions::LedgerEntryId,
                            )
                            .to(LedgerEntries::Table, LedgerEntries::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_credit_lot_consumptions_order_id")
                    .table(CreditLotConsumptions::Table)
                    .col(CreditLotConsumptions::OrderId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CreditLotConsumptions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CreditLots::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(LedgerEntries::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Balances::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Accounts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Accounts {
    Table,
    Id,
    UserId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Balances {
    Table,
    Id,
    AccountId,
    Unit,
    Amount,
    FrozenAmount,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum LedgerEntries {
    Table,
    Id,
    AccountId,
    EntryType,
    Amount,
    BalanceAfter,
    Note,
    ReferenceType,
    ReferenceId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum CreditLots {
    Table,
    Id,
    AccountId,
    LotType,
    Source,
    QtyTotal,
    QtyRemain,
    ExpiresAt,
    OrderLineId,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum CreditLotConsumptions {
    Table,
    Id,
    LotId,
    LedgerEntryId,
    OrderId,
    Amount,
    CreatedAt,
}

#[derive(DeriveIden)]
enum OrderLines {
    Table,
    Id,
}
