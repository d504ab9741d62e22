use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(IdempotencyRecords::Table)
                    .if_not_exists()
                    .col(pk_uuid(IdempotencyRecords::Id))
                    .col(string_len(IdempotencyRecords::IdemKey, 200).not_null())
                    .col(uuid(IdempotencyRecords::UserId).not_null())
                    .col(string_len(IdempotencyRecords::Status, 16).not_null())
                    .col(string_len(IdempotencyRecords::RequestFingerprint, 64).not_null())
                    .col(text_null(IdempotencyRecords::ResponseSnapshot))
                    .col(text_null(IdempotencyRecords::ErrorSnapshot))
                    .col(timestamp_with_time_zone(IdempotencyRecords::LockedAt).not_null())
                    .col(timestamp_with_time_zone(IdempotencyRecords::ExpiresAt).not_null())
                    .col(
                        timestamp_with_time_zone(IdempotencyRecords::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .col(
                        timestamp_with_time_zone(IdempotencyRecords::UpdatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // The uniqueness constraint decides which concurrent attempt owns a key
        manager
            .create_index(
                Index::create()
                    .name("idx_idempotency_records_key")
                    .table(IdempotencyRecords::Table)
                    .col(IdempotencyRecords::IdemKey)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_idempotency_records_expires_at")
                    .table(IdempotencyRecords::Table)
                    .col(IdempotencyRecords::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(DailyLimitAggregates::Table)
                    .if_not_exists()
                    .col(pk_uuid(DailyLimitAggregates::Id))
                    .col(uuid(DailyLimitAggregates::UserId).not_null())
                    .col(date(DailyLimitAggregates::SpendDate).not_null())
                    .col(big_integer(DailyLimitAggregates::CashTotal).not_null().default(0))
                    .col(big_integer(DailyLimitAggregates::CreditTotal).not_null().default(0))
                    .col(
                        timestamp_with_time_zone(DailyLimitAggregates::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .col(
                        timestamp_with_time_zone(DailyLimitAggregates::UpdatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_daily_limit_aggregates_user_date")
                    .table(DailyLimitAggregates::Table)
                    .col(DailyLimitAggregates::UserId)
                    .col(DailyLimitAggregates::SpendDate)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DailyLimitAggregates::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(IdempotencyRecords::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum IdempotencyRecords {
    Table,
    Id,
    IdemKey,
    UserId,
    Status,
    RequestFingerprint,
    ResponseSnapshot,
    ErrorSnapshot,
    LockedAt,
    ExpiresAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum DailyLimitAggregates {
    Table,
    Id,
    UserId,
    SpendDate,
    CashTotal,
    CreditTotal,
    CreatedAt,
    UpdatedAt,
}
