use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Orders (status/payment_type stored as short strings)
        manager
            .create_table(
                Table::create()
                    .table(Orders::Table)
                    .if_not_exists()
                    .col(pk_uuid(Orders::Id))
                    .col(string_len(Orders::OrderNumber, 64).not_null())
                    .col(uuid(Orders::UserId).not_null())
                    .col(string_len(Orders::Status, 16).not_null().default("PENDING"))
                    .col(big_integer(Orders::TotalAmount).not_null().default(0))
                    .col(big_integer(Orders::DiscountAmount).not_null().default(0))
                    .col(big_integer(Orders::FinalAmount).not_null().default(0))
                    .col(big_integer(Orders::CreditSpent).not_null().default(0))
                    .col(big_integer(Orders::CashAmount).not_null().default(0))
                    .col(string_len_null(Orders::PaymentType, 16))
                    .col(string_len_null(Orders::IdempotencyKey, 200))
                    .col(uuid_null(Orders::CouponInstanceId))
                    .col(timestamp_with_time_zone_null(Orders::PaidAt))
                    .col(
                        timestamp_with_time_zone(Orders::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .col(
                        timestamp_with_time_zone(Orders::UpdatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_orders_order_number")
                    .table(Orders::Table)
                    .col(Orders::OrderNumber)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_orders_user_id")
                    .table(Orders::Table)
                    .col(Orders::UserId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(OrderLines::Table)
                    .if_not_exists()
                    .col(pk_uuid(OrderLines::Id))
                    .col(uuid(OrderLines::OrderId).not_null())
                    .col(integer(OrderLines::LineNo).not_null())
                    .col(string_len(OrderLines::ItemType, 16).not_null())
                    .col(uuid_null(OrderLines::CourseId))
                    .col(uuid_null(OrderLines::SectionId))
                    .col(string_len_null(OrderLines::PackageId, 64))
                    .col(string(OrderLines::Title).not_null())
                    .col(integer(OrderLines::Quantity).not_null().default(1))
                    .col(big_integer(OrderLines::UnitPrice).not_null())
                    .col(big_integer(OrderLines::OriginalAmount).not_null())
                    .col(big_integer(OrderLines::DiscountAmount).not_null().default(0))
                    .col(big_integer(OrderLines::FinalAmount).not_null())
                    .col(uuid_null(OrderLines::CouponInstanceId))
                    .col(string_len(OrderLines::Status, 16).not_null().default("PENDING"))
                    .col(
                        timestamp_with_time_zone(OrderLines::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .col(
                        timestamp_with_time_zone(OrderLines::UpdatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_order_lines_order_id")
                            .from(OrderLines::Table, OrderLines::OrderId)
                            .to(Orders::Table, Orders::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_order_lines_order_id")
                    .table(OrderLines::Table)
                    .col(OrderLines::OrderId)
                    .to_owned(),
            )
            .await?;

        // Payments: one row per confirmation attempt, kept for audit
        manager
            .create_table(
                Table::create()
                    .table(Payments::Table)
                    .if_not_exists()
                    .col(pk_uuid(Payments::Id))
                    .col(uuid(Payments::OrderId).not_null())
                    .col(uuid(Payments::UserId).not_null())
                    .col(string_len(Payments::PaymentKey, 200).not_null())
                    .col(string_len(Payments::Method, 32).not_null())
                    .col(string_len(Payments::Status, 16).not_null())
                    .col(big_integer(Payments::CashAmount).not_null().default(0))
                    .col(big_integer(Payments::CreditAmount).not_null().default(0))
                    .col(text_null(Payments::FailureReason))
                    .col(timestamp_with_time_zone_null(Payments::ApprovedAt))
                    .col(
                        timestamp_with_time_zone(Payments::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .col(
                        timestamp_with_time_zone(Payments::UpdatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_payments_order_id")
                            .from(Payments::Table, Payments::OrderId)
                            .to(Orders::Table, Orders::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_payments_payment_key")
                    .table(Payments::Table)
                    .col(Payments::PaymentKey)
                    .to_owned(),
            )
            .await?;

        // Price view maintained by the catalog subsystem
        manager
            .create_table(
                Table::create()
                    .table(CatalogPrices::Table)
                    .if_not_exists()
                    .col(pk_uuid(CatalogPrices::Id))
                    .col(string_len(CatalogPrices::ItemType, 16).not_null())
                    .col(uuid(CatalogPrices::ItemId).not_null())
                    .col(string(CatalogPrices::Title).not_null())
                    .col(big_integer(CatalogPrices::Price).not_null())
                    .col(boolean(CatalogPrices::Active).default(true).not_null())
                    .col(
                        timestamp_with_time_zone(CatalogPrices::UpdatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_catalog_prices_item")
                    .table(CatalogPrices::Table)
                    .col(CatalogPrices::ItemType)
                    .col(CatalogPrices::ItemId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CatalogPrices::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Payments::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(OrderLines::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Orders::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Orders {
    Table,
    Id,
    OrderNumber,
    UserId,
    Status,
    TotalAmount,
    DiscountAmount,
    FinalAmount,
    CreditSpent,
    CashAmount,
    PaymentType,
    IdempotencyKey,
    CouponInstanceId,
    PaidAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum OrderLines {
    Table,
    Id,
    OrderId,
    LineNo,
    ItemType,
    CourseId,
    SectionId,
    PackageId,
    Title,
    Quantity,
    UnitPrice,
    OriginalAmount,
    DiscountAmount,
    FinalAmount,
    CouponInstanceId,
    Status,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Payments {
    Table,
    Id,
    OrderId,
    UserId,
    PaymentKey,
    Method,
    Status,
    CashAmount,
    CreditAmount,
    FailureReason,
    ApprovedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum CatalogPrices {
    Table,
    Id,
    ItemType,
    ItemId,
    Title,
    Price,
    Active,
    UpdatedAt,
}
