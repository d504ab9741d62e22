use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Coupons::Table)
                    .if_not_exists()
                    .col(pk_uuid(Coupons::Id))
                    .col(string(Coupons::Name).not_null())
                    .col(string_len(Coupons::DiscountType, 16).not_null())
                    .col(big_integer(Coupons::DiscountValue).not_null())
                    .col(big_integer_null(Coupons::MaxDiscount))
                    .col(big_integer(Coupons::MinOrderAmount).not_null().default(0))
                    .col(timestamp_with_time_zone_null(Coupons::ValidFrom))
                    .col(timestamp_with_time_zone_null(Coupons::ValidUntil))
                    .col(boolean(Coupons::Active).default(true).not_null())
                    .col(
                        timestamp_with_time_zone(Coupons::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CouponInstances::Table)
                    .if_not_exists()
                    .col(pk_uuid(CouponInstances::Id))
                    .col(uuid(CouponInstances::CouponId).not_null())
                    .col(uuid(CouponInstances::UserId).not_null())
                    .col(
                        string_len(CouponInstances::Status, 16)
                            .not_null()
                            .default("AVAILABLE"),
                    )
                    .col(string_len_null(CouponInstances::ReservedOrderNumber, 64))
                    .col(timestamp_with_time_zone_null(CouponInstances::ReservedAt))
                    .col(timestamp_with_time_zone_null(CouponInstances::UsedAt))
                    .col(
                        timestamp_with_time_zone(CouponInstances::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .col(
                        timestamp_with_time_zone(CouponInstances::UpdatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_coupon_instances_coupon_id")
                            .from(CouponInstances::Table, CouponInstances::CouponId)
                            .to(Coupons::Table, Coupons::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_coupon_instances_user_status")
                    .table(CouponInstances::Table)
                    .col(CouponInstances::UserId)
                    .col(CouponInstances::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CouponInstances::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Coupons::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Coupons {
    Table,
    Id,
    Name,
    DiscountType,
    DiscountValue,
    MaxDiscount,
    MinOrderAmount,
    ValidFrom,
    ValidUntil,
    Active,
    CreatedAt,
}

#[derive(DeriveIden)]
enum CouponInstances {
    Table,
    Id,
    CouponId,
    UserId,
    Status,
    ReservedOrderNumber,
    ReservedAt,
    UsedAt,
    CreatedAt,
    UpdatedAt,
}
