pub use sea_orm_migration::prelude::*;

mod m20250301_000001_create_order_tables;
mod m20250301_000002_create_wallet_tables;
mod m20250301_000003_create_coupon_tables;
mod m20250301_000004_create_idempotency_and_limits;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_order_tables::Migration),
            Box::new(m20250301_000002_create_wallet_tables::Migration),
            Box::new(m20250301_000003_create_coupon_tables::Migration),
            Box::new(m20250301_000004_create_idempotency_and_limits::Migration),
        ]
    }
}
