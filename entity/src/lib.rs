//! `SeaORM` entities for the cookie wallet and payment tables

pub mod prelude;

pub mod accounts;
pub mod balances;
pub mod catalog_prices;
pub mod coupon_instances;
pub mod coupons;
pub mod credit_lot_consumptions;
pub mod credit_lots;
pub mod daily_limit_aggregates;
pub mod idempotency_records;
pub mod ledger_entries;
pub mod order_lines;
pub mod orders;
pub mod payments;
pub mod sea_orm_active_enums;
