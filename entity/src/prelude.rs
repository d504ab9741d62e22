pub use super::accounts::Entity as Accounts;
pub use super::balances::Entity as Balances;
pub use super::catalog_prices::Entity as CatalogPrices;
pub use super::coupon_instances::Entity as CouponInstances;
pub use super::coupons::Entity as Coupons;
pub use super::credit_lot_consumptions::Entity as CreditLotConsumptions;
pub use super::credit_lots::Entity as CreditLots;
pub use super::daily_limit_aggregates::Entity as DailyLimitAggregates;
pub use super::idempotency_records::Entity as IdempotencyRecords;
pub use super::ledger_entries::Entity as LedgerEntries;
pub use super::order_lines::Entity as OrderLines;
pub use super::orders::Entity as Orders;
pub use super::payments::Entity as Payments;
