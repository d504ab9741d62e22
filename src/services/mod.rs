// Service modules
pub mod catalog_service;
pub mod coupon_service;
pub mod credit_lot_service;
pub mod credits_service;
pub mod daily_limit_service;
pub mod event_service;
pub mod gateway_service;
pub mod idempotency_service;
pub mod jwt_service;
pub mod ledger_service;
pub mod order_service;
pub mod payment_service;

pub use catalog_service::{CatalogLookup, DbCatalog, PricedItem};
pub use coupon_service::CouponService;
pub use credit_lot_service::CreditLotService;
pub use credits_service::CreditsService;
pub use daily_limit_service::DailyLimitService;
pub use event_service::{EventHub, EventSubscription, PaymentEventPublisher, PublishError};
pub use gateway_service::{GatewayError, HttpPaymentGateway, PaymentGateway};
pub use idempotency_service::{IdempotencyDecision, IdempotencyService};
pub use jwt_service::JWTService;
pub use ledger_service::LedgerService;
pub use order_service::OrderService;
pub use payment_service::PaymentService;
