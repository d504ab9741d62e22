// Request/Response models
pub mod common;
pub mod coupon_ext; // Discount rules on entity::coupons
pub mod credit_lot_ext; // Spendability rules on entity::credit_lots
pub mod credits;
pub mod events;
pub mod payment;
