// Integration tests: every module runs the real migrations on in-memory SQLite

mod common;

mod coupon_test;
mod http_test;
mod payment_test;
mod refund_test;
mod wallet_test;
