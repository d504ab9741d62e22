use entity::sea_orm_active_enums::{ItemType, PaymentType};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;
use validator::Validate;

/// One purchasable item in a confirmation or preparation request.
/// Prices are never taken from the client; the catalog resolves them.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemRequest {
    pub item_type: ItemType,
    /// Course/section UUID, or the configured package id for CREDIT_PACKAGE
    #[validate(length(min = 1, max = 64))]
    pub item_id: String,
    #[serde(default = "default_quantity")]
    #[validate(range(min = 1, max = 100))]
    pub quantity: i32,
}

fn default_quantity() -> i32 {
    1
}

/// Payment confirmation request, sent after the client-side checkout
/// hands back a gateway payment token
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentRequest {
    /// Gateway payment token, doubles as the idempotency key
    #[validate(length(min = 1, max = 200))]
    pub payment_key: String,
    #[validate(length(min = 1, max = 64))]
    pub order_number: String,
    /// Cash amount the gateway is asked to capture
    #[validate(range(min = 0))]
    pub amount: i64,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub credit_amount: i64,
    #[serde(default)]
    pub coupon_instance_id: Option<Uuid>,
    /// May be empty when `order_number` names a prepared order
    #[serde(default)]
    #[validate(nested)]
    pub items: Vec<OrderItemRequest>,
}

impl ConfirmPaymentRequest {
    /// SHA-256 over the normalized request. Item order does not matter.
    pub fn fingerprint(&self) -> String {
        let mut items: Vec<String> = self
            .items
            .iter()
            .map(|item| format!("{:?}:{}:{}", item.item_type, item.item_id, item.quantity))
            .collect();
        items.sort();

        let coupon = self
            .coupon_instance_id
            .map(|id| id.to_string())
            .unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(self.order_number.as_bytes());
        hasher.update(b"|");
        hasher.update(self.amount.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(self.credit_amount.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(coupon.as_bytes());
        hasher.update(b"|");
        hasher.update(items.join(",").as_bytes());

        format!("{:x}", hasher.finalize())
    }
}

/// Result of a confirmation; also the cached idempotency response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationResult {
    pub success: bool,
    pub order_id: Uuid,
    pub order_number: String,
    /// Final amount after discount (cash + credit)
    pub amount: i64,
    pub cash_amount: i64,
    pub credit_amount: i64,
    pub discount_amount: i64,
    pub payment_method: String,
    pub payment_type: PaymentType,
    #[serde(with = "time::serde::rfc3339")]
    pub paid_at: OffsetDateTime,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PrepareOrderRequest {
    #[validate(length(min = 1, max = 50), nested)]
    pub items: Vec<OrderItemRequest>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineInfo {
    pub line_no: i32,
    pub item_type: ItemType,
    pub item_id: String,
    pub title: String,
    pub quantity: i32,
    pub unit_price: i64,
    pub original_amount: i64,
    pub discount_amount: i64,
    pub final_amount: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderInfo {
    pub order_id: Uuid,
    pub order_number: String,
    pub status: entity::sea_orm_active_enums::OrderStatus,
    pub total_amount: i64,
    pub discount_amount: i64,
    pub final_amount: i64,
    pub lines: Vec<OrderLineInfo>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RefundOrderRequest {
    #[validate(length(max = 200))]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundResult {
    pub order_id: Uuid,
    pub cash_refunded: i64,
    pub credit_restored: i64,
    /// Package credit taken back from the wallet
    pub credit_revoked: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub refunded_at: OffsetDateTime,
}
