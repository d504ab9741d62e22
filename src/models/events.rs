use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Events published after a payment saga commits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentEvent {
    #[serde(rename_all = "camelCase")]
    PaymentCompleted {
        user_id: Uuid,
        order_id: Uuid,
        order_number: String,
        #[serde(with = "time::serde::rfc3339")]
        paid_at: OffsetDateTime,
    },
    #[serde(rename_all = "camelCase")]
    OrderRefunded {
        user_id: Uuid,
        order_id: Uuid,
        #[serde(with = "time::serde::rfc3339")]
        refunded_at: OffsetDateTime,
    },
}

impl PaymentEvent {
    pub fn user_id(&self) -> Uuid {
        match self {
            Self::PaymentCompleted { user_id, .. } | Self::OrderRefunded { user_id, .. } => *user_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::PaymentCompleted { .. } => "payment_completed",
            Self::OrderRefunded { .. } => "order_refunded",
        }
    }
}
