use crate::config::GatewayConfig;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Payment declined: {code} {message}")]
    Declined { code: String, message: String },

    #[error("Gateway request timed out")]
    Timeout,

    #[error("Gateway transport error: {0}")]
    Transport(String),

    #[error("Unexpected gateway response: {0}")]
    InvalidResponse(String),
}

/// Approval returned by the gateway for a confirmed payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayApproval {
    pub status: String,
    pub method: String,
    pub approved_at: OffsetDateTime,
    pub total_amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayCancellation {
    pub cancelled_amount: i64,
    pub cancelled_at: OffsetDateTime,
}

/// External card/transfer payment gateway
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn confirm(
        &self,
        payment_key: &str,
        order_number: &str,
        amount: i64,
    ) -> Result<GatewayApproval, GatewayError>;

    async fn cancel(
        &self,
        payment_key: &str,
        reason: &str,
        amount: i64,
    ) -> Result<GatewayCancellation, GatewayError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmBody<'a> {
    payment_key: &'a str,
    order_id: &'a str,
    amount: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CancelBody<'a> {
    cancel_reason: &'a str,
    cancel_amount: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentResponse {
    status: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    approved_at: Option<OffsetDateTime>,
    total_amount: i64,
    #[serde(default)]
    balance_amount: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct GatewayFailure {
    code: String,
    message: String,
}

/// HTTP client for the payment gateway's confirm/cancel API.
/// Authenticates with the secret key as the basic-auth user name.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    auth_header: String,
}

impl HttpPaymentGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let auth_header = format!("Basic {}", STANDARD.encode(format!("{}:", config.secret_key)));

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_header,
        })
    }

    async fn send<B: Serialize>(&self, url: String, body: &B) -> Result<PaymentResponse, GatewayError> {
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, &self.auth_header)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout
                } else {
                    GatewayError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let failure = response
                .json::<GatewayFailure>()
                .await
                .unwrap_or_else(|e| GatewayFailure {
                    code: status.as_u16().to_string(),
                    message: e.to_string(),
                });
            warn!("Gateway rejected request to {}: {} {}", url, failure.code, failure.message);
            return Err(GatewayError::Declined {
                code: failure.code,
                message: failure.message,
            });
        }

        response
            .json::<PaymentResponse>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self))]
    async fn confirm(
        &self,
        payment_key: &str,
        order_number: &str,
        amount: i64,
    ) -> Result<GatewayApproval, GatewayError> {
        let url = format!("{}/v1/payments/confirm", self.base_url);
        let body = ConfirmBody {
            payment_key,
            order_id: order_number,
            amount,
        };

        let response = self.send(url, &body).await?;
        if response.status != "DONE" {
            return Err(GatewayError::Declined {
                code: response.status,
                message: "Payment was not approved".to_string(),
            });
        }

        info!(
            "Gateway approved payment {} for order {}: amount={}",
            payment_key, order_number, response.total_amount
        );

        Ok(GatewayApproval {
            status: response.status,
            method: response.method.unwrap_or_else(|| "UNKNOWN".to_string()),
            approved_at: response.approved_at.unwrap_or_else(OffsetDateTime::now_utc),
            total_amount: response.total_amount,
        })
    }

    #[instrument(skip(self))]
    async fn cancel(
        &self,
        payment_key: &str,
        reason: &str,
        amount: i64,
    ) -> Result<GatewayCancellation, GatewayError> {
        let url = format!("{}/v1/payments/{}/cancel", self.base_url, payment_key);
        let body = CancelBody {
            cancel_reason: reason,
            cancel_amount: amount,
        };

        let response = self.send(url, &body).await?;
        let cancelled_amount = response.total_amount - response.balance_amount.unwrap_or(0);

        info!(
            "Gateway cancelled payment {}: amount={}, status={}",
            payment_key, cancelled_amount, response.status
        );

        Ok(GatewayCancellation {
            cancelled_amount,
            cancelled_at: OffsetDateTime::now_utc(),
        })
    }
}
