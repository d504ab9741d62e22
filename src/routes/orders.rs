use axum::{
    extract::{Path, State},
    Json,
};
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use crate::{
    app_state::AppState,
    error::{ApiError, Result},
    middleware::UserIdentity,
    models::{
        common::SuccessResponse,
        payment::{OrderInfo, PrepareOrderRequest, RefundOrderRequest, RefundResult},
    },
};

/// POST /api/v1/orders
#[instrument(skip(state, identity, request), fields(user_id = %identity.user_id))]
pub async fn prepare_order(
    State(state): State<AppState>,
    identity: UserIdentity,
    Json(request): Json<PrepareOrderRequest>,
) -> Result<Json<SuccessResponse<OrderInfo>>> {
    request
        .validate()
        .map_err(|e| ApiError::BadRequest(format!("Validation error: {}", e)))?;

    let order = state
        .order_service
        .prepare_order(identity.user_id, &request.items)
        .await?;

    Ok(Json(SuccessResponse::new(order)))
}

/// POST /api/v1/orders/{order_id}/refund
#[instrument(skip(state, identity, request), fields(user_id = %identity.user_id))]
pub async fn refund_order(
    State(state): State<AppState>,
    identity: UserIdentity,
    Path(order_id): Path<Uuid>,
    request: Option<Json<RefundOrderRequest>>,
) -> Result<Json<SuccessResponse<RefundResult>>> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    request
        .validate()
        .map_err(|e| ApiError::BadRequest(format!("Validation error: {}", e)))?;

    let reason = request
        .reason
        .unwrap_or_else(|| "Customer requested refund".to_string());

    let result = state
        .payment_service
        .refund_order(order_id, identity.user_id, &reason)
        .await?;

    Ok(Json(SuccessResponse::new(result)))
}
