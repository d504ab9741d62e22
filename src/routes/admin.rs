use axum::{
    extract::{Path, State},
    Json,
};
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    app_state::AppState,
    error::{ApiError, Result},
    middleware::UserIdentity,
    models::{
        common::SuccessResponse,
        credits::{AdminAdjustRequest, AdminAdjustResult, WalletReconciliation},
    },
};

/// POST /api/v1/admin/credits/adjust
#[instrument(skip(state, identity, request), fields(admin_id = %identity.user_id))]
pub async fn adjust_credit(
    State(state): State<AppState>,
    identity: UserIdentity,
    Json(request): Json<AdminAdjustRequest>,
) -> Result<Json<SuccessResponse<AdminAdjustResult>>> {
    request
        .validate()
        .map_err(|e| ApiError::BadRequest(format!("Validation error: {}", e)))?;

    let result = state
        .credits_service
        .admin_adjust(
            request.target_user_id,
            request.amount,
            identity.user_id,
            &request.reason,
        )
        .await?;

    info!(
        "Admin {} adjusted credits of {} by {}",
        identity.user_id, result.target_user_id, result.amount
    );

    Ok(Json(SuccessResponse::new(result)))
}

/// GET /api/v1/admin/credits/{user_id}/reconcile
#[instrument(skip(state, _identity))]
pub async fn reconcile_wallet(
    State(state): State<AppState>,
    _identity: UserIdentity,
    Path(user_id): Path<Uuid>,
) -> Result<Json<SuccessResponse<WalletReconciliation>>> {
    let report = state.credits_service.reconcile(user_id).await?;
    Ok(Json(SuccessResponse::new(report)))
}
