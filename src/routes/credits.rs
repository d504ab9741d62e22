use axum::{
    extract::{Query, State},
    Json,
};
use tracing::instrument;
use validator::Validate;

use crate::{
    app_state::AppState,
    error::{ApiError, Result},
    middleware::UserIdentity,
    models::{
        common::SuccessResponse,
        credits::{CreditBalanceResponse, LedgerEntryInfo, LedgerQuery},
    },
};

const DEFAULT_LEDGER_LIMIT: u64 = 50;

/// GET /api/v1/credits/balance
#[instrument(skip(state, identity))]
pub async fn get_credit_balance(
    State(state): State<AppState>,
    identity: UserIdentity,
) -> Result<Json<CreditBalanceResponse>> {
    let balance = state
        .credits_service
        .get_credit_balance(identity.user_id)
        .await?;

    Ok(Json(SuccessResponse::new(balance)))
}

/// GET /api/v1/credits/ledger
#[instrument(skip(state, identity))]
pub async fn list_ledger(
    State(state): State<AppState>,
    identity: UserIdentity,
    Query(query): Query<LedgerQuery>,
) -> Result<Json<SuccessResponse<Vec<LedgerEntryInfo>>>> {
    query
        .validate()
        .map_err(|e| ApiError::BadRequest(format!("Validation error: {}", e)))?;

    let entries = state
        .credits_service
        .list_ledger(identity.user_id, query.limit.unwrap_or(DEFAULT_LEDGER_LIMIT))
        .await?;

    Ok(Json(SuccessResponse::new(entries)))
}
