use std::{convert::Infallible, time::Duration};

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::{Stream, StreamExt};
use tracing::{debug, instrument};
use validator::Validate;

use crate::{
    app_state::AppState,
    error::{ApiError, Result},
    middleware::UserIdentity,
    models::{
        common::{ClientMeta, SuccessResponse},
        payment::{ConfirmPaymentRequest, ConfirmationResult},
    },
};

/// POST /api/v1/payments/confirm
#[instrument(skip(state, identity, meta, request), fields(user_id = %identity.user_id))]
pub async fn confirm_payment(
    State(state): State<AppState>,
    identity: UserIdentity,
    meta: ClientMeta,
    Json(request): Json<ConfirmPaymentRequest>,
) -> Result<Json<SuccessResponse<ConfirmationResult>>> {
    request
        .validate()
        .map_err(|e| ApiError::BadRequest(format!("Validation error: {}", e)))?;

    let result = state
        .payment_service
        .confirm_payment(request, identity.user_id, meta)
        .await?;

    Ok(Json(SuccessResponse::new(result)))
}

/// GET /api/v1/payments/events
///
/// Live stream of the caller's payment events. Lagged events are skipped.
#[instrument(skip(state, identity), fields(user_id = %identity.user_id))]
pub async fn payment_events(
    State(state): State<AppState>,
    identity: UserIdentity,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let subscription = state.event_hub.subscribe(identity.user_id);
    debug!("Opened payment event stream for user {}", identity.user_id);

    // The subscription unregisters itself when the client disconnects
    let stream = subscription.filter_map(|event| async move {
        let data = serde_json::to_string(&event).ok()?;
        Some(Ok(Event::default().event(event.name()).data(data)))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}
