// Route modules
pub mod admin;
pub mod credits;
pub mod orders;
pub mod payments;

use crate::{
    app_state::AppState,
    middleware::{create_rate_limiter, jwt_auth_middleware, logging_middleware, require_admin},
};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_v1_routes(state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// API v1 routes
fn api_v1_routes(state: AppState) -> Router<AppState> {
    // Money-moving routes: authentication plus rate limiting
    let rate_limiter = create_rate_limiter(
        state.redis.clone(),
        state.config.rate_limit.clone(),
        "payments",
    );
    let payment_routes = Router::new()
        .route("/payments/confirm", post(payments::confirm_payment))
        .route("/orders", post(orders::prepare_order))
        .route("/orders/{order_id}/refund", post(orders::refund_order))
        .route_layer(middleware::from_fn(rate_limiter))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            jwt_auth_middleware,
        ));

    // Auth-only routes (no rate limiting, require JWT)
    let auth_only_routes = Router::new()
        .route("/credits/balance", get(credits::get_credit_balance))
        .route("/credits/ledger", get(credits::list_ledger))
        .route("/payments/events", get(payments::payment_events))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            jwt_auth_middleware,
        ));

    // Admin routes; the role check runs after authentication
    let admin_routes = Router::new()
        .route("/admin/credits/adjust", post(admin::adjust_credit))
        .route(
            "/admin/credits/{user_id}/reconcile",
            get(admin::reconcile_wallet),
        )
        .route_layer(middleware::from_fn(require_admin))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            jwt_auth_middleware,
        ));

    // Combine all routes with request/response body logging
    Router::new()
        .merge(payment_routes)
        .merge(auth_only_routes)
        .merge(admin_routes)
        .layer(middleware::from_fn(logging_middleware))
}
