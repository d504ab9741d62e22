//! Rate limiting middleware using Redis
//!
//! Sliding window counter per user and route scope. Admins get a larger budget.

use crate::{
    config::RateLimitConfig,
    error::{ApiError, Result},
    middleware::jwt_auth::UserIdentity,
    models::common::UserRole,
};
use axum::{extract::Request, middleware::Next, response::Response};
use redis::{AsyncCommands, Client};
use std::{future::Future, pin::Pin, sync::Arc};
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

type MiddlewareFuture = Pin<Box<dyn Future<Output = Result<Response>> + Send>>;

/// Rate limiting middleware
///
/// Returns 429 Too Many Requests when the caller's window is full.
pub fn rate_limit_middleware(
    redis_client: Arc<Client>,
    config: RateLimitConfig,
    scope: &'static str,
) -> impl Fn(Request, Next) -> MiddlewareFuture + Clone {
    move |request: Request, next: Next| {
        let redis_client = redis_client.clone();
        let config = config.clone();

        Box::pin(async move {
            let identity = request.extensions().get::<UserIdentity>().ok_or_else(|| {
                ApiError::Internal(anyhow::anyhow!(
                    "Rate limit middleware requires jwt_auth_middleware"
                ))
            })?;

            let limit = match identity.role {
                UserRole::User => config.user_rpm,
                UserRole::Admin => config.admin_rpm,
            };

            let key = format!("rate_limit:{}:user:{}", scope, identity.user_id);
            let allowed =
                check_rate_limit(&redis_client, &key, limit, config.window_seconds).await?;

            if !allowed {
                warn!(
                    "Rate limit exceeded for user: {} (scope: {}, role: {})",
                    identity.user_id,
                    scope,
                    identity.role.as_str()
                );
                return Err(ApiError::RateLimitExceeded);
            }

            debug!(
                "Rate limit check passed for user: {} (scope: {})",
                identity.user_id, scope
            );

            Ok(next.run(request).await)
        })
    }
}

/// Returns true if the request fits in the current window
async fn check_rate_limit(
    redis_client: &Client,
    key: &str,
    limit: u32,
    window_seconds: u32,
) -> Result<bool> {
    let mut conn = redis_client
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("Redis connection failed: {}", e)))?;

    let now = OffsetDateTime::now_utc().unix_timestamp();
    let window_start = now - i64::from(window_seconds);

    // Sorted set scored by timestamp; drop entries that left the window
    let _: () = conn
        .zrembyscore(key, 0, window_start as f64)
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("Redis ZREMRANGEBYSCORE failed: {}", e)))?;

    let count: u32 = conn
        .zcard(key)
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("Redis ZCARD failed: {}", e)))?;

    if count >= limit {
        return Ok(false);
    }

    let member = format!("{}:{}", now, Uuid::new_v4());
    let _: () = conn
        .zadd(key, member, now as f64)
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("Redis ZADD failed: {}", e)))?;

    let _: () = conn
        .expire(key, i64::from(window_seconds) + 10)
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("Redis EXPIRE failed: {}", e)))?;

    Ok(true)
}

/// Rate limiter for one route scope, e.g. "payments"
pub fn create_rate_limiter(
    redis_client: Arc<Client>,
    config: RateLimitConfig,
    scope: &'static str,
) -> impl Fn(Request, Next) -> MiddlewareFuture + Clone {
    rate_limit_middleware(redis_client, config, scope)
}
