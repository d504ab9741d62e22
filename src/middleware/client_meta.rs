use crate::{error::ApiError, models::common::ClientMeta};
use axum::{extract::FromRequestParts, http::request::Parts};

/// Caller address and agent, taken from proxy headers when present
impl<S> FromRequestParts<S> for ClientMeta
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string())
        };

        let ip = header("x-forwarded-for")
            .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()))
            .or_else(|| header("x-real-ip"));

        Ok(ClientMeta {
            ip,
            user_agent: header("user-agent"),
        })
    }
}
