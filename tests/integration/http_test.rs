use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use cookiepay::{app_state::AppState, models::common::UserRole, routes::create_router};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use crate::common::{setup_test_db, test_config, FakeGateway};

struct TestServer {
    router: Router,
    state: AppState,
}

impl TestServer {
    async fn new() -> Self {
        let config = test_config();
        let redis = Arc::new(redis::Client::open(config.redis.url.as_str()).unwrap());
        let state = AppState::from_parts(
            setup_test_db().await,
            redis,
            config,
            Arc::new(FakeGateway::default()),
        );
        Self {
            router: create_router(state.clone()),
            state,
        }
    }

    fn token(&self, user_id: Uuid, role: UserRole) -> String {
        self.state.jwt_service.generate_token(user_id, role).unwrap()
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

fn post_json(uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let server = TestServer::new().await;

    let (status, body) = server.send(get("/api/v1/credits/balance", None)).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"]["code"], json!("UNAUTHORIZED"));
}

#[tokio::test]
async fn test_garbage_token_is_rejected() {
    let server = TestServer::new().await;

    let (status, body) = server
        .send(get("/api/v1/credits/balance", Some("not-a-jwt")))
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], json!("INVALID_TOKEN"));
}

#[tokio::test]
async fn test_balance_of_new_user_is_zero() {
    let server = TestServer::new().await;
    let user_id = Uuid::new_v4();
    let token = server.token(user_id, UserRole::User);

    let (status, body) = server
        .send(get("/api/v1/credits/balance", Some(&token)))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["userId"], json!(user_id.to_string()));
    assert_eq!(body["data"]["amount"], json!(0));
}

#[tokio::test]
async fn test_ledger_limit_is_validated() {
    let server = TestServer::new().await;
    let token = server.token(Uuid::new_v4(), UserRole::User);

    let (status, body) = server
        .send(get("/api/v1/credits/ledger?limit=0", Some(&token)))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("BAD_REQUEST"));
}

#[tokio::test]
async fn test_admin_routes_require_admin_role() {
    let server = TestServer::new().await;
    let token = server.token(Uuid::new_v4(), UserRole::User);

    let (status, body) = server
        .send(post_json(
            "/api/v1/admin/credits/adjust",
            &token,
            json!({ "targetUserId": Uuid::new_v4(), "amount": 100, "reason": "gift" }),
        ))
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], json!("FORBIDDEN"));
}

#[tokio::test]
async fn test_admin_adjust_then_reconcile() {
    let server = TestServer::new().await;
    let admin = server.token(Uuid::new_v4(), UserRole::Admin);
    let target = Uuid::new_v4();

    let (status, body) = server
        .send(post_json(
            "/api/v1/admin/credits/adjust",
            &admin,
            json!({ "targetUserId": target, "amount": 250, "reason": "welcome" }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["balanceAfter"], json!(250));

    let (status, body) = server
        .send(get(
            &format!("/api/v1/admin/credits/{}/reconcile", target),
            Some(&admin),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["consistent"], json!(true));
    assert_eq!(body["data"]["ledgerSum"], json!(250));

    let user_token = server.token(target, UserRole::User);
    let (_, body) = server
        .send(get("/api/v1/credits/ledger", Some(&user_token)))
        .await;
    assert_eq!(body["data"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(body["data"][0]["entryType"], json!("ADMIN_ADJUST"));
}
