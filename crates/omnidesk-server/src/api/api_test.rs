use std::net::SocketAddr;

use axum::body::{to_bytes, Body};
use axum::http::{Request, Response};
use axum::response::IntoResponse;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tower::ServiceExt;

use omnidesk_core::{Environment, QueueSettings};

use super::*;
use crate::mailer::LogMailer;

fn test_config() -> AppConfig {
    AppConfig {
        database_url: "postgres://unused".to_string(),
        env: Environment::Test,
        bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        log_level: "warn".to_string(),
        jwt_secret: "test-secret".to_string(),
        jwt_ttl_hours: 1,
        db_max_connections: 2,
        db_min_connections: 0,
        db_acquire_timeout_secs: 5,
        http_timeout_secs: 5,
        http_max_retries: 0,
        http_backoff_base_ms: 1,
        queue: QueueSettings::default(),
        shopify: None,
        shopify_webhook_secret: Some("whsec-test".to_string()),
        bestbuy: None,
        bestbuy_webhook_secret: None,
        amazon_seller_id: None,
        smtp: None,
    }
}

fn test_app(pool: PgPool) -> Router {
    let state = AppState {
        pool,
        config: Arc::new(test_config()),
        mailer: Arc::new(AppMailer::Log(LogMailer)),
        workers: WorkerFlags::default(),
        auth: AuthState::new("test-secret", 1),
    };
    build_app(state, default_rate_limit_state())
}

fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    builder.body(body).expect("request")
}

async fn send(app: &Router, req: Request<Body>) -> Response<Body> {
    app.clone().oneshot(req).await.expect("response")
}

async fn json_body(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    serde_json::from_slice(&bytes).expect("json parse")
}

async fn register(app: &Router, email: &str) -> (String, Value) {
    let response = send(
        app,
        request(
            "POST",
            "/api/auth/register",
            None,
            Some(json!({ "email": email, "password": "correct-horse", "firstName": "Ada" })),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = json_body(response).await;
    let token = json["token"].as_str().expect("token").to_string();
    (token, json["user"].clone())
}

#[test]
fn normalize_limit_applies_defaults_and_bounds() {
    assert_eq!(normalize_limit(None), 50);
    assert_eq!(normalize_limit(Some(0)), 1);
    assert_eq!(normalize_limit(Some(1_000)), 200);
    assert_eq!(normalize_limit(Some(25)), 25);
    assert_eq!(normalize_offset(Some(-5)), 0);
}

#[test]
fn error_codes_map_to_statuses() {
    let cases = [
        ("not_found", StatusCode::NOT_FOUND),
        ("unauthorized", StatusCode::UNAUTHORIZED),
        ("validation_error", StatusCode::BAD_REQUEST),
        ("conflict", StatusCode::CONFLICT),
        ("invalid_transition", StatusCode::UNPROCESSABLE_ENTITY),
        ("rate_limited", StatusCode::TOO_MANY_REQUESTS),
        ("bad_gateway", StatusCode::BAD_GATEWAY),
        ("internal_error", StatusCode::INTERNAL_SERVER_ERROR),
    ];
    for (code, status) in cases {
        let response = ApiError::new("req-1", code, "x").into_response();
        assert_eq!(response.status(), status, "code {code}");
    }
}

#[test]
fn stale_status_is_a_conflict() {
    let err = DbError::StaleStatus {
        entity: "notification",
        id: 7,
        expected_status: "failed".to_string(),
    };
    let response = map_db_error("req-1".to_string(), &err).into_response();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[sqlx::test(migrations = "../../migrations")]
async fn health_reports_database_ok(pool: PgPool) {
    let app = test_app(pool);
    let response = send(&app, request("GET", "/api/health", None, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let json = json_body(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["status"], "ok");
    assert_eq!(json["data"]["database"], "ok");
}

#[sqlx::test(migrations = "../../migrations")]
async fn protected_routes_require_a_token(pool: PgPool) {
    let app = test_app(pool);
    let response = send(&app, request("GET", "/api/orders", None, None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = json_body(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["code"], "unauthorized");
}

#[sqlx::test(migrations = "../../migrations")]
async fn first_account_is_admin_and_login_checks_password(pool: PgPool) {
    let app = test_app(pool);
    let (_, first) = register(&app, "owner@example.com").await;
    let (_, second) = register(&app, "clerk@example.com").await;
    assert_eq!(first["role"], "admin");
    assert_eq!(second["role"], "staff");

    let duplicate = send(
        &app,
        request(
            "POST",
            "/api/auth/register",
            None,
            Some(json!({ "email": "OWNER@example.com", "password": "correct-horse" })),
        ),
    )
    .await;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let wrong = send(
        &app,
        request(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "email": "owner@example.com", "password": "wrong-password" })),
        ),
    )
    .await;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let ok = send(
        &app,
        request(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "email": "owner@example.com", "password": "correct-horse" })),
        ),
    )
    .await;
    assert_eq!(ok.status(), StatusCode::OK);
    let token = json_body(ok).await["token"]
        .as_str()
        .expect("token")
        .to_string();

    let me = send(&app, request("GET", "/api/auth/me", Some(&token), None)).await;
    assert_eq!(me.status(), StatusCode::OK);
    assert_eq!(json_body(me).await["data"]["email"], "owner@example.com");
}

#[sqlx::test(migrations = "../../migrations")]
async fn order_lifecycle_through_the_api(pool: PgPool) {
    let app = test_app(pool);
    let (token, _) = register(&app, "ops@example.com").await;
    let order = json!({
        "channel": "shopify",
        "external_order_id": "5001",
        "customer_email": "buyer@example.com",
        "tax": "1.50",
        "shipping": "5.00",
        "items": [{ "sku": "MUG-1", "title": "Mug", "quantity": 2, "unit_price": "10.00" }]
    });

    let created = send(&app, request("POST", "/api/orders", Some(&token), Some(order.clone()))).await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let created = json_body(created).await;
    let id = created["data"]["id"].as_i64().expect("order id");
    assert_eq!(created["data"]["status"], "pending");
    let total: Decimal = created["data"]["total"]
        .as_str()
        .and_then(|t| t.parse().ok())
        .expect("decimal total");
    assert_eq!(total, Decimal::new(2650, 2));
    assert_eq!(created["data"]["items"].as_array().map(Vec::len), Some(1));

    let again = send(&app, request("POST", "/api/orders", Some(&token), Some(order))).await;
    assert_eq!(again.status(), StatusCode::OK);
    assert_eq!(json_body(again).await["data"]["id"].as_i64(), Some(id));

    let status = send(
        &app,
        request("GET", &format!("/api/orders/{id}/status"), Some(&token), None),
    )
    .await;
    let status = json_body(status).await;
    let allowed = status["data"]["allowed_transitions"]
        .as_array()
        .expect("allowed transitions");
    assert!(allowed.iter().any(|s| s == "confirmed"));
    assert_eq!(status["data"]["is_terminal"], false);

    let confirmed = send(
        &app,
        request(
            "PUT",
            &format!("/api/orders/{id}/status"),
            Some(&token),
            Some(json!({ "status": "confirmed", "reason": "payment captured" })),
        ),
    )
    .await;
    assert_eq!(confirmed.status(), StatusCode::OK);
    assert_eq!(json_body(confirmed).await["data"]["status"], "confirmed");

    let backwards = send(
        &app,
        request(
            "PUT",
            &format!("/api/orders/{id}/status"),
            Some(&token),
            Some(json!({ "status": "pending" })),
        ),
    )
    .await;
    assert_eq!(backwards.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json_body(backwards).await["error"]["code"], "invalid_transition");

    let history = send(
        &app,
        request("GET", &format!("/api/orders/{id}/history"), Some(&token), None),
    )
    .await;
    let history = json_body(history).await;
    let rows = history["data"].as_array().expect("history rows");
    assert!(rows.iter().any(|r| r["to_status"] == "confirmed"));

    let lifecycle = send(
        &app,
        request("GET", &format!("/api/orders/{id}/lifecycle"), Some(&token), None),
    )
    .await;
    let lifecycle = json_body(lifecycle).await;
    let stages = lifecycle["data"].as_array().expect("stages");
    assert!(!stages.is_empty());
    assert!(stages.last().is_some_and(|s| s["exited_at"].is_null()));

    let kpis = send(&app, request("GET", "/api/analytics/kpis", Some(&token), None)).await;
    assert_eq!(kpis.status(), StatusCode::OK);
    let kpis = json_body(kpis).await;
    assert_eq!(kpis["data"]["order_count"], 1);
    assert_eq!(kpis["data"]["units_sold"], 2);

    let dashboard = send(
        &app,
        request("GET", "/api/analytics/dashboard", Some(&token), None),
    )
    .await;
    assert_eq!(dashboard.status(), StatusCode::OK);
    let dashboard = json_body(dashboard).await;
    assert!(dashboard["data"]["orders_by_status"]
        .as_array()
        .is_some_and(|rows| rows.iter().any(|r| r["status"] == "confirmed")));
}

#[sqlx::test(migrations = "../../migrations")]
async fn inverted_report_range_is_rejected(pool: PgPool) {
    let app = test_app(pool);
    let (token, _) = register(&app, "ops@example.com").await;
    let response = send(
        &app,
        request(
            "GET",
            "/api/analytics/kpis?from=2026-02-01T00:00:00Z&to=2026-01-01T00:00:00Z",
            Some(&token),
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[sqlx::test(migrations = "../../migrations")]
async fn negative_stock_is_clamped(pool: PgPool) {
    let app = test_app(pool);
    let (token, _) = register(&app, "ops@example.com").await;
    let created = send(
        &app,
        request(
            "POST",
            "/api/products",
            Some(&token),
            Some(json!({ "sku": "LAMP-1", "name": "Desk lamp", "price": "39.99" })),
        ),
    )
    .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let id = json_body(created).await["data"]["id"]
        .as_i64()
        .expect("product id");

    let updated = send(
        &app,
        request(
            "PUT",
            &format!("/api/products/{id}/inventory"),
            Some(&token),
            Some(json!({ "quantity": -4 })),
        ),
    )
    .await;
    assert_eq!(updated.status(), StatusCode::OK);
    let updated = json_body(updated).await;
    assert_eq!(updated["data"]["quantity"], 0);
    assert_eq!(updated["data"]["clamped"], true);
}

#[sqlx::test(migrations = "../../migrations")]
async fn sync_jobs_are_queued_pending(pool: PgPool) {
    let app = test_app(pool);
    let (token, _) = register(&app, "ops@example.com").await;
    let created = send(
        &app,
        request(
            "POST",
            "/api/sync/jobs",
            Some(&token),
            Some(json!({ "channel": "bestbuy", "data_type": "orders" })),
        ),
    )
    .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let created = json_body(created).await;
    assert_eq!(created["data"]["status"], "pending");
    assert_eq!(created["data"]["direction"], "pull");

    let unknown = send(
        &app,
        request(
            "POST",
            "/api/sync/jobs",
            Some(&token),
            Some(json!({ "channel": "ebay", "data_type": "orders" })),
        ),
    )
    .await;
    assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);
}

#[sqlx::test(migrations = "../../migrations")]
async fn badly_signed_webhook_is_rejected_and_recorded(pool: PgPool) {
    let app = test_app(pool.clone());
    let response = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/api/webhooks/shopify/orders/create")
            .header("content-type", "application/json")
            .header("x-shopify-hmac-sha256", "bm90LWEtcmVhbC1zaWduYXR1cmU=")
            .body(Body::from(r#"{"id": 1, "line_items": []}"#))
            .expect("request"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let (topic, valid): (String, bool) = sqlx::query_as(
        "SELECT topic, signature_valid FROM webhook_events WHERE channel = 'shopify'",
    )
    .fetch_one(&pool)
    .await
    .expect("recorded event");
    assert_eq!(topic, "orders/create");
    assert!(!valid);

    let queued: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sales_processing_queue")
        .fetch_one(&pool)
        .await
        .expect("queue count");
    assert_eq!(queued, 0);
}

#[sqlx::test(migrations = "../../migrations")]
async fn bestbuy_test_without_key_reports_troubleshooting(pool: PgPool) {
    let app = test_app(pool);
    let (token, _) = register(&app, "ops@example.com").await;
    let response = send(&app, request("GET", "/api/bestbuy/test", Some(&token), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["success"], false);
    assert!(json["troubleshooting"].is_object());
}
