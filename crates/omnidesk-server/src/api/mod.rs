mod analytics;
mod auth;
mod bestbuy;
mod channels;
mod fulfillment;
mod notifications;
mod orders;
mod products;
mod reports;
mod sales;
mod sync;
mod validation;
mod webhooks;
mod workflow;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, HeaderName, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use omnidesk_channels::ChannelError;
use omnidesk_core::{AppConfig, CoreError};
use omnidesk_db::DbError;

use crate::auth::AuthState;
use crate::mailer::AppMailer;
use crate::middleware::{enforce_rate_limit, request_id, require_jwt, RateLimitState, RequestId};
use crate::services::{ServiceError, WorkerFlags};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub mailer: Arc<AppMailer>,
    pub workers: WorkerFlags,
    pub auth: AuthState,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub success: bool,
    pub error: ErrorBody,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Offset-paginated list payload.
#[derive(Debug, Serialize)]
pub struct Page<T: Serialize> {
    pub items: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct HealthData {
    status: &'static str,
    database: &'static str,
}

impl ResponseMeta {
    pub(super) fn new(request_id: String) -> Self {
        Self {
            request_id,
            timestamp: Utc::now(),
        }
    }
}

impl<T: Serialize> ApiResponse<T> {
    pub(super) fn new(data: T, request_id: String) -> Json<Self> {
        Json(Self {
            success: true,
            data,
            meta: ResponseMeta::new(request_id),
        })
    }
}

impl ApiError {
    pub fn new(
        request_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
            },
            meta: ResponseMeta::new(request_id.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.error.code.as_str() {
            "not_found" => StatusCode::NOT_FOUND,
            "unauthorized" => StatusCode::UNAUTHORIZED,
            "bad_request" | "validation_error" => StatusCode::BAD_REQUEST,
            "conflict" => StatusCode::CONFLICT,
            "invalid_transition" => StatusCode::UNPROCESSABLE_ENTITY,
            "rate_limited" => StatusCode::TOO_MANY_REQUESTS,
            "bad_gateway" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

pub(super) fn normalize_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(50).clamp(1, 200)
}

pub(super) fn normalize_offset(offset: Option<i64>) -> i64 {
    offset.unwrap_or(0).max(0)
}

pub(super) fn map_db_error(request_id: String, error: &DbError) -> ApiError {
    match error {
        DbError::NotFound => ApiError::new(request_id, "not_found", "record not found"),
        DbError::Conflict(what) => ApiError::new(request_id, "conflict", what.clone()),
        DbError::StaleStatus { .. } => ApiError::new(request_id, "conflict", error.to_string()),
        DbError::OutOfRange(_) => {
            ApiError::new(request_id, "validation_error", error.to_string())
        }
        DbError::Sqlx(_) | DbError::Migration(_) => {
            tracing::error!(error = %error, "database query failed");
            ApiError::new(request_id, "internal_error", "database query failed")
        }
    }
}

pub(super) fn map_channel_error(request_id: String, error: &ChannelError) -> ApiError {
    match error {
        ChannelError::NotConfigured { .. } | ChannelError::NotSupported { .. } => {
            ApiError::new(request_id, "bad_request", error.to_string())
        }
        ChannelError::Mapping { .. } => {
            ApiError::new(request_id, "validation_error", error.to_string())
        }
        _ => {
            tracing::warn!(error = %error, "channel request failed");
            let message = match error.upstream_status() {
                Some(status) => format!("upstream returned HTTP {status}: {error}"),
                None => format!("upstream request failed: {error}"),
            };
            ApiError::new(request_id, "bad_gateway", message)
        }
    }
}

pub(super) fn map_service_error(request_id: String, error: &ServiceError) -> ApiError {
    match error {
        ServiceError::Db(e) => map_db_error(request_id, e),
        ServiceError::Core(e @ CoreError::InvalidTransition { .. }) => {
            ApiError::new(request_id, "invalid_transition", e.to_string())
        }
        ServiceError::Core(e) => ApiError::new(request_id, "validation_error", e.to_string()),
        ServiceError::Validation(message) => {
            ApiError::new(request_id, "validation_error", message.clone())
        }
        ServiceError::Channel(e) => map_channel_error(request_id, e),
        ServiceError::Report(_) => {
            tracing::error!(error = %error, "report generation failed");
            ApiError::new(request_id, "internal_error", "report generation failed")
        }
    }
}

/// Parses a path or query value into a domain enum, answering 400 on failure.
pub(super) fn parse_param<T>(request_id: &str, raw: &str) -> Result<T, ApiError>
where
    T: std::str::FromStr<Err = CoreError>,
{
    raw.parse::<T>()
        .map_err(|e| ApiError::new(request_id, "validation_error", e.to_string()))
}

fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-request-id"),
        ])
}

#[allow(clippy::too_many_lines)]
fn protected_router(auth_state: AuthState, rate_limit: RateLimitState) -> Router<AppState> {
    Router::new()
        .route("/api/auth/me", get(auth::me))
        .route("/api/channels", get(channels::list_channels))
        .route("/api/channels/{code}", put(channels::update_channel))
        .route(
            "/api/products",
            get(products::list_products).post(products::create_product),
        )
        .route(
            "/api/products/inventory/low-stock",
            get(products::list_low_stock),
        )
        .route(
            "/api/products/{id}",
            get(products::get_product)
                .put(products::update_product)
                .delete(products::archive_product),
        )
        .route(
            "/api/products/{id}/channels",
            get(products::list_product_channels),
        )
        .route(
            "/api/products/{id}/channels/{channel}",
            put(products::upsert_product_channel),
        )
        .route(
            "/api/products/{id}/inventory",
            get(products::list_inventory).put(products::set_inventory),
        )
        .route(
            "/api/orders",
            get(orders::list_orders).post(orders::create_order),
        )
        .route("/api/orders/{id}", get(orders::get_order))
        .route(
            "/api/orders/{id}/status",
            get(orders::get_order_status).put(orders::update_order_status),
        )
        .route("/api/orders/{id}/history", get(orders::list_history))
        .route("/api/orders/{id}/lifecycle", get(analytics::order_lifecycle))
        .route("/api/orders/{id}/workflow", post(workflow::evaluate_order))
        .route(
            "/api/orders/{id}/fulfillments",
            get(fulfillment::list_order_fulfillments).post(fulfillment::create_fulfillment),
        )
        .route("/api/sales/ingest", post(sales::ingest))
        .route("/api/sales/queue", get(sales::list_queue))
        .route("/api/sales/process", post(sales::process))
        .route("/api/sales/summary", get(sales::summary))
        .route(
            "/api/sync/jobs",
            get(sync::list_jobs).post(sync::create_job),
        )
        .route("/api/sync/jobs/{id}", get(sync::get_job))
        .route("/api/sync/jobs/{id}/retry", post(sync::retry_job))
        .route("/api/sync/status", get(sync::status))
        .route("/api/sync/run", post(sync::run))
        .route("/api/webhook-events", get(webhooks::list_events))
        .route("/api/bestbuy/test", get(bestbuy::test_connection))
        .route("/api/bestbuy/orders", get(bestbuy::list_orders))
        .route("/api/bestbuy/orders/{id}/accept", post(bestbuy::accept_order))
        .route(
            "/api/bestbuy/orders/{id}/tracking",
            post(bestbuy::ship_order),
        )
        .route("/api/bestbuy/offers", get(bestbuy::list_offers))
        .route("/api/bestbuy/import-orders", post(bestbuy::import_orders))
        .route("/api/analytics/dashboard", get(analytics::dashboard))
        .route("/api/analytics/kpis", get(analytics::kpis))
        .route("/api/analytics/lifecycle", get(analytics::lifecycle_stats))
        .route(
            "/api/analytics/lifecycle/stuck",
            get(analytics::stuck_orders),
        )
        .route(
            "/api/workflow/rules",
            get(workflow::list_rules).post(workflow::create_rule),
        )
        .route(
            "/api/workflow/rules/{id}",
            put(workflow::update_rule).delete(workflow::deactivate_rule),
        )
        .route("/api/fulfillment", get(fulfillment::list_fulfillments))
        .route("/api/fulfillment/metrics", get(fulfillment::metrics))
        .route(
            "/api/fulfillment/{id}/delivered",
            put(fulfillment::mark_delivered),
        )
        .route(
            "/api/notifications",
            get(notifications::list_notifications).post(notifications::enqueue),
        )
        .route("/api/notifications/stats", get(notifications::stats))
        .route("/api/notifications/process", post(notifications::process))
        .route(
            "/api/notifications/{id}/retry",
            post(notifications::retry),
        )
        .route("/api/reports", get(reports::list_reports))
        .route("/api/reports/sales", get(reports::sales_report))
        .route("/api/reports/top-products", get(reports::top_products))
        .route("/api/reports/inventory", get(reports::inventory_report))
        .route("/api/reports/generate", post(reports::generate))
        .route("/api/reports/{id}", get(reports::get_report))
        .route(
            "/api/validation/rules",
            get(validation::list_rules).post(validation::create_rule),
        )
        .route("/api/validation/rules/{id}", put(validation::update_rule))
        .route("/api/validation/validate", post(validation::validate))
        .route("/api/validation/run", post(validation::run))
        .route("/api/validation/issues", get(validation::list_issues))
        .route(
            "/api/validation/issues/{id}/resolve",
            put(validation::resolve_issue),
        )
        .route("/api/validation/score", get(validation::score))
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn_with_state(
                    rate_limit,
                    enforce_rate_limit,
                ))
                .layer(axum::middleware::from_fn_with_state(
                    auth_state,
                    require_jwt,
                )),
        )
}

pub fn build_app(state: AppState, rate_limit: RateLimitState) -> Router {
    let public_routes = Router::new()
        .route("/api/health", get(health))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/webhooks/shopify/{*topic}", post(webhooks::shopify))
        .route("/api/webhooks/bestbuy", post(webhooks::bestbuy));

    Router::new()
        .merge(public_routes)
        .merge(protected_router(state.auth.clone(), rate_limit))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(build_cors())
                .layer(axum::middleware::from_fn(request_id)),
        )
        .with_state(state)
}

async fn health(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> impl IntoResponse {
    match omnidesk_db::ping(&state.pool).await {
        Ok(()) => (
            StatusCode::OK,
            ApiResponse::new(
                HealthData {
                    status: "ok",
                    database: "ok",
                },
                req_id.0,
            ),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "health check: database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                ApiResponse::new(
                    HealthData {
                        status: "degraded",
                        database: "unavailable",
                    },
                    req_id.0,
                ),
            )
        }
    }
}

#[must_use]
pub fn default_rate_limit_state() -> RateLimitState {
    RateLimitState::new(120, Duration::from_secs(60))
}

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;
