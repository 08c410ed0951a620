use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use omnidesk_db::{
    GeneratedReportRow, GeneratedReportSummaryRow, InventoryReportRow, SalesGroupRow,
    SalesGrouping, TopProductRow,
};

use crate::middleware::{CurrentUser, RequestId};
use crate::services::reports::{generate_report, resolve_range, ReportRequest};

use super::{map_db_error, map_service_error, normalize_limit, ApiError, ApiResponse, AppState};

const DEFAULT_TOP_PRODUCTS: i64 = 10;

#[derive(Debug, Deserialize)]
pub(super) struct SalesQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub group_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct TopProductsQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(super) struct LimitQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub(super) struct RangedRows<T> {
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    rows: Vec<T>,
}

fn range(
    req_id: &str,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), ApiError> {
    resolve_range(from, to, Utc::now()).map_err(|e| map_service_error(req_id.to_owned(), &e))
}

/// GET /api/reports/sales: `group_by` is `day` (default), `week`, `month`
/// or `channel`.
pub(super) async fn sales_report(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<SalesQuery>,
) -> Result<Json<ApiResponse<RangedRows<SalesGroupRow>>>, ApiError> {
    let rid = &req_id.0;
    let (from, to) = range(rid, query.from, query.to)?;
    let grouping = match query.group_by.as_deref() {
        Some(raw) => raw
            .parse::<SalesGrouping>()
            .map_err(|message| ApiError::new(rid, "validation_error", message))?,
        None => SalesGrouping::default(),
    };
    let rows = omnidesk_db::sales_report(&state.pool, from, to, grouping)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;
    Ok(ApiResponse::new(RangedRows { from, to, rows }, req_id.0))
}

pub(super) async fn top_products(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<TopProductsQuery>,
) -> Result<Json<ApiResponse<RangedRows<TopProductRow>>>, ApiError> {
    let (from, to) = range(&req_id.0, query.from, query.to)?;
    let limit = normalize_limit(Some(query.limit.unwrap_or(DEFAULT_TOP_PRODUCTS)));
    let rows = omnidesk_db::top_products(&state.pool, from, to, limit)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(RangedRows { from, to, rows }, req_id.0))
}

pub(super) async fn inventory_report(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<Vec<InventoryReportRow>>>, ApiError> {
    let rows = omnidesk_db::inventory_report(&state.pool)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(rows, req_id.0))
}

/// POST /api/reports/generate: stores the rendered report and returns it.
pub(super) async fn generate(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(CurrentUser(claims)): Extension<CurrentUser>,
    Json(body): Json<ReportRequest>,
) -> Result<(StatusCode, Json<ApiResponse<GeneratedReportRow>>), ApiError> {
    let row = generate_report(&state.pool, &body, Some(claims.sub))
        .await
        .map_err(|e| map_service_error(req_id.0.clone(), &e))?;
    Ok((StatusCode::CREATED, ApiResponse::new(row, req_id.0)))
}

/// GET /api/reports: summaries only; fetch one report for its content.
pub(super) async fn list_reports(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<ApiResponse<Vec<GeneratedReportSummaryRow>>>, ApiError> {
    let rows = omnidesk_db::list_generated_reports(&state.pool, normalize_limit(query.limit))
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(rows, req_id.0))
}

pub(super) async fn get_report(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<GeneratedReportRow>>, ApiError> {
    let row = omnidesk_db::get_generated_report(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(row, req_id.0))
}
