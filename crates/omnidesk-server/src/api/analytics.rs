use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use omnidesk_core::OrderStatus;
use omnidesk_db::{LifecycleStageRow, StageStatsRow, StuckOrderRow};

use crate::middleware::RequestId;
use crate::services::reports::{load_dashboard, load_kpis, resolve_range, Dashboard, Kpis};

use super::{map_db_error, map_service_error, normalize_limit, ApiError, ApiResponse, AppState};

const DEFAULT_STUCK_HOURS: i64 = 48;

#[derive(Debug, Deserialize)]
pub(super) struct RangeQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub(super) struct StuckQuery {
    pub hours: Option<i64>,
    pub limit: Option<i64>,
}

/// Statuses an order can sit in indefinitely without being stuck.
fn settled_statuses() -> Vec<String> {
    OrderStatus::ALL
        .into_iter()
        .filter(|s| s.is_terminal() || matches!(s, OrderStatus::Delivered | OrderStatus::Completed))
        .map(|s| s.as_str().to_owned())
        .collect()
}

pub(super) async fn dashboard(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<ApiResponse<Dashboard>>, ApiError> {
    let (from, to) = resolve_range(query.from, query.to, Utc::now())
        .map_err(|e| map_service_error(req_id.0.clone(), &e))?;
    let dashboard = load_dashboard(&state.pool, from, to)
        .await
        .map_err(|e| map_service_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(dashboard, req_id.0))
}

pub(super) async fn kpis(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<ApiResponse<Kpis>>, ApiError> {
    let (from, to) = resolve_range(query.from, query.to, Utc::now())
        .map_err(|e| map_service_error(req_id.0.clone(), &e))?;
    let kpis = load_kpis(&state.pool, from, to)
        .await
        .map_err(|e| map_service_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(kpis, req_id.0))
}

/// GET /api/orders/{id}/lifecycle
pub(super) async fn order_lifecycle(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<LifecycleStageRow>>>, ApiError> {
    omnidesk_db::get_order(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    let stages = omnidesk_db::list_lifecycle_stages(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(stages, req_id.0))
}

pub(super) async fn lifecycle_stats(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<Vec<StageStatsRow>>>, ApiError> {
    let stats = omnidesk_db::lifecycle_stage_stats(&state.pool)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(stats, req_id.0))
}

/// GET /api/analytics/lifecycle/stuck: orders whose open stage is older than
/// `hours` (default 48).
pub(super) async fn stuck_orders(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<StuckQuery>,
) -> Result<Json<ApiResponse<Vec<StuckOrderRow>>>, ApiError> {
    let hours = query.hours.unwrap_or(DEFAULT_STUCK_HOURS);
    if hours <= 0 {
        return Err(ApiError::new(
            req_id.0,
            "validation_error",
            "hours must be > 0",
        ));
    }
    let rows = omnidesk_db::list_stuck_orders(
        &state.pool,
        hours,
        &settled_statuses(),
        normalize_limit(query.limit),
    )
    .await
    .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(rows, req_id.0))
}
