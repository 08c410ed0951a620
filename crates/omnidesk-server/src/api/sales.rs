use axum::{
    extract::{Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use omnidesk_core::Channel;
use omnidesk_db::{ChannelRevenueRow, SalesQueueRow};

use crate::middleware::RequestId;
use crate::services::reports::resolve_range;
use crate::services::sales::{ingest_sale, process_sales_batch};
use crate::services::{BatchOutcome, Worker};

use super::{
    map_db_error, map_service_error, normalize_limit, parse_param, ApiError, ApiResponse,
    AppState,
};

#[derive(Debug, Deserialize)]
pub(super) struct IngestRequest {
    pub channel: String,
    pub payload: Value,
}

#[derive(Debug, Deserialize)]
pub(super) struct QueueQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RangeQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub(super) struct SalesSummary {
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    channels: Vec<ChannelRevenueRow>,
}

pub(super) async fn ingest(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<IngestRequest>,
) -> Result<(StatusCode, Json<ApiResponse<SalesQueueRow>>), ApiError> {
    let channel: Channel = parse_param(&req_id.0, &body.channel)?;
    let row = ingest_sale(
        &state.pool,
        channel,
        &body.payload,
        state.config.queue.max_retries,
    )
    .await
    .map_err(|e| map_service_error(req_id.0.clone(), &e))?;
    Ok((StatusCode::ACCEPTED, ApiResponse::new(row, req_id.0)))
}

pub(super) async fn list_queue(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<QueueQuery>,
) -> Result<Json<ApiResponse<Vec<SalesQueueRow>>>, ApiError> {
    let rows = omnidesk_db::list_sales_queue(
        &state.pool,
        query.status.as_deref(),
        normalize_limit(query.limit),
    )
    .await
    .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(rows, req_id.0))
}

/// POST /api/sales/process: drains one batch now unless the worker is busy.
pub(super) async fn process(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<BatchOutcome>>, ApiError> {
    let Some(_guard) = state.workers.try_start(Worker::Sales) else {
        return Err(ApiError::new(
            req_id.0,
            "conflict",
            "sales processing is already running",
        ));
    };
    let outcome = process_sales_batch(&state.pool, &state.config.queue)
        .await
        .map_err(|e| map_service_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(outcome, req_id.0))
}

pub(super) async fn summary(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<ApiResponse<SalesSummary>>, ApiError> {
    let (from, to) = resolve_range(query.from, query.to, Utc::now())
        .map_err(|e| map_service_error(req_id.0.clone(), &e))?;
    let channels = omnidesk_db::revenue_by_channel(&state.pool, from, to)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(SalesSummary { from, to, channels }, req_id.0))
}
