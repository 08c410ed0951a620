use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use omnidesk_db::{CarrierCountRow, FulfillmentMetricsRow, FulfillmentRow, OrderRow};

use crate::middleware::{CurrentUser, RequestId};
use crate::services::fulfillment::{self, NewShipment};

use super::{map_db_error, map_service_error, normalize_limit, ApiError, ApiResponse, AppState};

const FULFILLMENT_STATUSES: [&str; 4] = ["pending", "shipped", "delivered", "cancelled"];

#[derive(Debug, Deserialize)]
pub(super) struct FulfillmentQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub(super) struct Shipment {
    fulfillment: FulfillmentRow,
    order: OrderRow,
}

#[derive(Debug, Serialize)]
pub(super) struct Delivery {
    fulfillment: FulfillmentRow,
    /// Present when this delivery completed the order.
    order: Option<OrderRow>,
}

#[derive(Debug, Serialize)]
pub(super) struct Metrics {
    #[serde(flatten)]
    totals: FulfillmentMetricsRow,
    carriers: Vec<CarrierCountRow>,
}

/// POST /api/orders/{id}/fulfillments: ships the order; 422 when it cannot
/// move to `shipped`.
pub(super) async fn create_fulfillment(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(CurrentUser(claims)): Extension<CurrentUser>,
    Path(order_id): Path<i64>,
    Json(body): Json<NewShipment>,
) -> Result<(StatusCode, Json<ApiResponse<Shipment>>), ApiError> {
    let (fulfillment, order) = fulfillment::ship_order(
        &state.pool,
        order_id,
        &body,
        Some(claims.sub),
        state.config.queue.max_retries,
    )
    .await
    .map_err(|e| map_service_error(req_id.0.clone(), &e))?;

    tracing::info!(
        order_id,
        fulfillment_id = fulfillment.id,
        carrier = %fulfillment.carrier,
        "fulfillment: order shipped"
    );
    Ok((
        StatusCode::CREATED,
        ApiResponse::new(Shipment { fulfillment, order }, req_id.0),
    ))
}

pub(super) async fn list_order_fulfillments(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(order_id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<FulfillmentRow>>>, ApiError> {
    omnidesk_db::get_order(&state.pool, order_id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    let rows = omnidesk_db::list_order_fulfillments(&state.pool, order_id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(rows, req_id.0))
}

pub(super) async fn list_fulfillments(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<FulfillmentQuery>,
) -> Result<Json<ApiResponse<Vec<FulfillmentRow>>>, ApiError> {
    let status = query.status.as_deref().map(str::trim).filter(|s| !s.is_empty());
    if let Some(s) = status {
        if !FULFILLMENT_STATUSES.contains(&s) {
            return Err(ApiError::new(
                req_id.0,
                "validation_error",
                format!("status must be one of {}", FULFILLMENT_STATUSES.join(", ")),
            ));
        }
    }
    let rows = omnidesk_db::list_fulfillments(&state.pool, status, normalize_limit(query.limit))
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(rows, req_id.0))
}

pub(super) async fn metrics(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<Metrics>>, ApiError> {
    let totals = omnidesk_db::fulfillment_metrics(&state.pool)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    let carriers = omnidesk_db::fulfillment_carrier_counts(&state.pool)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(Metrics { totals, carriers }, req_id.0))
}

/// PUT /api/fulfillment/{id}/delivered
pub(super) async fn mark_delivered(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(CurrentUser(claims)): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Delivery>>, ApiError> {
    let (fulfillment, order) = fulfillment::mark_delivered(
        &state.pool,
        id,
        Some(claims.sub),
        state.config.queue.max_retries,
    )
    .await
    .map_err(|e| map_service_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(Delivery { fulfillment, order }, req_id.0))
}
