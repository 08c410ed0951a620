use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use omnidesk_db::{NotificationRow, StatusCountRow};

use crate::middleware::RequestId;
use crate::services::notifications::{enqueue_manual, process_notification_batch};
use crate::services::{BatchOutcome, Worker};

use super::{map_db_error, map_service_error, normalize_limit, ApiError, ApiResponse, AppState};

#[derive(Debug, Deserialize)]
pub(super) struct NotificationQuery {
    pub status: Option<String>,
    pub order_id: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(super) struct EnqueueRequest {
    pub order_id: i64,
    pub template: String,
}

#[derive(Debug, Serialize)]
pub(super) struct NotificationStats {
    statuses: Vec<StatusCountRow>,
    worker_running: bool,
}

pub(super) async fn list_notifications(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<NotificationQuery>,
) -> Result<Json<ApiResponse<Vec<NotificationRow>>>, ApiError> {
    let rows = omnidesk_db::list_notifications(
        &state.pool,
        query.status.as_deref(),
        query.order_id,
        normalize_limit(query.limit),
    )
    .await
    .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(rows, req_id.0))
}

/// POST /api/notifications: queues a template for an order by hand.
pub(super) async fn enqueue(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<ApiResponse<NotificationRow>>), ApiError> {
    let row = enqueue_manual(
        &state.pool,
        body.order_id,
        body.template.trim(),
        state.config.queue.max_retries,
    )
    .await
    .map_err(|e| map_service_error(req_id.0.clone(), &e))?;
    Ok((StatusCode::CREATED, ApiResponse::new(row, req_id.0)))
}

/// POST /api/notifications/{id}/retry: 409 unless the notification failed.
pub(super) async fn retry(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<NotificationRow>>, ApiError> {
    let row = omnidesk_db::retry_notification(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    tracing::info!(notification_id = id, "notifications: re-queued");
    Ok(ApiResponse::new(row, req_id.0))
}

pub(super) async fn stats(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<NotificationStats>>, ApiError> {
    let statuses = omnidesk_db::notification_status_counts(&state.pool)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(
        NotificationStats {
            statuses,
            worker_running: state.workers.is_running(Worker::Notifications),
        },
        req_id.0,
    ))
}

pub(super) async fn process(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<BatchOutcome>>, ApiError> {
    let Some(_guard) = state.workers.try_start(Worker::Notifications) else {
        return Err(ApiError::new(
            req_id.0,
            "conflict",
            "notification worker is already running",
        ));
    };
    let outcome = process_notification_batch(&state.pool, &*state.mailer, &state.config.queue)
        .await
        .map_err(|e| map_service_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(outcome, req_id.0))
}
