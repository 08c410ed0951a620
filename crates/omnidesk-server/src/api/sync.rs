//! Sync job queue handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use omnidesk_core::{Channel, DataType, SyncDirection};
use omnidesk_db::{StatusCountRow, SyncJobRow};

use crate::middleware::RequestId;
use crate::services::sync::process_sync_batch;
use crate::services::{BatchOutcome, Worker};

use super::{
    map_db_error, map_service_error, normalize_limit, parse_param, ApiError, ApiResponse,
    AppState,
};

#[derive(Debug, Deserialize)]
pub(super) struct CreateJobRequest {
    pub channel: String,
    pub data_type: String,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(super) struct JobQuery {
    pub status: Option<String>,
    pub channel: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub(super) struct ChannelSyncState {
    channel: String,
    is_active: bool,
    last_synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub(super) struct SyncStatus {
    jobs: Vec<StatusCountRow>,
    channels: Vec<ChannelSyncState>,
    worker_running: bool,
}

pub(super) async fn create_job(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<ApiResponse<SyncJobRow>>), ApiError> {
    let rid = &req_id.0;
    let channel: Channel = parse_param(rid, &body.channel)?;
    let data_type: DataType = parse_param(rid, &body.data_type)?;
    let direction = match body.direction.as_deref() {
        Some(raw) => parse_param::<SyncDirection>(rid, raw)?,
        None => SyncDirection::Pull,
    };
    let payload = body
        .payload
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

    let row = omnidesk_db::create_sync_job(
        &state.pool,
        channel.as_str(),
        data_type.as_str(),
        direction.as_str(),
        &payload,
        state.config.queue.max_retries,
    )
    .await
    .map_err(|e| map_db_error(rid.clone(), &e))?;

    tracing::info!(
        job_id = row.id,
        channel = channel.as_str(),
        data_type = data_type.as_str(),
        direction = direction.as_str(),
        "sync: job queued"
    );
    Ok((StatusCode::CREATED, ApiResponse::new(row, req_id.0)))
}

pub(super) async fn list_jobs(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<JobQuery>,
) -> Result<Json<ApiResponse<Vec<SyncJobRow>>>, ApiError> {
    let rows = omnidesk_db::list_sync_jobs(
        &state.pool,
        query.status.as_deref(),
        query.channel.as_deref(),
        normalize_limit(query.limit),
    )
    .await
    .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(rows, req_id.0))
}

pub(super) async fn get_job(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<SyncJobRow>>, ApiError> {
    let row = omnidesk_db::get_sync_job(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(row, req_id.0))
}

/// POST /api/sync/jobs/{id}/retry: only failed jobs can be re-queued.
pub(super) async fn retry_job(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<SyncJobRow>>, ApiError> {
    let row = omnidesk_db::retry_sync_job(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    tracing::info!(job_id = id, "sync: job re-queued");
    Ok(ApiResponse::new(row, req_id.0))
}

pub(super) async fn status(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<SyncStatus>>, ApiError> {
    let jobs = omnidesk_db::sync_job_status_counts(&state.pool)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    let channels = omnidesk_db::list_channels(&state.pool)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?
        .into_iter()
        .map(|row| ChannelSyncState {
            channel: row.code,
            is_active: row.is_active,
            last_synced_at: row.last_synced_at,
        })
        .collect();

    Ok(ApiResponse::new(
        SyncStatus {
            jobs,
            channels,
            worker_running: state.workers.is_running(Worker::Sync),
        },
        req_id.0,
    ))
}

/// POST /api/sync/run: executes one batch now unless the worker is busy.
pub(super) async fn run(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<BatchOutcome>>, ApiError> {
    let Some(_guard) = state.workers.try_start(Worker::Sync) else {
        return Err(ApiError::new(
            req_id.0,
            "conflict",
            "sync worker is already running",
        ));
    };
    let outcome = process_sync_batch(&state.pool, &state.config)
        .await
        .map_err(|e| map_service_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(outcome, req_id.0))
}
