use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Deserialize;

use omnidesk_core::Channel;
use omnidesk_db::ChannelRow;

use crate::middleware::RequestId;

use super::{map_db_error, parse_param, ApiError, ApiResponse, AppState};

#[derive(Debug, Deserialize)]
pub(super) struct UpdateChannelRequest {
    pub is_active: bool,
}

pub(super) async fn list_channels(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<Vec<ChannelRow>>>, ApiError> {
    let rows = omnidesk_db::list_channels(&state.pool)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(rows, req_id.0))
}

/// PUT /api/channels/{code}: enables or disables a channel.
pub(super) async fn update_channel(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(code): Path<String>,
    Json(body): Json<UpdateChannelRequest>,
) -> Result<Json<ApiResponse<ChannelRow>>, ApiError> {
    let channel: Channel = parse_param(&req_id.0, &code)?;
    let row = omnidesk_db::set_channel_active(&state.pool, channel.as_str(), body.is_active)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    tracing::info!(
        channel = channel.as_str(),
        is_active = body.is_active,
        "channel toggled"
    );
    Ok(ApiResponse::new(row, req_id.0))
}
