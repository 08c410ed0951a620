//! Best Buy Canada (Mirakl) passthrough handlers.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use omnidesk_channels::mirakl::{OfferPage, OrderPage};
use omnidesk_channels::{
    mask_api_key, ChannelError, HttpSettings, MiraklClient, OrderQuery, TrackingUpdate,
};
use omnidesk_core::Channel;

use crate::middleware::RequestId;
use crate::services::sales::ingest_sale;

use super::{map_channel_error, ApiError, ApiResponse, AppState};

const PLATFORM: &str = "Best Buy Canada (Mirakl)";
const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
pub(super) struct OrdersQuery {
    pub state: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(super) struct OffersQuery {
    pub limit: Option<u32>,
    pub offset: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ImportRequest {
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct AcceptResult {
    order_id: String,
    accepted_lines: usize,
}

#[derive(Debug, Serialize)]
pub(super) struct ShipResult {
    order_id: String,
    carrier_name: String,
    tracking_number: String,
    shipped: bool,
}

#[derive(Debug, Default, Serialize)]
pub(super) struct ImportSummary {
    fetched: usize,
    enqueued: usize,
    failed: usize,
}

fn client(state: &AppState) -> Result<MiraklClient, ChannelError> {
    let credentials = state
        .config
        .bestbuy
        .as_ref()
        .ok_or_else(|| ChannelError::NotConfigured {
            channel: Channel::BestBuy.as_str().to_owned(),
        })?;
    MiraklClient::new(credentials, &HttpSettings::from_app_config(&state.config))
}

fn page_size(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

/// Hints shown with a failed connection test, keyed by what most likely
/// went wrong.
fn troubleshooting(error: Option<&ChannelError>) -> Value {
    let api_key = "Check BESTBUY_API_KEY: it must be the shop API key from the Mirakl back office.";
    let endpoint = "Check BESTBUY_API_URL: it should point at https://marketplace.bestbuy.ca/api.";
    let network = "Check outbound connectivity to the Mirakl host and retry.";
    match error {
        None => json!({ "apiKey": "Set BESTBUY_API_KEY and BESTBUY_API_URL, then restart the server." }),
        Some(ChannelError::Unauthorized { .. }) => json!({ "apiKey": api_key }),
        Some(ChannelError::NotFound { .. } | ChannelError::InvalidUrl { .. }) => {
            json!({ "endpoint": endpoint })
        }
        Some(ChannelError::Http(_)) => json!({ "network": network }),
        Some(_) => json!({ "apiKey": api_key, "endpoint": endpoint, "network": network }),
    }
}

/// GET /api/bestbuy/test: the result is the payload, so failures still
/// answer 200.
pub(super) async fn test_connection(State(state): State<AppState>) -> Json<Value> {
    let Some(credentials) = state.config.bestbuy.as_ref() else {
        return Json(json!({
            "success": false,
            "platform": PLATFORM,
            "message": "Best Buy API key is not configured",
            "troubleshooting": troubleshooting(None),
        }));
    };

    let result = match client(&state) {
        Ok(client) => client.account().await,
        Err(e) => Err(e),
    };
    match result {
        Ok(account) => Json(json!({
            "success": true,
            "platform": PLATFORM,
            "apiKey": mask_api_key(&credentials.api_key),
            "data": account,
        })),
        Err(e) => {
            tracing::warn!(error = %e, "bestbuy: connection test failed");
            Json(json!({
                "success": false,
                "platform": PLATFORM,
                "apiKey": mask_api_key(&credentials.api_key),
                "message": e.to_string(),
                "troubleshooting": troubleshooting(Some(&e)),
            }))
        }
    }
}

/// GET /api/bestbuy/orders: one OR11 page.
pub(super) async fn list_orders(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<OrdersQuery>,
) -> Result<Json<ApiResponse<OrderPage>>, ApiError> {
    let order_query = OrderQuery {
        states: query.state.filter(|s| !s.trim().is_empty()),
        updated_since: None,
        max: page_size(query.limit),
        offset: query.offset.unwrap_or(0),
    };
    let page = async { client(&state)?.list_orders(&order_query).await }
        .await
        .map_err(|e| map_channel_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(page, req_id.0))
}

/// POST /api/bestbuy/orders/{id}/accept: accepts every line of the order.
pub(super) async fn accept_order(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(order_id): Path<String>,
) -> Result<Json<ApiResponse<AcceptResult>>, ApiError> {
    let accepted_lines = async { client(&state)?.accept_order(&order_id).await }
        .await
        .map_err(|e| map_channel_error(req_id.0.clone(), &e))?;
    tracing::info!(%order_id, accepted_lines, "bestbuy: order accepted");
    Ok(ApiResponse::new(
        AcceptResult {
            order_id,
            accepted_lines,
        },
        req_id.0,
    ))
}

/// POST /api/bestbuy/orders/{id}/tracking: OR23 then OR24.
pub(super) async fn ship_order(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(order_id): Path<String>,
    Json(body): Json<TrackingUpdate>,
) -> Result<Json<ApiResponse<ShipResult>>, ApiError> {
    let rid = &req_id.0;
    if body.tracking_number.trim().is_empty() || body.carrier_name.trim().is_empty() {
        return Err(ApiError::new(
            rid,
            "validation_error",
            "carrier_name and tracking_number are required",
        ));
    }

    async {
        let client = client(&state)?;
        client.update_tracking(&order_id, &body).await?;
        client.mark_shipped(&order_id).await
    }
    .await
    .map_err(|e| map_channel_error(rid.clone(), &e))?;

    tracing::info!(%order_id, carrier = %body.carrier_name, "bestbuy: order shipped");
    Ok(ApiResponse::new(
        ShipResult {
            order_id,
            carrier_name: body.carrier_name,
            tracking_number: body.tracking_number,
            shipped: true,
        },
        req_id.0,
    ))
}

pub(super) async fn list_offers(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<OffersQuery>,
) -> Result<Json<ApiResponse<OfferPage>>, ApiError> {
    let max = page_size(query.limit);
    let offset = query.offset.unwrap_or(0);
    let page = async { client(&state)?.list_offers(max, offset).await }
        .await
        .map_err(|e| map_channel_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(page, req_id.0))
}

/// POST /api/bestbuy/import-orders: pulls every matching order and queues it
/// for processing. A payload that cannot be queued is counted, not fatal.
pub(super) async fn import_orders(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    body: Option<Json<ImportRequest>>,
) -> Result<Json<ApiResponse<ImportSummary>>, ApiError> {
    let states = body.and_then(|Json(b)| b.state);
    let orders = async { client(&state)?.fetch_orders(states.as_deref(), None).await }
        .await
        .map_err(|e| map_channel_error(req_id.0.clone(), &e))?;

    let mut summary = ImportSummary {
        fetched: orders.len(),
        ..ImportSummary::default()
    };
    for order in &orders {
        match ingest_sale(
            &state.pool,
            Channel::BestBuy,
            order,
            state.config.queue.max_retries,
        )
        .await
        {
            Ok(_) => summary.enqueued += 1,
            Err(e) => {
                summary.failed += 1;
                tracing::warn!(error = %e, "bestbuy: failed to queue imported order");
            }
        }
    }

    tracing::info!(
        fetched = summary.fetched,
        enqueued = summary.enqueued,
        failed = summary.failed,
        "bestbuy: order import finished"
    );
    Ok(ApiResponse::new(summary, req_id.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_bounded() {
        assert_eq!(page_size(None), DEFAULT_PAGE_SIZE);
        assert_eq!(page_size(Some(0)), 1);
        assert_eq!(page_size(Some(500)), MAX_PAGE_SIZE);
    }

    #[test]
    fn troubleshooting_points_at_the_failing_piece() {
        let auth = ChannelError::Unauthorized {
            channel: "bestbuy".to_string(),
            status: 401,
        };
        let hints = troubleshooting(Some(&auth));
        assert!(hints.get("apiKey").is_some());
        assert!(hints.get("network").is_none());

        let missing = ChannelError::NotFound {
            url: "https://example.test/api/account".to_string(),
        };
        assert!(troubleshooting(Some(&missing)).get("endpoint").is_some());
        assert!(troubleshooting(None).get("apiKey").is_some());
    }
}
