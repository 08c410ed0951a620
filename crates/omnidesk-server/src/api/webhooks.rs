//! Inbound channel webhooks. Every delivery is recorded, signed or not;
//! only verified deliveries are acted on.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use omnidesk_channels::signature::{MIRAKL_SIGNATURE_HEADER, SHOPIFY_SIGNATURE_HEADER};
use omnidesk_channels::{map_product, verify_mirakl, verify_shopify};
use omnidesk_core::Channel;
use omnidesk_db::WebhookEventRow;

use crate::middleware::RequestId;
use crate::services::sales::ingest_sale;

use super::{
    map_db_error, map_service_error, normalize_limit, parse_param, ApiError, ApiResponse,
    AppState,
};

const SHOPIFY_ORDER_TOPICS: [&str; 5] = [
    "orders/create",
    "orders/updated",
    "orders/paid",
    "orders/cancelled",
    "orders/fulfilled",
];
const SHOPIFY_PRODUCT_TOPICS: [&str; 2] = ["products/create", "products/update"];

#[derive(Debug, Serialize)]
pub(super) struct WebhookAck {
    event_id: i64,
    topic: String,
    action: &'static str,
}

#[derive(Debug, Deserialize)]
pub(super) struct EventQuery {
    pub channel: Option<String>,
    pub limit: Option<i64>,
}

fn parse_body(body: &[u8]) -> Value {
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn signature_ok(
    secret: Option<&str>,
    header: Option<&str>,
    verify: impl FnOnce(&str, &str) -> bool,
) -> bool {
    match (secret, header) {
        (Some(secret), Some(header)) if !secret.is_empty() => verify(secret, header),
        _ => false,
    }
}

/// Pulls the order payload out of a Mirakl notification: either
/// `{type, data: {order_id, ..}}` or a bare `{order_id, ..}`.
fn mirakl_order_payload(payload: &Value) -> Option<(String, &Value)> {
    if let Some(kind) = payload.get("type").and_then(Value::as_str) {
        let data = payload.get("data")?;
        return data
            .get("order_id")
            .is_some()
            .then(|| (kind.to_owned(), data));
    }
    payload
        .get("order_id")
        .is_some()
        .then(|| ("order".to_owned(), payload))
}

/// POST /api/webhooks/shopify/{topic}
pub(super) async fn shopify(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(topic): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<WebhookAck>>, ApiError> {
    let rid = &req_id.0;
    let payload = parse_body(&body);
    let valid = signature_ok(
        state.config.shopify_webhook_secret.as_deref(),
        header_str(&headers, SHOPIFY_SIGNATURE_HEADER),
        |secret, header| verify_shopify(secret, &body, header),
    );

    let event_id = omnidesk_db::record_webhook_event(&state.pool, "shopify", &topic, &payload, valid)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;
    if !valid {
        tracing::warn!(event_id, %topic, "webhooks: rejected shopify delivery");
        return Err(ApiError::new(rid, "unauthorized", "invalid webhook signature"));
    }

    let action = if SHOPIFY_ORDER_TOPICS.contains(&topic.as_str()) {
        ingest_sale(
            &state.pool,
            Channel::Shopify,
            &payload,
            state.config.queue.max_retries,
        )
        .await
        .map_err(|e| map_service_error(rid.clone(), &e))?;
        "enqueued"
    } else if SHOPIFY_PRODUCT_TOPICS.contains(&topic.as_str()) {
        let product = map_product(Channel::Shopify, &payload)
            .map_err(|e| super::map_channel_error(rid.clone(), &e))?;
        omnidesk_db::upsert_product_from_channel(&state.pool, &product)
            .await
            .map_err(|e| map_db_error(rid.clone(), &e))?;
        "product_upserted"
    } else {
        tracing::info!(event_id, %topic, "webhooks: acknowledged unhandled shopify topic");
        "ignored"
    };

    Ok(ApiResponse::new(
        WebhookAck {
            event_id,
            topic,
            action,
        },
        req_id.0,
    ))
}

/// POST /api/webhooks/bestbuy
pub(super) async fn bestbuy(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<WebhookAck>>, ApiError> {
    let rid = &req_id.0;
    let payload = parse_body(&body);
    let valid = signature_ok(
        state.config.bestbuy_webhook_secret.as_deref(),
        header_str(&headers, MIRAKL_SIGNATURE_HEADER),
        |secret, header| verify_mirakl(secret, &body, header),
    );

    let order = mirakl_order_payload(&payload);
    let topic = order.as_ref().map_or_else(
        || {
            payload
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_owned()
        },
        |(kind, _)| kind.clone(),
    );

    let event_id = omnidesk_db::record_webhook_event(&state.pool, "bestbuy", &topic, &payload, valid)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;
    if !valid {
        tracing::warn!(event_id, %topic, "webhooks: rejected bestbuy delivery");
        return Err(ApiError::new(rid, "unauthorized", "invalid webhook signature"));
    }

    let action = match order {
        Some((_, data)) => {
            ingest_sale(
                &state.pool,
                Channel::BestBuy,
                data,
                state.config.queue.max_retries,
            )
            .await
            .map_err(|e| map_service_error(rid.clone(), &e))?;
            "enqueued"
        }
        None => {
            tracing::info!(event_id, %topic, "webhooks: acknowledged non-order bestbuy event");
            "ignored"
        }
    };

    Ok(ApiResponse::new(
        WebhookAck {
            event_id,
            topic,
            action,
        },
        req_id.0,
    ))
}

/// GET /api/webhook-events
pub(super) async fn list_events(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<EventQuery>,
) -> Result<Json<ApiResponse<Vec<WebhookEventRow>>>, ApiError> {
    let channel = match query.channel.as_deref() {
        Some(raw) => Some(parse_param::<Channel>(&req_id.0, raw)?),
        None => None,
    };
    let rows = omnidesk_db::list_webhook_events(
        &state.pool,
        channel.map(Channel::as_str),
        normalize_limit(query.limit),
    )
    .await
    .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(rows, req_id.0))
}
