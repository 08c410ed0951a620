//! Order manager handlers: create/upsert, listing, status, and history.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use omnidesk_core::{
    orders::resolve_totals, Channel, NormalizedLineItem, NormalizedOrder, OrderStatus,
};
use omnidesk_db::{OrderFilter, OrderItemRow, OrderRow, StatusHistoryRow};

use crate::middleware::{CurrentUser, RequestId};
use crate::services::order_status::{change_order_status, StatusChange};
use crate::services::sales::store_order;

use super::{
    map_db_error, map_service_error, normalize_limit, normalize_offset, parse_param, ApiError,
    ApiResponse, AppState, Page,
};

const DEFAULT_CURRENCY: &str = "CAD";

#[derive(Debug, Deserialize)]
pub(super) struct OrderQuery {
    pub status: Option<String>,
    pub channel: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// A normalized order as posted by a client. Missing totals are derived
/// from the items.
#[derive(Debug, Deserialize)]
pub(super) struct CreateOrderRequest {
    pub channel: String,
    pub external_order_id: String,
    #[serde(default)]
    pub order_number: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub subtotal: Option<Decimal>,
    #[serde(default)]
    pub tax: Option<Decimal>,
    #[serde(default)]
    pub shipping: Option<Decimal>,
    #[serde(default)]
    pub discount: Option<Decimal>,
    #[serde(default)]
    pub total: Option<Decimal>,
    #[serde(default)]
    pub shipping_address: Option<Value>,
    #[serde(default)]
    pub items: Vec<NormalizedLineItem>,
    #[serde(default)]
    pub ordered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub(super) struct StatusUpdateRequest {
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct OrderDetail {
    #[serde(flatten)]
    order: OrderRow,
    items: Vec<OrderItemRow>,
}

#[derive(Debug, Serialize)]
pub(super) struct OrderStatusView {
    order_id: i64,
    status: String,
    allowed_transitions: Vec<&'static str>,
    is_terminal: bool,
    updated_at: DateTime<Utc>,
}

fn normalize_request(req_id: &str, body: CreateOrderRequest) -> Result<NormalizedOrder, ApiError> {
    let invalid = |message: String| ApiError::new(req_id, "validation_error", message);

    let channel: Channel = parse_param(req_id, &body.channel)?;
    let status = match body.status.as_deref() {
        Some(raw) => parse_param::<OrderStatus>(req_id, raw)?,
        None => OrderStatus::Pending,
    };
    let external_order_id = body.external_order_id.trim().to_owned();
    if external_order_id.is_empty() {
        return Err(invalid("external_order_id is required".to_string()));
    }
    for (index, item) in body.items.iter().enumerate() {
        if item.quantity <= 0 {
            return Err(invalid(format!("items[{index}].quantity must be > 0")));
        }
        if item.unit_price < Decimal::ZERO {
            return Err(invalid(format!("items[{index}].unit_price must be >= 0")));
        }
    }

    let tax = body.tax.unwrap_or_default();
    let shipping = body.shipping.unwrap_or_default();
    let discount = body.discount.unwrap_or_default();
    let (subtotal, total) =
        resolve_totals(&body.items, body.subtotal, tax, shipping, discount, body.total)
            .map_err(|e| invalid(e.to_string()))?;
    if total < Decimal::ZERO {
        return Err(invalid("total must be >= 0".to_string()));
    }

    Ok(NormalizedOrder {
        channel,
        order_number: body
            .order_number
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| external_order_id.clone()),
        external_order_id,
        status,
        customer_name: body.customer_name,
        customer_email: body
            .customer_email
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty()),
        currency: body
            .currency
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        subtotal,
        tax,
        shipping,
        discount,
        total,
        shipping_address: body.shipping_address.unwrap_or(Value::Null),
        items: body.items,
        ordered_at: body.ordered_at.unwrap_or_else(Utc::now),
    })
}

pub(super) async fn list_orders(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<OrderQuery>,
) -> Result<Json<ApiResponse<Page<OrderRow>>>, ApiError> {
    let rid = &req_id.0;
    if let Some(raw) = query.status.as_deref() {
        parse_param::<OrderStatus>(rid, raw)?;
    }
    if let Some(raw) = query.channel.as_deref() {
        parse_param::<Channel>(rid, raw)?;
    }

    let filter = OrderFilter {
        status: query.status.map(|s| s.trim().to_lowercase()),
        channel: query.channel.map(|c| c.trim().to_lowercase()),
        from: query.from,
        to: query.to,
        limit: normalize_limit(query.limit),
        offset: normalize_offset(query.offset),
    };
    let (items, total) = omnidesk_db::list_orders(&state.pool, &filter)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;

    Ok(ApiResponse::new(
        Page {
            items,
            total,
            limit: filter.limit,
            offset: filter.offset,
        },
        req_id.0,
    ))
}

/// POST /api/orders: upserts on `(channel, external_order_id)`. Answers 201
/// for a new order and 200 when an existing one was updated.
pub(super) async fn create_order(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderDetail>>), ApiError> {
    let rid = &req_id.0;
    let normalized = normalize_request(rid, body)?;

    let stored = store_order(&state.pool, &normalized, state.config.queue.max_retries)
        .await
        .map_err(|e| map_service_error(rid.clone(), &e))?;
    let items = omnidesk_db::list_order_items(&state.pool, stored.order.id)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;

    let status = if stored.inserted {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        ApiResponse::new(
            OrderDetail {
                order: stored.order,
                items,
            },
            req_id.0,
        ),
    ))
}

pub(super) async fn get_order(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<OrderDetail>>, ApiError> {
    let order = omnidesk_db::get_order(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    let items = omnidesk_db::list_order_items(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(OrderDetail { order, items }, req_id.0))
}

fn status_view(order: &OrderRow) -> OrderStatusView {
    let allowed = order
        .status
        .parse::<OrderStatus>()
        .map(OrderStatus::allowed_transitions)
        .unwrap_or_default();
    OrderStatusView {
        order_id: order.id,
        status: order.status.clone(),
        allowed_transitions: allowed.iter().map(|s| s.as_str()).collect(),
        is_terminal: allowed.is_empty(),
        updated_at: order.updated_at,
    }
}

pub(super) async fn get_order_status(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<OrderStatusView>>, ApiError> {
    let order = omnidesk_db::get_order(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(status_view(&order), req_id.0))
}

/// PUT /api/orders/{id}/status: 422 when the transition table forbids the
/// move, 409 when the order changed concurrently.
pub(super) async fn update_order_status(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(CurrentUser(claims)): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(body): Json<StatusUpdateRequest>,
) -> Result<Json<ApiResponse<OrderRow>>, ApiError> {
    let rid = &req_id.0;
    let to: OrderStatus = parse_param(rid, &body.status)?;
    let change = StatusChange {
        reason: body.reason.as_deref().map(str::trim).filter(|r| !r.is_empty()),
        changed_by: Some(claims.sub),
        ..StatusChange::default()
    };

    let updated = change_order_status(
        &state.pool,
        id,
        to,
        &change,
        state.config.queue.max_retries,
    )
    .await
    .map_err(|e| map_service_error(rid.clone(), &e))?;
    Ok(ApiResponse::new(updated, req_id.0))
}

pub(super) async fn list_history(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<StatusHistoryRow>>>, ApiError> {
    omnidesk_db::get_order(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    let rows = omnidesk_db::list_status_history(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(rows, req_id.0))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn request(body: Value) -> CreateOrderRequest {
        serde_json::from_value(body).expect("valid request body")
    }

    #[test]
    fn missing_totals_are_derived_from_items() {
        let order = normalize_request(
            "r",
            request(json!({
                "channel": "shopify",
                "external_order_id": "1001",
                "tax": "1.30",
                "shipping": "5.00",
                "discount": "2.00",
                "items": [
                    { "sku": "A-1", "title": "Mug", "quantity": 2, "unit_price": "4.50" },
                    { "sku": null, "title": "Card", "quantity": 1, "unit_price": "1.00" }
                ]
            })),
        )
        .expect("valid order");

        assert_eq!(order.subtotal, Decimal::new(1000, 2));
        assert_eq!(order.total, Decimal::new(1430, 2));
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.order_number, "1001");
        assert_eq!(order.currency, "CAD");
    }

    #[test]
    fn explicit_total_wins() {
        let order = normalize_request(
            "r",
            request(json!({
                "channel": "bestbuy",
                "external_order_id": "BB-9",
                "total": "99.99",
                "items": [{ "title": "TV", "quantity": 1, "unit_price": "10" }]
            })),
        )
        .expect("valid order");
        assert_eq!(order.total, Decimal::new(9999, 2));
    }

    #[test]
    fn unknown_channel_and_bad_quantity_are_rejected() {
        assert!(normalize_request(
            "r",
            request(json!({ "channel": "ebay", "external_order_id": "1" }))
        )
        .is_err());
        assert!(normalize_request(
            "r",
            request(json!({
                "channel": "shopify",
                "external_order_id": "1",
                "items": [{ "title": "Mug", "quantity": 0, "unit_price": "1" }]
            }))
        )
        .is_err());
    }
}
