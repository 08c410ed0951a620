//! Catalog, channel listing, and stock handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use omnidesk_core::Channel;
use omnidesk_db::{
    ChannelListing, ChannelProductRow, InventoryRow, LowStockRow, NewProduct, ProductRow,
    ProductUpdate, DEFAULT_LOCATION,
};

use crate::middleware::RequestId;

use super::{
    map_db_error, normalize_limit, normalize_offset, parse_param, ApiError, ApiResponse,
    AppState, Page,
};

const PRODUCT_STATUSES: [&str; 3] = ["active", "draft", "archived"];

#[derive(Debug, Deserialize)]
pub(super) struct ProductQuery {
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(super) struct LimitQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(super) struct SetInventoryRequest {
    #[serde(default)]
    pub location: Option<String>,
    pub quantity: i32,
    #[serde(default)]
    pub reorder_point: Option<i32>,
}

#[derive(Debug, Serialize)]
pub(super) struct InventoryUpdate {
    #[serde(flatten)]
    row: InventoryRow,
    /// Set when the requested quantity was negative and stored as zero.
    clamped: bool,
}

fn validation(req_id: &str, message: impl Into<String>) -> ApiError {
    ApiError::new(req_id, "validation_error", message)
}

fn check_price(req_id: &str, field: &str, value: Option<Decimal>) -> Result<(), ApiError> {
    match value {
        Some(v) if v < Decimal::ZERO => {
            Err(validation(req_id, format!("{field} must be >= 0")))
        }
        _ => Ok(()),
    }
}

fn check_status(req_id: &str, status: Option<&str>) -> Result<(), ApiError> {
    match status {
        Some(s) if !PRODUCT_STATUSES.contains(&s) => Err(validation(
            req_id,
            format!("status must be one of {}", PRODUCT_STATUSES.join(", ")),
        )),
        _ => Ok(()),
    }
}

fn validate_new(req_id: &str, product: &NewProduct) -> Result<(), ApiError> {
    if product.sku.trim().is_empty() {
        return Err(validation(req_id, "sku is required"));
    }
    if product.name.trim().is_empty() {
        return Err(validation(req_id, "name is required"));
    }
    check_price(req_id, "price", Some(product.price))?;
    check_price(req_id, "cost", product.cost)?;
    check_status(req_id, product.status.as_deref())
}

fn validate_update(req_id: &str, update: &ProductUpdate) -> Result<(), ApiError> {
    if update.sku.as_deref().is_some_and(|s| s.trim().is_empty()) {
        return Err(validation(req_id, "sku must not be blank"));
    }
    if update.name.as_deref().is_some_and(|s| s.trim().is_empty()) {
        return Err(validation(req_id, "name must not be blank"));
    }
    check_price(req_id, "price", update.price)?;
    check_price(req_id, "cost", update.cost)?;
    check_status(req_id, update.status.as_deref())
}

pub(super) async fn list_products(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<ProductQuery>,
) -> Result<Json<ApiResponse<Page<ProductRow>>>, ApiError> {
    let limit = normalize_limit(query.limit);
    let offset = normalize_offset(query.offset);
    let search = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let (items, total) = omnidesk_db::list_products(&state.pool, search, limit, offset)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    Ok(ApiResponse::new(
        Page {
            items,
            total,
            limit,
            offset,
        },
        req_id.0,
    ))
}

pub(super) async fn get_product(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<ProductRow>>, ApiError> {
    let row = omnidesk_db::get_product(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(row, req_id.0))
}

pub(super) async fn create_product(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<NewProduct>,
) -> Result<(StatusCode, Json<ApiResponse<ProductRow>>), ApiError> {
    validate_new(&req_id.0, &body)?;
    let row = omnidesk_db::create_product(&state.pool, &body)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    tracing::info!(product_id = row.id, sku = %row.sku, "product created");
    Ok((StatusCode::CREATED, ApiResponse::new(row, req_id.0)))
}

pub(super) async fn update_product(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
    Json(body): Json<ProductUpdate>,
) -> Result<Json<ApiResponse<ProductRow>>, ApiError> {
    validate_update(&req_id.0, &body)?;
    let row = omnidesk_db::update_product(&state.pool, id, &body)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(row, req_id.0))
}

/// DELETE /api/products/{id}: archives rather than deletes.
pub(super) async fn archive_product(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<ProductRow>>, ApiError> {
    let row = omnidesk_db::archive_product(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    tracing::info!(product_id = id, "product archived");
    Ok(ApiResponse::new(row, req_id.0))
}

pub(super) async fn list_product_channels(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<ChannelProductRow>>>, ApiError> {
    omnidesk_db::get_product(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    let rows = omnidesk_db::list_channel_products(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(rows, req_id.0))
}

pub(super) async fn upsert_product_channel(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path((id, channel)): Path<(i64, String)>,
    Json(body): Json<ChannelListing>,
) -> Result<Json<ApiResponse<ChannelProductRow>>, ApiError> {
    let rid = &req_id.0;
    let channel: Channel = parse_param(rid, &channel)?;
    if body.external_id.trim().is_empty() {
        return Err(validation(rid, "external_id is required"));
    }
    check_price(rid, "channel_price", body.channel_price)?;

    omnidesk_db::get_product(&state.pool, id)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;
    let row = omnidesk_db::upsert_channel_product(&state.pool, id, channel.as_str(), &body)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;
    Ok(ApiResponse::new(row, req_id.0))
}

pub(super) async fn list_inventory(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<InventoryRow>>>, ApiError> {
    omnidesk_db::get_product(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    let rows = omnidesk_db::list_inventory(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(rows, req_id.0))
}

/// PUT /api/products/{id}/inventory: negative quantities are stored as zero.
pub(super) async fn set_inventory(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
    Json(body): Json<SetInventoryRequest>,
) -> Result<Json<ApiResponse<InventoryUpdate>>, ApiError> {
    let rid = &req_id.0;
    if body.reorder_point.is_some_and(|p| p < 0) {
        return Err(validation(rid, "reorder_point must be >= 0"));
    }
    let location = body
        .location
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .unwrap_or(DEFAULT_LOCATION);

    omnidesk_db::get_product(&state.pool, id)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;
    let (row, clamped) =
        omnidesk_db::set_inventory(&state.pool, id, location, body.quantity, body.reorder_point)
            .await
            .map_err(|e| map_db_error(rid.clone(), &e))?;
    if clamped {
        tracing::warn!(
            product_id = id,
            location,
            requested = body.quantity,
            "negative inventory quantity clamped to zero"
        );
    }

    Ok(ApiResponse::new(InventoryUpdate { row, clamped }, req_id.0))
}

pub(super) async fn list_low_stock(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<ApiResponse<Vec<LowStockRow>>>, ApiError> {
    let rows = omnidesk_db::list_low_stock(&state.pool, normalize_limit(query.limit))
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(rows, req_id.0))
}
