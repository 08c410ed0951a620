//! Database operations for `products` and `channel_products`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use omnidesk_core::NormalizedProduct;

use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `products` table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ProductRow {
    pub id: i64,
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub price: Decimal,
    pub cost: Option<Decimal>,
    pub currency: String,
    /// `active`, `draft`, or `archived`.
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A row from the `channel_products` table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ChannelProductRow {
    pub id: i64,
    pub product_id: i64,
    pub channel: String,
    pub external_id: String,
    pub channel_sku: Option<String>,
    pub channel_price: Option<Decimal>,
    pub status: String,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub price: Decimal,
    pub cost: Option<Decimal>,
    pub currency: Option<String>,
    pub status: Option<String>,
}

/// Partial update; `None` leaves the column unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductUpdate {
    pub sku: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub price: Option<Decimal>,
    pub cost: Option<Decimal>,
    pub currency: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelListing {
    pub external_id: String,
    pub channel_sku: Option<String>,
    pub channel_price: Option<Decimal>,
    pub status: Option<String>,
}

const PRODUCT_COLUMNS: &str = "id, sku, name, description, brand, category, price, cost, \
                               currency, status, created_at, updated_at";

// ---------------------------------------------------------------------------
// products operations
// ---------------------------------------------------------------------------

/// Lists products, newest first. `search` matches SKU or name, case-insensitively.
///
/// Returns the page and the total number of matching rows.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_products(
    pool: &PgPool,
    search: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<ProductRow>, i64), DbError> {
    let pattern = search
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{s}%"));

    let rows = sqlx::query_as::<_, ProductRow>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products \
         WHERE ($1::text IS NULL OR sku ILIKE $1 OR name ILIKE $1) \
         ORDER BY created_at DESC, id DESC \
         LIMIT $2 OFFSET $3"
    ))
    .bind(&pattern)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let total = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM products \
         WHERE ($1::text IS NULL OR sku ILIKE $1 OR name ILIKE $1)",
    )
    .bind(&pattern)
    .fetch_one(pool)
    .await?;

    Ok((rows, total))
}

/// Fetches a product by id.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if absent, or [`DbError::Sqlx`].
pub async fn get_product(pool: &PgPool, id: i64) -> Result<ProductRow, DbError> {
    sqlx::query_as::<_, ProductRow>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Fetches a product by SKU, if one exists.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_product_by_sku(pool: &PgPool, sku: &str) -> Result<Option<ProductRow>, DbError> {
    let row = sqlx::query_as::<_, ProductRow>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE sku = $1"
    ))
    .bind(sku)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Inserts a product. Currency defaults to `CAD`, status to `active`.
///
/// # Errors
///
/// Returns [`DbError::Conflict`] if the SKU exists, or [`DbError::Sqlx`].
pub async fn create_product(pool: &PgPool, product: &NewProduct) -> Result<ProductRow, DbError> {
    sqlx::query_as::<_, ProductRow>(&format!(
        "INSERT INTO products \
             (sku, name, description, brand, category, price, cost, currency, status) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, COALESCE($8, 'CAD'), COALESCE($9, 'active')) \
         RETURNING {PRODUCT_COLUMNS}"
    ))
    .bind(&product.sku)
    .bind(&product.name)
    .bind(&product.description)
    .bind(&product.brand)
    .bind(&product.category)
    .bind(product.price)
    .bind(product.cost)
    .bind(&product.currency)
    .bind(&product.status)
    .fetch_one(pool)
    .await
    .map_err(|e| DbError::unique_or(e, format!("sku '{}' already exists", product.sku)))
}

/// Applies a partial update.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if absent, [`DbError::Conflict`] if the new
/// SKU is taken, or [`DbError::Sqlx`].
pub async fn update_product(
    pool: &PgPool,
    id: i64,
    update: &ProductUpdate,
) -> Result<ProductRow, DbError> {
    sqlx::query_as::<_, ProductRow>(&format!(
        "UPDATE products SET \
             sku         = COALESCE($2, sku), \
             name        = COALESCE($3, name), \
             description = COALESCE($4, description), \
             brand       = COALESCE($5, brand), \
             category    = COALESCE($6, category), \
             price       = COALESCE($7, price), \
             cost        = COALESCE($8, cost), \
             currency    = COALESCE($9, currency), \
             status      = COALESCE($10, status), \
             updated_at  = NOW() \
         WHERE id = $1 \
         RETURNING {PRODUCT_COLUMNS}"
    ))
    .bind(id)
    .bind(&update.sku)
    .bind(&update.name)
    .bind(&update.description)
    .bind(&update.brand)
    .bind(&update.category)
    .bind(update.price)
    .bind(update.cost)
    .bind(&update.currency)
    .bind(&update.status)
    .fetch_optional(pool)
    .await
    .map_err(|e| DbError::unique_or(e, "sku already exists"))?
    .ok_or(DbError::NotFound)
}

/// Soft-deletes a product by moving it to `archived`.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if absent, or [`DbError::Sqlx`].
pub async fn archive_product(pool: &PgPool, id: i64) -> Result<ProductRow, DbError> {
    sqlx::query_as::<_, ProductRow>(&format!(
        "UPDATE products SET status = 'archived', updated_at = NOW() \
         WHERE id = $1 \
         RETURNING {PRODUCT_COLUMNS}"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Upserts a channel-sourced product on `sku` and its listing on
/// `(product_id, channel)`. Returns the product id.
///
/// # Errors
///
/// Returns [`DbError::Conflict`] if the channel's `external_id` already
/// belongs to another product, or [`DbError::Sqlx`].
pub async fn upsert_product_from_channel(
    pool: &PgPool,
    product: &NormalizedProduct,
) -> Result<i64, DbError> {
    let mut tx = pool.begin().await?;

    let product_id: i64 = sqlx::query_scalar::<_, i64>(
        "INSERT INTO products (sku, name, description, brand, category, price, currency, status) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         ON CONFLICT (sku) DO UPDATE SET \
             name        = EXCLUDED.name, \
             description = COALESCE(EXCLUDED.description, products.description), \
             brand       = COALESCE(EXCLUDED.brand, products.brand), \
             category    = COALESCE(EXCLUDED.category, products.category), \
             updated_at  = NOW() \
         RETURNING id",
    )
    .bind(&product.sku)
    .bind(&product.name)
    .bind(&product.description)
    .bind(&product.brand)
    .bind(&product.category)
    .bind(product.price)
    .bind(&product.currency)
    .bind(&product.status)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO channel_products \
             (product_id, channel, external_id, channel_sku, channel_price, status, last_synced_at) \
         VALUES ($1, $2, $3, $4, $5, $6, NOW()) \
         ON CONFLICT (product_id, channel) DO UPDATE SET \
             external_id    = EXCLUDED.external_id, \
             channel_sku    = EXCLUDED.channel_sku, \
             channel_price  = EXCLUDED.channel_price, \
             status         = EXCLUDED.status, \
             last_synced_at = NOW(), \
             updated_at     = NOW()",
    )
    .bind(product_id)
    .bind(product.channel.as_str())
    .bind(&product.external_id)
    .bind(&product.channel_sku)
    .bind(product.price)
    .bind(&product.status)
    .execute(&mut *tx)
    .await
    .map_err(|e| {
        DbError::unique_or(
            e,
            format!(
                "{} listing '{}' belongs to another product",
                product.channel, product.external_id
            ),
        )
    })?;

    tx.commit().await?;
    Ok(product_id)
}

// ---------------------------------------------------------------------------
// channel_products operations
// ---------------------------------------------------------------------------

/// Lists a product's channel listings.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_channel_products(
    pool: &PgPool,
    product_id: i64,
) -> Result<Vec<ChannelProductRow>, DbError> {
    let rows = sqlx::query_as::<_, ChannelProductRow>(
        "SELECT id, product_id, channel, external_id, channel_sku, channel_price, status, \
                last_synced_at, updated_at \
         FROM channel_products \
         WHERE product_id = $1 \
         ORDER BY channel",
    )
    .bind(product_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Creates or replaces a product's listing on one channel.
///
/// # Errors
///
/// Returns [`DbError::Conflict`] if `external_id` is mapped to a different
/// product on that channel, or [`DbError::Sqlx`].
pub async fn upsert_channel_product(
    pool: &PgPool,
    product_id: i64,
    channel: &str,
    listing: &ChannelListing,
) -> Result<ChannelProductRow, DbError> {
    sqlx::query_as::<_, ChannelProductRow>(
        "INSERT INTO channel_products \
             (product_id, channel, external_id, channel_sku, channel_price, status) \
         VALUES ($1, $2, $3, $4, $5, COALESCE($6, 'active')) \
         ON CONFLICT (product_id, channel) DO UPDATE SET \
             external_id   = EXCLUDED.external_id, \
             channel_sku   = EXCLUDED.channel_sku, \
             channel_price = EXCLUDED.channel_price, \
             status        = EXCLUDED.status, \
             updated_at    = NOW() \
         RETURNING id, product_id, channel, external_id, channel_sku, channel_price, status, \
                   last_synced_at, updated_at",
    )
    .bind(product_id)
    .bind(channel)
    .bind(&listing.external_id)
    .bind(&listing.channel_sku)
    .bind(listing.channel_price)
    .bind(&listing.status)
    .fetch_one(pool)
    .await
    .map_err(|e| {
        DbError::unique_or(
            e,
            format!("{channel} listing '{}' belongs to another product", listing.external_id),
        )
    })
}
