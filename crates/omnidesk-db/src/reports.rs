//! Read-only aggregates behind the analytics and report endpoints, plus
//! storage for `generated_reports`.
//!
//! Revenue counts orders that were not cancelled or refunded. Every range
//! filter is inclusive on both ends and applies to `ordered_at`.

use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;

use crate::{DbError, StatusCountRow};

const REVENUE_STATUSES: &str = "status NOT IN ('cancelled', 'refunded')";

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct OrderTotalsRow {
    pub order_count: i64,
    pub revenue: Decimal,
    pub average_order_value: Decimal,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ChannelRevenueRow {
    pub channel: String,
    pub order_count: i64,
    pub revenue: Decimal,
    pub average_order_value: Decimal,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DailyRow {
    pub day: NaiveDate,
    pub order_count: i64,
    pub revenue: Decimal,
}

/// Raw counts from which the KPI rates are derived.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct KpiInputsRow {
    pub order_count: i64,
    pub revenue: Decimal,
    pub cancelled_count: i64,
    /// Orders in `shipped`, `delivered`, or `completed`.
    pub fulfilled_count: i64,
    pub units_sold: i64,
    /// Mean hours from order creation to first shipment.
    pub avg_fulfillment_hours: Option<f64>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SalesGroupRow {
    pub bucket: String,
    pub order_count: i64,
    pub revenue: Decimal,
    pub units: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TopProductRow {
    pub sku: Option<String>,
    pub title: String,
    pub units: i64,
    pub revenue: Decimal,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct InventoryReportRow {
    pub product_id: i64,
    pub sku: String,
    pub name: String,
    pub status: String,
    pub quantity: i64,
    pub reserved: i64,
    pub available: i64,
    pub reorder_point: i64,
    pub low_stock: bool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct GeneratedReportRow {
    pub id: i64,
    pub report_type: String,
    pub format: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub content: String,
    pub row_count: i32,
    pub generated_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// A generated report without its (possibly large) content.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct GeneratedReportSummaryRow {
    pub id: i64,
    pub report_type: String,
    pub format: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub row_count: i32,
    pub generated_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewGeneratedReport<'a> {
    pub report_type: &'a str,
    pub format: &'a str,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub content: &'a str,
    pub row_count: i32,
    pub generated_by: Option<i64>,
}

/// How [`sales_report`] buckets orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SalesGrouping {
    #[default]
    Day,
    Week,
    Month,
    Channel,
}

impl SalesGrouping {
    fn bucket_sql(self) -> &'static str {
        match self {
            SalesGrouping::Day => "to_char(date_trunc('day', o.ordered_at), 'YYYY-MM-DD')",
            SalesGrouping::Week => "to_char(date_trunc('week', o.ordered_at), 'YYYY-MM-DD')",
            SalesGrouping::Month => "to_char(date_trunc('month', o.ordered_at), 'YYYY-MM')",
            SalesGrouping::Channel => "o.channel",
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SalesGrouping::Day => "day",
            SalesGrouping::Week => "week",
            SalesGrouping::Month => "month",
            SalesGrouping::Channel => "channel",
        }
    }
}

impl fmt::Display for SalesGrouping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SalesGrouping {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(SalesGrouping::Day),
            "week" => Ok(SalesGrouping::Week),
            "month" => Ok(SalesGrouping::Month),
            "channel" => Ok(SalesGrouping::Channel),
            other => Err(format!("unknown group_by '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

/// Order count, revenue, and average order value over the range.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn order_totals(
    pool: &PgPool,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<OrderTotalsRow, DbError> {
    let row = sqlx::query_as::<_, OrderTotalsRow>(&format!(
        "SELECT COUNT(*) AS order_count, \
                COALESCE(SUM(total) FILTER (WHERE {REVENUE_STATUSES}), 0) AS revenue, \
                COALESCE(ROUND(AVG(total) FILTER (WHERE {REVENUE_STATUSES}), 2), 0) \
                    AS average_order_value \
         FROM sales_orders \
         WHERE ordered_at BETWEEN $1 AND $2"
    ))
    .bind(from)
    .bind(to)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Order counts per status over the range.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn orders_by_status(
    pool: &PgPool,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<StatusCountRow>, DbError> {
    let rows = sqlx::query_as::<_, StatusCountRow>(
        "SELECT status, COUNT(*) AS count FROM sales_orders \
         WHERE ordered_at BETWEEN $1 AND $2 \
         GROUP BY status ORDER BY status",
    )
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Orders, revenue, and AOV per channel over the range.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn revenue_by_channel(
    pool: &PgPool,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<ChannelRevenueRow>, DbError> {
    let rows = sqlx::query_as::<_, ChannelRevenueRow>(&format!(
        "SELECT channel, COUNT(*) AS order_count, \
                COALESCE(SUM(total) FILTER (WHERE {REVENUE_STATUSES}), 0) AS revenue, \
                COALESCE(ROUND(AVG(total) FILTER (WHERE {REVENUE_STATUSES}), 2), 0) \
                    AS average_order_value \
         FROM sales_orders \
         WHERE ordered_at BETWEEN $1 AND $2 \
         GROUP BY channel ORDER BY channel"
    ))
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Orders and revenue per calendar day (UTC) over the range.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn daily_series(
    pool: &PgPool,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<DailyRow>, DbError> {
    let rows = sqlx::query_as::<_, DailyRow>(&format!(
        "SELECT (ordered_at AT TIME ZONE 'UTC')::date AS day, COUNT(*) AS order_count, \
                COALESCE(SUM(total) FILTER (WHERE {REVENUE_STATUSES}), 0) AS revenue \
         FROM sales_orders \
         WHERE ordered_at BETWEEN $1 AND $2 \
         GROUP BY day ORDER BY day"
    ))
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Counts behind the KPI endpoint.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn kpi_inputs(
    pool: &PgPool,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<KpiInputsRow, DbError> {
    let row = sqlx::query_as::<_, KpiInputsRow>(&format!(
        "WITH ranged AS ( \
             SELECT id, status, total, created_at FROM sales_orders \
             WHERE ordered_at BETWEEN $1 AND $2 \
         ), first_ship AS ( \
             SELECT f.order_id, MIN(f.shipped_at) AS shipped_at \
             FROM fulfillments f JOIN ranged r ON r.id = f.order_id \
             WHERE f.shipped_at IS NOT NULL \
             GROUP BY f.order_id \
         ) \
         SELECT \
             (SELECT COUNT(*) FROM ranged) AS order_count, \
             (SELECT COALESCE(SUM(total), 0) FROM ranged WHERE {REVENUE_STATUSES}) AS revenue, \
             (SELECT COUNT(*) FROM ranged WHERE status = 'cancelled') AS cancelled_count, \
             (SELECT COUNT(*) FROM ranged \
                  WHERE status IN ('shipped', 'delivered', 'completed')) AS fulfilled_count, \
             (SELECT COALESCE(SUM(i.quantity), 0)::bigint \
                  FROM order_items i JOIN ranged r ON r.id = i.order_id \
                  WHERE r.status <> 'cancelled') AS units_sold, \
             (SELECT (AVG(EXTRACT(EPOCH FROM (s.shipped_at - r.created_at))) / 3600.0)::float8 \
                  FROM first_ship s JOIN ranged r ON r.id = s.order_id) AS avg_fulfillment_hours"
    ))
    .bind(from)
    .bind(to)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Orders, revenue, and units grouped by `grouping`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn sales_report(
    pool: &PgPool,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    grouping: SalesGrouping,
) -> Result<Vec<SalesGroupRow>, DbError> {
    let bucket = grouping.bucket_sql();
    let rows = sqlx::query_as::<_, SalesGroupRow>(&format!(
        "SELECT {bucket} AS bucket, COUNT(*) AS order_count, \
                COALESCE(SUM(o.total) FILTER (WHERE o.{REVENUE_STATUSES}), 0) AS revenue, \
                COALESCE(SUM(u.units), 0)::bigint AS units \
         FROM sales_orders o \
         LEFT JOIN ( \
             SELECT order_id, SUM(quantity) AS units FROM order_items GROUP BY order_id \
         ) u ON u.order_id = o.id \
         WHERE o.ordered_at BETWEEN $1 AND $2 \
         GROUP BY bucket ORDER BY bucket"
    ))
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Best-selling items by revenue over the range.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn top_products(
    pool: &PgPool,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<TopProductRow>, DbError> {
    let rows = sqlx::query_as::<_, TopProductRow>(&format!(
        "SELECT i.sku, MAX(i.title) AS title, \
                SUM(i.quantity)::bigint AS units, SUM(i.line_total) AS revenue \
         FROM order_items i \
         JOIN sales_orders o ON o.id = i.order_id \
         WHERE o.ordered_at BETWEEN $1 AND $2 AND o.{REVENUE_STATUSES} \
         GROUP BY i.sku, CASE WHEN i.sku IS NULL THEN i.title END \
         ORDER BY revenue DESC, units DESC \
         LIMIT $3"
    ))
    .bind(from)
    .bind(to)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Stock per non-archived product summed across locations.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn inventory_report(pool: &PgPool) -> Result<Vec<InventoryReportRow>, DbError> {
    let rows = sqlx::query_as::<_, InventoryReportRow>(
        "SELECT p.id AS product_id, p.sku, p.name, p.status, \
                COALESCE(SUM(i.quantity), 0)::bigint AS quantity, \
                COALESCE(SUM(i.reserved), 0)::bigint AS reserved, \
                COALESCE(SUM(i.quantity - i.reserved), 0)::bigint AS available, \
                COALESCE(SUM(i.reorder_point), 0)::bigint AS reorder_point, \
                COALESCE(SUM(i.quantity - i.reserved), 0) <= COALESCE(SUM(i.reorder_point), 0) \
                    AS low_stock \
         FROM products p \
         LEFT JOIN inventory i ON i.product_id = p.id \
         WHERE p.status <> 'archived' \
         GROUP BY p.id \
         ORDER BY p.sku",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// generated_reports operations
// ---------------------------------------------------------------------------

/// Stores a generated report.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn create_generated_report(
    pool: &PgPool,
    report: &NewGeneratedReport<'_>,
) -> Result<GeneratedReportRow, DbError> {
    let row = sqlx::query_as::<_, GeneratedReportRow>(
        "INSERT INTO generated_reports \
             (report_type, format, period_start, period_end, content, row_count, generated_by) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING id, report_type, format, period_start, period_end, content, row_count, \
                   generated_by, created_at",
    )
    .bind(report.report_type)
    .bind(report.format)
    .bind(report.period_start)
    .bind(report.period_end)
    .bind(report.content)
    .bind(report.row_count)
    .bind(report.generated_by)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Lists generated reports, newest first, without their content.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_generated_reports(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<GeneratedReportSummaryRow>, DbError> {
    let rows = sqlx::query_as::<_, GeneratedReportSummaryRow>(
        "SELECT id, report_type, format, period_start, period_end, row_count, generated_by, \
                created_at \
         FROM generated_reports \
         ORDER BY created_at DESC, id DESC \
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Fetches one generated report including its content.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if absent, or [`DbError::Sqlx`].
pub async fn get_generated_report(pool: &PgPool, id: i64) -> Result<GeneratedReportRow, DbError> {
    sqlx::query_as::<_, GeneratedReportRow>(
        "SELECT id, report_type, format, period_start, period_end, content, row_count, \
                generated_by, created_at \
         FROM generated_reports WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grouping_parses_case_insensitively() {
        assert_eq!("Week".parse::<SalesGrouping>(), Ok(SalesGrouping::Week));
        assert_eq!("channel".parse::<SalesGrouping>(), Ok(SalesGrouping::Channel));
        assert!("year".parse::<SalesGrouping>().is_err());
    }

    #[test]
    fn every_grouping_has_a_bucket_expression() {
        for grouping in [
            SalesGrouping::Day,
            SalesGrouping::Week,
            SalesGrouping::Month,
            SalesGrouping::Channel,
        ] {
            assert!(!grouping.bucket_sql().is_empty());
            assert_eq!(grouping.as_str().parse::<SalesGrouping>(), Ok(grouping));
        }
    }
}
