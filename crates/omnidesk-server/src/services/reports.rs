//! KPI derivation, dashboard aggregation, and stored report generation.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use omnidesk_db::{
    ChannelRevenueRow, DailyRow, GeneratedReportRow, KpiInputsRow, NewGeneratedReport,
    OrderTotalsRow, SalesGrouping, StatusCountRow,
};

use super::ServiceError;

pub const DEFAULT_RANGE_DAYS: i64 = 30;

/// Resolves an optional `from`/`to` pair: `to` defaults to `now` and `from`
/// to thirty days before `to`.
///
/// # Errors
///
/// Returns [`ServiceError::Validation`] when `from` is after `to`.
pub fn resolve_range(
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), ServiceError> {
    let to = to.unwrap_or(now);
    let from = from.unwrap_or(to - Duration::days(DEFAULT_RANGE_DAYS));
    if from > to {
        return Err(ServiceError::Validation(
            "'from' must not be after 'to'".to_string(),
        ));
    }
    Ok((from, to))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Kpis {
    pub revenue: Decimal,
    pub order_count: i64,
    pub average_order_value: Decimal,
    pub cancellation_rate: f64,
    pub fulfillment_rate: f64,
    pub avg_fulfillment_hours: Option<f64>,
    pub units_sold: i64,
}

#[allow(clippy::cast_precision_loss)]
fn rate(numerator: i64, denominator: i64) -> f64 {
    if denominator <= 0 {
        return 0.0;
    }
    let value = numerator as f64 / denominator as f64;
    (value * 10_000.0).round() / 10_000.0
}

/// Derives the KPI rates from raw counts. Rates are fractions in `[0, 1]`
/// rounded to four decimals, and `0` when their denominator is zero.
#[must_use]
pub fn compute_kpis(inputs: &KpiInputsRow, average_order_value: Decimal) -> Kpis {
    let non_cancelled = inputs.order_count - inputs.cancelled_count;
    Kpis {
        revenue: inputs.revenue,
        order_count: inputs.order_count,
        average_order_value,
        cancellation_rate: rate(inputs.cancelled_count, inputs.order_count),
        fulfillment_rate: rate(inputs.fulfilled_count, non_cancelled),
        avg_fulfillment_hours: inputs
            .avg_fulfillment_hours
            .map(|hours| (hours * 100.0).round() / 100.0),
        units_sold: inputs.units_sold,
    }
}

/// KPIs over `[from, to]`.
///
/// # Errors
///
/// Returns [`ServiceError::Db`] if a query fails.
pub async fn load_kpis(
    pool: &PgPool,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Kpis, ServiceError> {
    let inputs = omnidesk_db::kpi_inputs(pool, from, to).await?;
    let totals = omnidesk_db::order_totals(pool, from, to).await?;
    Ok(compute_kpis(&inputs, totals.average_order_value))
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub totals: OrderTotalsRow,
    pub orders_by_status: Vec<StatusCountRow>,
    pub revenue_by_channel: Vec<ChannelRevenueRow>,
    pub daily: Vec<DailyRow>,
}

/// # Errors
///
/// Returns [`ServiceError::Db`] if a query fails.
pub async fn load_dashboard(
    pool: &PgPool,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Dashboard, ServiceError> {
    Ok(Dashboard {
        from,
        to,
        totals: omnidesk_db::order_totals(pool, from, to).await?,
        orders_by_status: omnidesk_db::orders_by_status(pool, from, to).await?,
        revenue_by_channel: omnidesk_db::revenue_by_channel(pool, from, to).await?,
        daily: omnidesk_db::daily_series(pool, from, to).await?,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    Sales,
    TopProducts,
    Inventory,
    Kpis,
}

impl ReportType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ReportType::Sales => "sales",
            ReportType::TopProducts => "top_products",
            ReportType::Inventory => "inventory",
            ReportType::Kpis => "kpis",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Json,
    Csv,
}

impl ReportFormat {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Csv => "csv",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportRequest {
    pub report_type: ReportType,
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub format: ReportFormat,
    /// Bucket for `sales` reports: `day`, `week`, `month` or `channel`.
    #[serde(default)]
    pub group_by: Option<String>,
}

const TOP_PRODUCTS_REPORT_LIMIT: i64 = 100;

/// Serializes rows as CSV with a header line taken from the field names.
///
/// # Errors
///
/// Returns [`ServiceError::Report`] if a row cannot be serialized.
pub fn to_csv<T: Serialize>(rows: &[T]) -> Result<String, ServiceError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| ServiceError::Report(e.to_string()))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| ServiceError::Report(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| ServiceError::Report(e.to_string()))
}

fn render<T: Serialize>(rows: &[T], format: ReportFormat) -> Result<(String, i32), ServiceError> {
    let content = match format {
        ReportFormat::Json => {
            serde_json::to_string(rows).map_err(|e| ServiceError::Report(e.to_string()))?
        }
        ReportFormat::Csv => to_csv(rows)?,
    };
    Ok((content, i32::try_from(rows.len()).unwrap_or(i32::MAX)))
}

/// Builds the requested report, stores it in `generated_reports`, and
/// returns the stored row.
///
/// # Errors
///
/// Returns [`ServiceError::Validation`] for a bad range or `group_by`, and
/// [`ServiceError::Db`] or [`ServiceError::Report`] otherwise.
pub async fn generate_report(
    pool: &PgPool,
    request: &ReportRequest,
    generated_by: Option<i64>,
) -> Result<GeneratedReportRow, ServiceError> {
    let (from, to) = resolve_range(request.from, request.to, Utc::now())?;
    let format = request.format;

    let (content, row_count) = match request.report_type {
        ReportType::Sales => {
            let grouping = match request.group_by.as_deref() {
                Some(raw) => raw
                    .parse::<SalesGrouping>()
                    .map_err(ServiceError::Validation)?,
                None => SalesGrouping::default(),
            };
            render(&omnidesk_db::sales_report(pool, from, to, grouping).await?, format)?
        }
        ReportType::TopProducts => render(
            &omnidesk_db::top_products(pool, from, to, TOP_PRODUCTS_REPORT_LIMIT).await?,
            format,
        )?,
        ReportType::Inventory => render(&omnidesk_db::inventory_report(pool).await?, format)?,
        ReportType::Kpis => render(&[load_kpis(pool, from, to).await?], format)?,
    };

    let row = omnidesk_db::create_generated_report(
        pool,
        &NewGeneratedReport {
            report_type: request.report_type.as_str(),
            format: format.as_str(),
            period_start: from,
            period_end: to,
            content: &content,
            row_count,
            generated_by,
        },
    )
    .await?;

    tracing::info!(
        report_id = row.id,
        report_type = request.report_type.as_str(),
        format = format.as_str(),
        row_count,
        "reports: generated"
    );
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(order_count: i64, cancelled: i64, fulfilled: i64) -> KpiInputsRow {
        KpiInputsRow {
            order_count,
            revenue: Decimal::new(123_450, 2),
            cancelled_count: cancelled,
            fulfilled_count: fulfilled,
            units_sold: 17,
            avg_fulfillment_hours: Some(26.666_6),
        }
    }

    #[test]
    fn kpi_rates_use_their_own_denominators() {
        let kpis = compute_kpis(&inputs(10, 2, 6), Decimal::new(15_431, 2));

        assert!((kpis.cancellation_rate - 0.2).abs() < 1e-9);
        assert!((kpis.fulfillment_rate - 0.75).abs() < 1e-9);
        assert_eq!(kpis.avg_fulfillment_hours, Some(26.67));
        assert_eq!(kpis.units_sold, 17);
    }

    #[test]
    fn kpi_rates_are_zero_without_orders() {
        let kpis = compute_kpis(&inputs(0, 0, 0), Decimal::ZERO);
        assert!(kpis.cancellation_rate.abs() < f64::EPSILON);
        assert!(kpis.fulfillment_rate.abs() < f64::EPSILON);

        let all_cancelled = compute_kpis(&inputs(3, 3, 0), Decimal::ZERO);
        assert!((all_cancelled.cancellation_rate - 1.0).abs() < f64::EPSILON);
        assert!(all_cancelled.fulfillment_rate.abs() < f64::EPSILON);
    }

    #[test]
    fn range_defaults_to_last_thirty_days() {
        let now = Utc::now();
        let (from, to) = resolve_range(None, None, now).unwrap();
        assert_eq!(to, now);
        assert_eq!(to - from, Duration::days(30));
    }

    #[test]
    fn inverted_range_is_rejected() {
        let now = Utc::now();
        let err = resolve_range(Some(now), Some(now - Duration::days(1)), now).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[test]
    fn csv_has_header_and_rows() {
        #[derive(Serialize)]
        struct Row {
            sku: &'static str,
            units: i64,
        }
        let csv = to_csv(&[Row { sku: "A-1", units: 3 }, Row { sku: "B-2", units: 1 }]).unwrap();
        assert_eq!(csv, "sku,units\nA-1,3\nB-2,1\n");
    }
}
