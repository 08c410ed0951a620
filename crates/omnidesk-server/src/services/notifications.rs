//! Customer notification rendering, enqueueing, and delivery.

use std::collections::HashMap;

use chrono::Utc;
use sqlx::{PgExecutor, PgPool};

use omnidesk_core::{
    claim_cutoff, next_retry, render_template, NotificationTemplate, QueueSettings,
    RetryDecision,
};
use omnidesk_db::{DbError, NewNotification, NotificationRow, OrderRow};

use crate::mailer::{Email, Mailer};

use super::{error_text, log_settlement, BatchOutcome, ServiceError, Worker};

/// Placeholder values beyond the ones every order provides.
#[derive(Debug, Clone, Default)]
pub struct ExtraVars<'a> {
    pub tracking_number: Option<&'a str>,
    pub carrier: Option<&'a str>,
}

fn order_vars(order: &OrderRow, extra: &ExtraVars<'_>) -> HashMap<&'static str, String> {
    let mut vars = HashMap::new();
    vars.insert("order_number", order.order_number.clone());
    vars.insert(
        "customer_name",
        order
            .customer_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| "customer".to_string()),
    );
    vars.insert("status", order.status.replace('_', " "));
    if let Some(tracking) = extra.tracking_number {
        vars.insert("tracking_number", tracking.to_string());
    }
    if let Some(carrier) = extra.carrier {
        vars.insert("carrier", carrier.to_string());
    }
    vars
}

/// Renders `template` for `order`, returning `(subject, body)`.
#[must_use]
pub fn render_for_order(
    template: &NotificationTemplate,
    order: &OrderRow,
    extra: &ExtraVars<'_>,
) -> (String, String) {
    let vars = order_vars(order, extra);
    (
        render_template(template.subject, &vars),
        render_template(template.body, &vars),
    )
}

/// Queues `template` for the order's customer.
///
/// Returns `Ok(None)` without queueing anything when the order has no
/// customer email.
///
/// # Errors
///
/// Returns [`DbError`] if the insert fails.
pub async fn enqueue_for_order<'e, E: PgExecutor<'e>>(
    executor: E,
    order: &OrderRow,
    template: &NotificationTemplate,
    extra: &ExtraVars<'_>,
    max_retries: i32,
) -> Result<Option<NotificationRow>, DbError> {
    let Some(recipient) = order
        .customer_email
        .as_deref()
        .map(str::trim)
        .filter(|email| !email.is_empty())
    else {
        tracing::info!(
            order_id = order.id,
            template = template.name,
            "notifications: order has no customer email; skipping"
        );
        return Ok(None);
    };

    let (subject, body) = render_for_order(template, order, extra);
    let row = omnidesk_db::enqueue_notification(
        executor,
        &NewNotification {
            order_id: Some(order.id),
            recipient,
            template: template.name,
            subject: &subject,
            body: &body,
            max_retries,
        },
    )
    .await?;
    Ok(Some(row))
}

/// Manually queues a named template for an order.
///
/// # Errors
///
/// Returns [`ServiceError::Validation`] for an unknown template or an order
/// without a customer email, and [`ServiceError::Db`] otherwise.
pub async fn enqueue_manual(
    pool: &PgPool,
    order_id: i64,
    template_name: &str,
    max_retries: i32,
) -> Result<NotificationRow, ServiceError> {
    let template = NotificationTemplate::by_name(template_name).ok_or_else(|| {
        ServiceError::Validation(format!("unknown notification template '{template_name}'"))
    })?;
    let order = omnidesk_db::get_order(pool, order_id).await?;
    enqueue_for_order(pool, &order, template, &ExtraVars::default(), max_retries)
        .await?
        .ok_or_else(|| ServiceError::Validation("order has no customer email".to_string()))
}

/// Requeues abandoned sends, then claims one batch of due notifications and
/// sends each through `mailer`.
///
/// # Errors
///
/// Returns [`ServiceError::Db`] if the batch cannot be claimed. Per-row
/// failures are recorded on the row and counted, not returned.
pub async fn process_notification_batch<M: Mailer>(
    pool: &PgPool,
    mailer: &M,
    settings: &QueueSettings,
) -> Result<BatchOutcome, ServiceError> {
    let expired = omnidesk_db::requeue_expired_notifications(
        pool,
        claim_cutoff(Utc::now(), settings.claim_timeout_secs),
    )
    .await?;
    if expired > 0 {
        tracing::warn!(expired, "notifications: requeued abandoned sends");
    }

    let rows = omnidesk_db::claim_due_notifications(pool, settings.batch_size).await?;
    let mut outcome = BatchOutcome {
        expired,
        claimed: rows.len(),
        ..BatchOutcome::default()
    };

    for row in rows {
        let email = Email {
            to: row.recipient.clone(),
            subject: row.subject.clone(),
            body: row.body.clone(),
        };
        let written = match mailer.send(&email).await {
            Ok(()) => {
                outcome.succeeded += 1;
                omnidesk_db::mark_notification_sent(pool, row.id).await
            }
            Err(e) => {
                tracing::warn!(notification_id = row.id, error = %e, "notifications: send failed");
                outcome.failed += 1;
                let message = error_text(&e);
                match next_retry(
                    row.retry_count,
                    row.max_retries,
                    settings.backoff_base_secs,
                    Utc::now(),
                ) {
                    RetryDecision::Retry {
                        retry_count,
                        next_attempt_at,
                    } => {
                        omnidesk_db::reschedule_notification(
                            pool,
                            row.id,
                            retry_count,
                            next_attempt_at,
                            &message,
                        )
                        .await
                    }
                    RetryDecision::GiveUp { retry_count } => {
                        omnidesk_db::fail_notification(pool, row.id, retry_count, &message).await
                    }
                }
            }
        };
        log_settlement(Worker::Notifications, row.id, written);
    }

    if outcome.claimed > 0 {
        tracing::info!(
            claimed = outcome.claimed,
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            "notifications: batch processed"
        );
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::*;

    fn order(customer_name: Option<&str>) -> OrderRow {
        OrderRow {
            id: 1,
            channel: "shopify".to_string(),
            external_order_id: "450789469".to_string(),
            order_number: "#1001".to_string(),
            status: "on_hold".to_string(),
            customer_name: customer_name.map(str::to_string),
            customer_email: Some("jane@example.com".to_string()),
            currency: "CAD".to_string(),
            subtotal: Decimal::new(5_000, 2),
            tax: Decimal::ZERO,
            shipping: Decimal::ZERO,
            discount: Decimal::ZERO,
            total: Decimal::new(5_000, 2),
            shipping_address: json!({}),
            tags: vec![],
            notes: None,
            ordered_at: Utc::now(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn renders_shipped_template_with_tracking() {
        let template = NotificationTemplate::by_name("order_shipped").unwrap();
        let extra = ExtraVars {
            tracking_number: Some("1Z999"),
            carrier: Some("UPS"),
        };
        let (subject, body) = render_for_order(template, &order(Some("Jane Doe")), &extra);

        assert!(subject.contains("#1001"));
        assert!(body.contains("Jane Doe"));
        assert!(body.contains("1Z999"));
        assert!(body.contains("UPS"));
    }

    #[test]
    fn missing_customer_name_falls_back_to_generic_greeting() {
        let vars = order_vars(&order(None), &ExtraVars::default());
        assert_eq!(vars["customer_name"], "customer");
        assert_eq!(vars["status"], "on hold");
        assert!(!vars.contains_key("tracking_number"));
    }
}
