//! Shipments: creating a fulfillment ships the order; delivering the last
//! open fulfillment delivers it.

use serde::Deserialize;
use serde_json::Value;
use sqlx::PgPool;

use omnidesk_core::OrderStatus;
use omnidesk_db::{FulfillmentRow, OrderRow};

use super::notifications::ExtraVars;
use super::order_status::{transition_in_tx, StatusChange};
use super::ServiceError;

#[derive(Debug, Clone, Deserialize)]
pub struct NewShipment {
    pub carrier: String,
    pub tracking_number: String,
    #[serde(default)]
    pub tracking_url: Option<String>,
    #[serde(default)]
    pub items: Option<Value>,
}

impl NewShipment {
    fn validate(&self) -> Result<(), ServiceError> {
        if self.carrier.trim().is_empty() {
            return Err(ServiceError::Validation("carrier is required".to_string()));
        }
        if self.tracking_number.trim().is_empty() {
            return Err(ServiceError::Validation(
                "tracking_number is required".to_string(),
            ));
        }
        if let Some(items) = &self.items {
            if !items.is_array() {
                return Err(ServiceError::Validation(
                    "items must be an array".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Records a shipped fulfillment and moves the order to `shipped`, which
/// consumes its stock reservation.
///
/// # Errors
///
/// Returns [`ServiceError::Validation`] for a blank carrier or tracking
/// number and [`ServiceError::Core`] if the order cannot ship from its
/// current status.
pub async fn ship_order(
    pool: &PgPool,
    order_id: i64,
    shipment: &NewShipment,
    changed_by: Option<i64>,
    max_retries: i32,
) -> Result<(FulfillmentRow, OrderRow), ServiceError> {
    shipment.validate()?;
    let carrier = shipment.carrier.trim();
    let tracking_number = shipment.tracking_number.trim();

    let mut tx = pool.begin().await?;
    let order = omnidesk_db::get_order(&mut *tx, order_id).await?;

    let change = StatusChange {
        reason: Some("fulfillment created"),
        changed_by,
        extra: ExtraVars {
            tracking_number: Some(tracking_number),
            carrier: Some(carrier),
        },
    };
    let updated = transition_in_tx(&mut tx, &order, OrderStatus::Shipped, &change, max_retries)
        .await?;

    let items = shipment
        .items
        .clone()
        .unwrap_or_else(|| Value::Array(Vec::new()));
    let fulfillment = omnidesk_db::create_fulfillment(
        &mut *tx,
        order_id,
        carrier,
        tracking_number,
        shipment.tracking_url.as_deref(),
        &items,
    )
    .await?;
    tx.commit().await?;

    tracing::info!(
        order_id,
        fulfillment_id = fulfillment.id,
        carrier,
        "fulfillment: order shipped"
    );
    Ok((fulfillment, updated))
}

/// Marks a fulfillment delivered. When none of the order's fulfillments
/// remain open and the order is `shipped`, the order moves to `delivered`
/// and the updated order is returned.
///
/// # Errors
///
/// Returns [`omnidesk_db::DbError::NotFound`] for an unknown id and
/// [`omnidesk_db::DbError::StaleStatus`] if it is not currently shipped.
pub async fn mark_delivered(
    pool: &PgPool,
    fulfillment_id: i64,
    changed_by: Option<i64>,
    max_retries: i32,
) -> Result<(FulfillmentRow, Option<OrderRow>), ServiceError> {
    let mut tx = pool.begin().await?;
    omnidesk_db::get_fulfillment(&mut *tx, fulfillment_id).await?;
    let fulfillment = omnidesk_db::mark_fulfillment_delivered(&mut *tx, fulfillment_id).await?;

    let open = omnidesk_db::count_undelivered_fulfillments(&mut *tx, fulfillment.order_id).await?;
    let mut delivered_order = None;
    if open == 0 {
        let order = omnidesk_db::get_order(&mut *tx, fulfillment.order_id).await?;
        let status: OrderStatus = order.status.parse()?;
        if status.can_transition_to(OrderStatus::Delivered) {
            let change = StatusChange {
                reason: Some("all fulfillments delivered"),
                changed_by,
                extra: ExtraVars {
                    tracking_number: Some(&fulfillment.tracking_number),
                    carrier: Some(&fulfillment.carrier),
                },
            };
            delivered_order = Some(
                transition_in_tx(&mut tx, &order, OrderStatus::Delivered, &change, max_retries)
                    .await?,
            );
        }
    }

    tx.commit().await?;
    Ok((fulfillment, delivered_order))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn shipment(carrier: &str, tracking: &str, items: Option<Value>) -> NewShipment {
        NewShipment {
            carrier: carrier.to_string(),
            tracking_number: tracking.to_string(),
            tracking_url: None,
            items,
        }
    }

    #[test]
    fn shipment_requires_carrier_and_tracking() {
        assert!(shipment("UPS", "1Z999", None).validate().is_ok());
        assert!(shipment(" ", "1Z999", None).validate().is_err());
        assert!(shipment("UPS", "", None).validate().is_err());
    }

    #[test]
    fn shipment_items_must_be_a_list() {
        assert!(shipment("UPS", "1Z999", Some(json!([{ "sku": "A", "quantity": 1 }])))
            .validate()
            .is_ok());
        assert!(shipment("UPS", "1Z999", Some(json!({ "sku": "A" })))
            .validate()
            .is_err());
    }
}
