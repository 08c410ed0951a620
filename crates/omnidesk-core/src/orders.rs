//! Order status workflow and the channel-neutral order shape.
//!
//! [`OrderStatus::allowed_transitions`] is the single source of truth for
//! which status changes are legal. Every status write in the system goes
//! through [`OrderStatus::transition_to`].

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Channel, CoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    OnHold,
    Shipped,
    Delivered,
    Completed,
    Cancelled,
    Refunded,
    Returned,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 10] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::OnHold,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
        OrderStatus::Refunded,
        OrderStatus::Returned,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::OnHold => "on_hold",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
            OrderStatus::Returned => "returned",
        }
    }

    /// Statuses reachable in one step from `self`.
    #[must_use]
    pub fn allowed_transitions(self) -> &'static [OrderStatus] {
        use OrderStatus::{
            Cancelled, Completed, Confirmed, Delivered, OnHold, Pending, Processing, Refunded,
            Returned, Shipped,
        };
        match self {
            Pending => &[Confirmed, Processing, OnHold, Cancelled],
            Confirmed => &[Processing, OnHold, Cancelled],
            Processing => &[Shipped, OnHold, Cancelled],
            OnHold => &[Pending, Confirmed, Processing, Cancelled],
            Shipped => &[Delivered, Returned],
            Delivered => &[Completed, Returned, Refunded],
            Completed => &[Returned, Refunded],
            Returned => &[Refunded],
            Cancelled | Refunded => &[],
        }
    }

    #[must_use]
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    /// Validates a status change against the transition table.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidTransition`] when `next` is not reachable
    /// from `self`, including when `next == self`.
    pub fn transition_to(self, next: OrderStatus) -> Result<OrderStatus, CoreError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Whether an order in this status keeps its units reserved.
    #[must_use]
    pub fn holds_stock(self) -> bool {
        matches!(
            self,
            OrderStatus::Pending
                | OrderStatus::Confirmed
                | OrderStatus::Processing
                | OrderStatus::OnHold
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == needle)
            .ok_or_else(|| CoreError::UnknownStatus(s.to_string()))
    }
}

/// A single purchased line of a [`NormalizedOrder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedLineItem {
    pub sku: Option<String>,
    pub title: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    /// Channel-side product identifier, kept for traceability.
    #[serde(default)]
    pub external_product_id: Option<String>,
}

impl NormalizedLineItem {
    /// `unit_price * quantity`, or `None` when the product overflows.
    #[must_use]
    pub fn line_total(&self) -> Option<Decimal> {
        self.unit_price.checked_mul(Decimal::from(self.quantity))
    }
}

/// An order mapped from any channel's payload into the common schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedOrder {
    pub channel: Channel,
    pub external_order_id: String,
    pub order_number: String,
    pub status: OrderStatus,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub currency: String,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub shipping: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    #[serde(default)]
    pub shipping_address: serde_json::Value,
    pub items: Vec<NormalizedLineItem>,
    pub ordered_at: DateTime<Utc>,
}

/// Resolves the subtotal and total of an order when the payload omits them.
///
/// A missing subtotal falls back to the item sum; a missing total falls back
/// to `subtotal + tax + shipping - discount`.
///
/// # Errors
///
/// Returns [`CoreError::AmountOutOfRange`] when a line total, the item sum or
/// the computed total does not fit in a [`Decimal`], even if the payload
/// carried explicit totals.
pub fn resolve_totals(
    items: &[NormalizedLineItem],
    subtotal: Option<Decimal>,
    tax: Decimal,
    shipping: Decimal,
    discount: Decimal,
    total: Option<Decimal>,
) -> Result<(Decimal, Decimal), CoreError> {
    let item_sum = items_subtotal(items)?;
    let subtotal = subtotal.unwrap_or(item_sum);
    let total = match total {
        Some(total) => total,
        None => subtotal
            .checked_add(tax)
            .and_then(|v| v.checked_add(shipping))
            .and_then(|v| v.checked_sub(discount))
            .ok_or(CoreError::AmountOutOfRange("total"))?,
    };
    Ok((subtotal, total))
}

/// Sum of every line total.
///
/// # Errors
///
/// Returns [`CoreError::AmountOutOfRange`] on overflow.
pub fn items_subtotal(items: &[NormalizedLineItem]) -> Result<Decimal, CoreError> {
    items.iter().try_fold(Decimal::ZERO, |acc, item| {
        item.line_total()
            .ok_or(CoreError::AmountOutOfRange("line total"))
            .and_then(|line| {
                acc.checked_add(line)
                    .ok_or(CoreError::AmountOutOfRange("subtotal"))
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(qty: i32, price: i64) -> NormalizedLineItem {
        NormalizedLineItem {
            sku: Some("SKU-1".to_string()),
            title: "Widget".to_string(),
            quantity: qty,
            unit_price: Decimal::new(price, 2),
            external_product_id: None,
        }
    }

    #[test]
    fn pending_can_be_confirmed_or_cancelled() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Confirmed));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Shipped));
    }

    #[test]
    fn terminal_statuses_have_no_exits() {
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Refunded.is_terminal());
        assert!(!OrderStatus::Returned.is_terminal());
        for next in OrderStatus::ALL {
            assert!(OrderStatus::Cancelled.transition_to(next).is_err());
        }
    }

    #[test]
    fn same_status_is_not_a_transition() {
        for status in OrderStatus::ALL {
            assert!(
                !status.can_transition_to(status),
                "{status} should not transition to itself"
            );
        }
    }

    #[test]
    fn shipped_orders_cannot_be_cancelled() {
        let err = OrderStatus::Shipped
            .transition_to(OrderStatus::Cancelled)
            .unwrap_err();
        assert_eq!(
            err,
            CoreError::InvalidTransition {
                from: OrderStatus::Shipped,
                to: OrderStatus::Cancelled
            }
        );
        assert_eq!(
            err.to_string(),
            "cannot transition order from shipped to cancelled"
        );
    }

    #[test]
    fn happy_path_reaches_completed() {
        let path = [
            OrderStatus::Confirmed,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
            OrderStatus::Completed,
        ];
        let mut current = OrderStatus::Pending;
        for next in path {
            current = current.transition_to(next).expect("allowed step");
        }
        assert_eq!(current, OrderStatus::Completed);
    }

    #[test]
    fn status_parses_snake_case() {
        assert_eq!("on_hold".parse::<OrderStatus>().unwrap(), OrderStatus::OnHold);
        assert_eq!(" Shipped".parse::<OrderStatus>().unwrap(), OrderStatus::Shipped);
        assert!("lost".parse::<OrderStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&OrderStatus::OnHold).unwrap(),
            "\"on_hold\""
        );
    }

    #[test]
    fn resolve_totals_falls_back_to_items() {
        let items = vec![item(2, 1000), item(1, 550)];
        let (subtotal, total) = resolve_totals(
            &items,
            None,
            Decimal::new(300, 2),
            Decimal::new(500, 2),
            Decimal::new(100, 2),
            None,
        )
        .expect("in range");
        assert_eq!(subtotal, Decimal::new(2550, 2));
        assert_eq!(total, Decimal::new(3250, 2));
    }

    #[test]
    fn resolve_totals_keeps_explicit_values() {
        let items = vec![item(1, 1000)];
        let (subtotal, total) = resolve_totals(
            &items,
            Some(Decimal::new(900, 2)),
            Decimal::ZERO,
            Decimal::ZERO,
            Decimal::ZERO,
            Some(Decimal::new(999, 2)),
        )
        .expect("in range");
        assert_eq!(subtotal, Decimal::new(900, 2));
        assert_eq!(total, Decimal::new(999, 2));
    }

    #[test]
    fn oversized_amounts_are_rejected_instead_of_panicking() {
        let huge = NormalizedLineItem {
            unit_price: Decimal::MAX,
            ..item(2, 0)
        };
        assert_eq!(huge.line_total(), None);
        assert_eq!(
            resolve_totals(
                &[huge],
                Some(Decimal::ONE),
                Decimal::ZERO,
                Decimal::ZERO,
                Decimal::ZERO,
                Some(Decimal::ONE),
            ),
            Err(CoreError::AmountOutOfRange("line total"))
        );

        let max_item = NormalizedLineItem {
            unit_price: Decimal::MAX,
            ..item(1, 0)
        };
        assert_eq!(
            resolve_totals(
                &[max_item.clone(), max_item],
                None,
                Decimal::ZERO,
                Decimal::ZERO,
                Decimal::ZERO,
                None,
            ),
            Err(CoreError::AmountOutOfRange("subtotal"))
        );

        assert_eq!(
            resolve_totals(
                &[item(1, 100)],
                Some(Decimal::MAX),
                Decimal::MAX,
                Decimal::ZERO,
                Decimal::ZERO,
                None,
            ),
            Err(CoreError::AmountOutOfRange("total"))
        );
    }

    #[test]
    fn only_open_orders_hold_stock() {
        assert!(OrderStatus::Pending.holds_stock());
        assert!(OrderStatus::OnHold.holds_stock());
        assert!(!OrderStatus::Shipped.holds_stock());
        assert!(!OrderStatus::Cancelled.holds_stock());
        assert!(!OrderStatus::Refunded.holds_stock());
    }
}
