use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::Channel;

/// A product listing mapped from a channel payload, normalized for storage
/// in `products` and `channel_products`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedProduct {
    pub channel: Channel,
    /// Channel-side product or offer ID, stored as a string to avoid precision loss.
    pub external_id: String,
    /// Merchant SKU shared across channels; the join key to `products.sku`.
    pub sku: String,
    /// SKU as the channel knows it, when different from `sku`.
    pub channel_sku: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub price: Decimal,
    pub currency: String,
    /// Stock reported by the channel, when the payload carries one.
    pub quantity: Option<i32>,
    /// `"active"` or `"draft"`.
    pub status: String,
}

impl NormalizedProduct {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}
