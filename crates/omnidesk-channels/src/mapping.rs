//! Per-channel payload mapping into the common order and product schema.
//!
//! Each channel names the same facts differently; the mappers below read the
//! raw JSON as the channel sends it and produce [`NormalizedOrder`] /
//! [`NormalizedProduct`]. Money may arrive as JSON numbers or numeric
//! strings and is always parsed into `Decimal`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};

use omnidesk_core::{
    orders::resolve_totals, Channel, CoreError, NormalizedLineItem, NormalizedOrder,
    NormalizedProduct, OrderStatus,
};

use crate::error::ChannelError;

const DEFAULT_CURRENCY: &str = "CAD";

/// Maps one raw channel order payload.
///
/// # Errors
///
/// Returns [`ChannelError::Mapping`] naming the first missing or malformed field.
pub fn map_order(channel: Channel, payload: &Value) -> Result<NormalizedOrder, ChannelError> {
    match channel {
        Channel::Shopify => map_shopify_order(payload),
        Channel::BestBuy => map_mirakl_order(payload),
        Channel::Amazon => map_amazon_order(payload),
    }
}

/// Maps one raw channel product (Shopify product, Mirakl offer or Amazon listing).
///
/// # Errors
///
/// Returns [`ChannelError::Mapping`] naming the first missing or malformed field.
pub fn map_product(channel: Channel, payload: &Value) -> Result<NormalizedProduct, ChannelError> {
    match channel {
        Channel::Shopify => map_shopify_product(payload),
        Channel::BestBuy => map_mirakl_offer(payload),
        Channel::Amazon => map_amazon_listing(payload),
    }
}

/// The channel's order identifier, read without mapping the whole payload.
///
/// # Errors
///
/// Returns [`ChannelError::Mapping`] when the identifier is absent.
pub fn external_order_id(channel: Channel, payload: &Value) -> Result<String, ChannelError> {
    let field = match channel {
        Channel::Shopify => "id",
        Channel::BestBuy => "order_id",
        Channel::Amazon => "AmazonOrderId",
    };
    required_id(payload, field)
}

/// Shopify has no single status field; precedence runs from cancellation
/// through refunds and fulfillment to payment.
#[must_use]
pub fn shopify_status(order: &Value) -> OrderStatus {
    let financial = order.get("financial_status").and_then(Value::as_str);
    let fulfillment = order.get("fulfillment_status").and_then(Value::as_str);

    if order.get("cancelled_at").is_some_and(|v| !v.is_null()) {
        OrderStatus::Cancelled
    } else if financial == Some("refunded") {
        OrderStatus::Refunded
    } else if fulfillment == Some("fulfilled") {
        OrderStatus::Shipped
    } else if fulfillment == Some("partial") {
        OrderStatus::Processing
    } else if financial == Some("paid") {
        OrderStatus::Confirmed
    } else {
        OrderStatus::Pending
    }
}

#[must_use]
pub fn mirakl_status(state: &str) -> OrderStatus {
    match state {
        "SHIPPING" => OrderStatus::Processing,
        "SHIPPED" | "TO_COLLECT" => OrderStatus::Shipped,
        "RECEIVED" => OrderStatus::Delivered,
        "CLOSED" => OrderStatus::Completed,
        "REFUSED" | "CANCELED" => OrderStatus::Cancelled,
        "REFUNDED" => OrderStatus::Refunded,
        // STAGING, WAITING_ACCEPTANCE, WAITING_DEBIT, WAITING_DEBIT_PAYMENT and unknown states
        _ => OrderStatus::Pending,
    }
}

#[must_use]
pub fn amazon_status(status: &str) -> OrderStatus {
    match status {
        "Unshipped" => OrderStatus::Confirmed,
        "PartiallyShipped" | "InvoiceUnconfirmed" => OrderStatus::Processing,
        "Shipped" => OrderStatus::Shipped,
        "Canceled" => OrderStatus::Cancelled,
        _ => OrderStatus::Pending,
    }
}

fn map_shopify_order(order: &Value) -> Result<NormalizedOrder, ChannelError> {
    let external_order_id = required_id(order, "id")?;
    let order_number = text(order, "name")
        .or_else(|| text(order, "order_number"))
        .unwrap_or_else(|| external_order_id.clone());

    let customer = order.get("customer");
    let customer_name = customer
        .and_then(|c| full_name(c, "first_name", "last_name"))
        .or_else(|| order.get("shipping_address").and_then(|a| text(a, "name")));
    let customer_email = text(order, "email")
        .or_else(|| text(order, "contact_email"))
        .or_else(|| customer.and_then(|c| text(c, "email")));

    let items = array(order, "line_items")
        .iter()
        .map(|line| {
            Ok(NormalizedLineItem {
                sku: text(line, "sku"),
                title: text(line, "title").unwrap_or_default(),
                quantity: quantity(line, "quantity", "line_items.quantity")?,
                unit_price: money(line.get("price"), "line_items.price")?.unwrap_or_default(),
                external_product_id: text(line, "product_id"),
            })
        })
        .collect::<Result<Vec<_>, ChannelError>>()?;

    let tax = money(order.get("total_tax"), "total_tax")?.unwrap_or_default();
    let shipping = money(
        order.pointer("/total_shipping_price_set/shop_money/amount"),
        "total_shipping_price_set",
    )?
    .unwrap_or_default();
    let discount = money(order.get("total_discounts"), "total_discounts")?.unwrap_or_default();
    let (subtotal, total) = resolve_totals(
        &items,
        money(order.get("subtotal_price"), "subtotal_price")?,
        tax,
        shipping,
        discount,
        money(order.get("total_price"), "total_price")?,
    )
    .map_err(amount_error)?;

    Ok(NormalizedOrder {
        channel: Channel::Shopify,
        external_order_id,
        order_number,
        status: shopify_status(order),
        customer_name,
        customer_email,
        currency: text(order, "currency").unwrap_or_else(|| DEFAULT_CURRENCY.to_owned()),
        subtotal,
        tax,
        shipping,
        discount,
        total,
        shipping_address: object_or_empty(order.get("shipping_address")),
        items,
        ordered_at: timestamp(order.get("created_at"), "created_at")?,
    })
}

fn map_mirakl_order(order: &Value) -> Result<NormalizedOrder, ChannelError> {
    let external_order_id = required_id(order, "order_id")?;
    let order_number =
        text(order, "commercial_id").unwrap_or_else(|| external_order_id.clone());

    let customer = order.get("customer");
    let customer_name = customer.and_then(|c| full_name(c, "firstname", "lastname"));
    let customer_email = customer
        .and_then(|c| text(c, "email"))
        .or_else(|| text(order, "customer_notification_email"));

    let lines = array(order, "order_lines");
    let items = lines
        .iter()
        .map(|line| {
            let unit_price = match money(line.get("price_unit"), "order_lines.price_unit")? {
                Some(price) => price,
                None => money(line.get("price"), "order_lines.price")?.unwrap_or_default(),
            };
            Ok(NormalizedLineItem {
                sku: text(line, "offer_sku"),
                title: text(line, "product_title").unwrap_or_default(),
                quantity: quantity(line, "quantity", "order_lines.quantity")?,
                unit_price,
                external_product_id: text(line, "product_sku"),
            })
        })
        .collect::<Result<Vec<_>, ChannelError>>()?;

    let mut tax = Decimal::ZERO;
    for line in lines {
        for key in ["taxes", "shipping_taxes"] {
            for entry in array(line, key) {
                let amount =
                    money(entry.get("amount"), "order_lines.taxes.amount")?.unwrap_or_default();
                tax = add_amount(tax, amount, "order_lines.taxes.amount")?;
            }
        }
    }
    let shipping = money(order.get("shipping_price"), "shipping_price")?.unwrap_or_default();
    let (subtotal, total) = resolve_totals(
        &items,
        money(order.get("price"), "price")?,
        tax,
        shipping,
        Decimal::ZERO,
        money(order.get("total_price"), "total_price")?,
    )
    .map_err(amount_error)?;

    Ok(NormalizedOrder {
        channel: Channel::BestBuy,
        external_order_id,
        order_number,
        status: order
            .get("order_state")
            .and_then(Value::as_str)
            .map_or(OrderStatus::Pending, mirakl_status),
        customer_name,
        customer_email,
        currency: text(order, "currency_iso_code").unwrap_or_else(|| DEFAULT_CURRENCY.to_owned()),
        subtotal,
        tax,
        shipping,
        discount: Decimal::ZERO,
        total,
        shipping_address: object_or_empty(customer.and_then(|c| c.get("shipping_address"))),
        items,
        ordered_at: timestamp(order.get("created_date"), "created_date")?,
    })
}

fn map_amazon_order(order: &Value) -> Result<NormalizedOrder, ChannelError> {
    let external_order_id = required_id(order, "AmazonOrderId")?;
    let buyer = order.get("BuyerInfo");

    let mut shipping = Decimal::ZERO;
    let mut tax = Decimal::ZERO;
    let mut items = Vec::new();
    for line in array(order, "OrderItems") {
        let quantity = quantity(line, "QuantityOrdered", "OrderItems.QuantityOrdered")?;
        // ItemPrice is the line total, not the unit price.
        let line_total =
            money(line.pointer("/ItemPrice/Amount"), "OrderItems.ItemPrice")?.unwrap_or_default();
        let unit_price = if quantity > 0 {
            (line_total / Decimal::from(quantity)).round_dp(2)
        } else {
            line_total
        };
        let line_shipping =
            money(line.pointer("/ShippingPrice/Amount"), "OrderItems.ShippingPrice")?
                .unwrap_or_default();
        shipping = add_amount(shipping, line_shipping, "OrderItems.ShippingPrice")?;
        let line_tax =
            money(line.pointer("/ItemTax/Amount"), "OrderItems.ItemTax")?.unwrap_or_default();
        tax = add_amount(tax, line_tax, "OrderItems.ItemTax")?;
        items.push(NormalizedLineItem {
            sku: text(line, "SellerSKU"),
            title: text(line, "Title").unwrap_or_default(),
            quantity,
            unit_price,
            external_product_id: text(line, "ASIN"),
        });
    }

    let (subtotal, total) = resolve_totals(
        &items,
        None,
        tax,
        shipping,
        Decimal::ZERO,
        money(order.pointer("/OrderTotal/Amount"), "OrderTotal.Amount")?,
    )
    .map_err(amount_error)?;

    Ok(NormalizedOrder {
        channel: Channel::Amazon,
        order_number: external_order_id.clone(),
        external_order_id,
        status: order
            .get("OrderStatus")
            .and_then(Value::as_str)
            .map_or(OrderStatus::Pending, amazon_status),
        customer_name: buyer.and_then(|b| text(b, "BuyerName")),
        customer_email: buyer.and_then(|b| text(b, "BuyerEmail")),
        currency: order
            .pointer("/OrderTotal/CurrencyCode")
            .and_then(Value::as_str)
            .map_or_else(|| DEFAULT_CURRENCY.to_owned(), str::to_owned),
        subtotal,
        tax,
        shipping,
        discount: Decimal::ZERO,
        total,
        shipping_address: object_or_empty(order.get("ShippingAddress")),
        items,
        ordered_at: timestamp(order.get("PurchaseDate"), "PurchaseDate")?,
    })
}

fn map_shopify_product(product: &Value) -> Result<NormalizedProduct, ChannelError> {
    let external_id = required_id(product, "id")?;
    let variant = product
        .get("variants")
        .and_then(Value::as_array)
        .and_then(|v| v.first());
    let sku = variant
        .and_then(|v| text(v, "sku"))
        .ok_or_else(|| ChannelError::mapping("variants[0].sku"))?;
    let price = money(variant.and_then(|v| v.get("price")), "variants[0].price")?
        .unwrap_or_default();
    let quantity = variant
        .and_then(|v| v.get("inventory_quantity"))
        .and_then(Value::as_i64)
        .and_then(|q| i32::try_from(q).ok());
    let status = match product.get("status").and_then(Value::as_str) {
        None | Some("active") => "active",
        Some(_) => "draft",
    };

    Ok(NormalizedProduct {
        channel: Channel::Shopify,
        external_id,
        sku,
        channel_sku: None,
        name: text(product, "title").unwrap_or_default(),
        description: text(product, "body_html"),
        brand: text(product, "vendor"),
        category: text(product, "product_type"),
        price,
        currency: DEFAULT_CURRENCY.to_owned(),
        quantity,
        status: status.to_owned(),
    })
}

fn map_mirakl_offer(offer: &Value) -> Result<NormalizedProduct, ChannelError> {
    let external_id = required_id(offer, "offer_id")?;
    let sku = text(offer, "shop_sku").ok_or_else(|| ChannelError::mapping("shop_sku"))?;
    let active = offer.get("active").and_then(Value::as_bool).unwrap_or(true);

    Ok(NormalizedProduct {
        channel: Channel::BestBuy,
        external_id,
        name: text(offer, "product_title").unwrap_or_else(|| sku.clone()),
        channel_sku: text(offer, "product_sku"),
        sku,
        description: text(offer, "description"),
        brand: text(offer, "product_brand"),
        category: text(offer, "category_label"),
        price: money(offer.get("price"), "price")?.unwrap_or_default(),
        currency: text(offer, "currency_iso_code").unwrap_or_else(|| DEFAULT_CURRENCY.to_owned()),
        quantity: offer
            .get("quantity")
            .and_then(Value::as_i64)
            .and_then(|q| i32::try_from(q).ok()),
        status: if active { "active" } else { "draft" }.to_owned(),
    })
}

fn map_amazon_listing(listing: &Value) -> Result<NormalizedProduct, ChannelError> {
    let sku = text(listing, "SellerSKU").ok_or_else(|| ChannelError::mapping("SellerSKU"))?;
    let external_id = text(listing, "ASIN").unwrap_or_else(|| sku.clone());

    Ok(NormalizedProduct {
        channel: Channel::Amazon,
        external_id,
        name: text(listing, "Title").unwrap_or_else(|| sku.clone()),
        channel_sku: None,
        sku,
        description: None,
        brand: text(listing, "Brand"),
        category: None,
        price: money(listing.pointer("/Price/Amount"), "Price.Amount")?.unwrap_or_default(),
        currency: listing
            .pointer("/Price/CurrencyCode")
            .and_then(Value::as_str)
            .map_or_else(|| DEFAULT_CURRENCY.to_owned(), str::to_owned),
        quantity: listing
            .get("Quantity")
            .and_then(Value::as_i64)
            .and_then(|q| i32::try_from(q).ok()),
        status: "active".to_owned(),
    })
}

/// A non-empty string, or a number rendered as a string. Channel IDs are
/// often 64-bit numbers in JSON; keeping them as strings avoids precision loss.
fn text(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_owned())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn required_id(value: &Value, key: &str) -> Result<String, ChannelError> {
    text(value, key).ok_or_else(|| ChannelError::mapping(key))
}

fn full_name(value: &Value, first: &str, last: &str) -> Option<String> {
    let name = [text(value, first), text(value, last)]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
    (!name.is_empty()).then_some(name)
}

fn array<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map_or(&[][..], Vec::as_slice)
}

fn object_or_empty(value: Option<&Value>) -> Value {
    match value {
        Some(v @ Value::Object(_)) => v.clone(),
        _ => json!({}),
    }
}

/// `None` for an absent, null or empty value; an error for anything that is
/// present but not a number.
fn money(value: Option<&Value>, field: &str) -> Result<Option<Decimal>, ChannelError> {
    let raw = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(Value::String(s)) => s.trim().to_owned(),
        Some(Value::Number(n)) => n.to_string(),
        Some(_) => return Err(ChannelError::mapping(field)),
    };
    raw.parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(&raw))
        .map(Some)
        .map_err(|_| ChannelError::mapping(field))
}

fn add_amount(acc: Decimal, amount: Decimal, field: &str) -> Result<Decimal, ChannelError> {
    acc.checked_add(amount)
        .ok_or_else(|| ChannelError::mapping(field))
}

fn amount_error(err: CoreError) -> ChannelError {
    match err {
        CoreError::AmountOutOfRange(field) => ChannelError::mapping(field),
        other => ChannelError::mapping(other.to_string()),
    }
}

fn quantity(line: &Value, key: &str, field: &str) -> Result<i32, ChannelError> {
    let raw = match line.get(key) {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    raw.and_then(|q| i32::try_from(q).ok())
        .filter(|q| *q >= 0)
        .ok_or_else(|| ChannelError::mapping(field))
}

/// RFC 3339 timestamp; an absent value falls back to the current time.
fn timestamp(value: Option<&Value>, field: &str) -> Result<DateTime<Utc>, ChannelError> {
    match value {
        None | Some(Value::Null) => Ok(Utc::now()),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s.trim())
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| ChannelError::mapping(field)),
        Some(_) => Err(ChannelError::mapping(field)),
    }
}

#[cfg(test)]
#[path = "mapping_test.rs"]
mod tests;
