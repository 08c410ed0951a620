//! Client for the Mirakl seller API that backs the Best Buy Canada marketplace.
//!
//! Endpoint codes follow Mirakl's own naming:
//!
//! | code | request | method |
//! |------|---------|--------|
//! | A01  | `GET /account` | [`MiraklClient::account`] |
//! | OR11 | `GET /orders` | [`MiraklClient::list_orders`] |
//! | OR21 | `PUT /orders/{id}/accept` | [`MiraklClient::accept_order`] |
//! | OR23 | `PUT /orders/{id}/tracking` | [`MiraklClient::update_tracking`] |
//! | OR24 | `PUT /orders/{id}/ship` | [`MiraklClient::mark_shipped`] |
//! | OF21 | `GET /offers` | [`MiraklClient::list_offers`] |
//! | OF24 | `POST /offers` | [`MiraklClient::update_offers`] |

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Method, Url};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use omnidesk_core::BestBuyCredentials;

use crate::error::ChannelError;
use crate::http::{check_status, decode_json, endpoint, HttpSettings};
use crate::retry::retry_with_backoff;

const CHANNEL: &str = "bestbuy";

/// Mirakl caps list pages at 100 rows.
pub const MAX_PAGE_SIZE: u32 = 100;

const MAX_PAGES: usize = 500;

/// One page of OR11 results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderPage {
    #[serde(default)]
    pub orders: Vec<Value>,
    #[serde(default)]
    pub total_count: u64,
}

/// One page of OF21 results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OfferPage {
    #[serde(default)]
    pub offers: Vec<Value>,
    #[serde(default)]
    pub total_count: u64,
}

/// Filters for OR11.
#[derive(Debug, Clone, Default)]
pub struct OrderQuery {
    /// Comma-separated Mirakl states, e.g. `WAITING_ACCEPTANCE,SHIPPING`.
    pub states: Option<String>,
    pub updated_since: Option<DateTime<Utc>>,
    pub max: u32,
    pub offset: u64,
}

/// Body of OR23.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carrier_code: Option<String>,
    pub carrier_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carrier_url: Option<String>,
    pub tracking_number: String,
}

/// A stock (and optionally price) change pushed through OF24.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockUpdate {
    pub shop_sku: String,
    pub quantity: i64,
    #[serde(default)]
    pub price: Option<Decimal>,
}

pub struct MiraklClient {
    client: Client,
    base_url: String,
    api_key: String,
    max_retries: u32,
    backoff_base_ms: u64,
}

impl MiraklClient {
    /// # Errors
    ///
    /// Returns [`ChannelError::Http`] if the `reqwest::Client` cannot be built.
    pub fn new(
        credentials: &BestBuyCredentials,
        settings: &HttpSettings,
    ) -> Result<Self, ChannelError> {
        Self::with_base_url(&credentials.api_url, &credentials.api_key, settings)
    }

    /// # Errors
    ///
    /// Returns [`ChannelError::Http`] if the `reqwest::Client` cannot be built.
    pub fn with_base_url(
        base_url: &str,
        api_key: &str,
        settings: &HttpSettings,
    ) -> Result<Self, ChannelError> {
        Ok(Self {
            client: settings.build_client()?,
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key: api_key.to_owned(),
            max_retries: settings.max_retries,
            backoff_base_ms: settings.backoff_base_ms,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// A01: shop account details. Used as the connectivity check.
    ///
    /// # Errors
    ///
    /// Propagates request, status and decoding failures.
    pub async fn account(&self) -> Result<Value, ChannelError> {
        let url = endpoint(&self.base_url, "account")?;
        self.send(Method::GET, url, None, "mirakl account").await
    }

    /// OR11: one page of orders.
    ///
    /// # Errors
    ///
    /// Propagates request, status and decoding failures.
    pub async fn list_orders(&self, query: &OrderQuery) -> Result<OrderPage, ChannelError> {
        let mut url = endpoint(&self.base_url, "orders")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("max", &query.max.clamp(1, MAX_PAGE_SIZE).to_string());
            pairs.append_pair("offset", &query.offset.to_string());
            if let Some(states) = query.states.as_deref().filter(|s| !s.is_empty()) {
                pairs.append_pair("order_state_codes", states);
            }
            if let Some(since) = query.updated_since {
                pairs.append_pair(
                    "start_update_date",
                    &since.to_rfc3339_opts(SecondsFormat::Secs, true),
                );
            }
        }
        let body = self.send(Method::GET, url, None, "mirakl orders").await?;
        serde_json::from_value(body).map_err(|source| ChannelError::Deserialize {
            context: "mirakl orders page".to_owned(),
            source,
        })
    }

    /// Walks OR11 with offsets until every matching order is collected.
    ///
    /// # Errors
    ///
    /// Propagates failures from [`Self::list_orders`], or
    /// [`ChannelError::PaginationLimit`].
    pub async fn fetch_orders(
        &self,
        states: Option<&str>,
        updated_since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>, ChannelError> {
        let mut collected = Vec::new();
        for _ in 0..MAX_PAGES {
            let query = OrderQuery {
                states: states.map(str::to_owned),
                updated_since,
                max: MAX_PAGE_SIZE,
                offset: collected.len() as u64,
            };
            let page = self.list_orders(&query).await?;
            let empty = page.orders.is_empty();
            collected.extend(page.orders);
            if empty || collected.len() as u64 >= page.total_count {
                return Ok(collected);
            }
        }
        Err(ChannelError::PaginationLimit {
            url: format!("{}/orders", self.base_url),
            max_pages: MAX_PAGES,
        })
    }

    /// OR11 filtered to a single order.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotFound`] when Mirakl has no such order.
    pub async fn get_order(&self, order_id: &str) -> Result<Value, ChannelError> {
        let mut url = endpoint(&self.base_url, "orders")?;
        url.query_pairs_mut().append_pair("order_ids", order_id);
        let body = self.send(Method::GET, url.clone(), None, "mirakl order").await?;
        let page: OrderPage =
            serde_json::from_value(body).map_err(|source| ChannelError::Deserialize {
                context: format!("mirakl order {order_id}"),
                source,
            })?;
        page.orders
            .into_iter()
            .next()
            .ok_or_else(|| ChannelError::NotFound {
                url: url.to_string(),
            })
    }

    /// OR21: accepts every line of an order. Returns the number of lines accepted.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Mapping`] if the order has no identifiable
    /// lines, or any request failure.
    pub async fn accept_order(&self, order_id: &str) -> Result<usize, ChannelError> {
        let order = self.get_order(order_id).await?;
        let lines: Vec<Value> = order
            .get("order_lines")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|line| line.get("order_line_id").and_then(Value::as_str))
            .map(|id| json!({ "accepted": true, "id": id }))
            .collect();
        if lines.is_empty() {
            return Err(ChannelError::mapping("order_lines.order_line_id"));
        }

        let url = endpoint(&self.base_url, &format!("orders/{order_id}/accept"))?;
        let count = lines.len();
        self.send(
            Method::PUT,
            url,
            Some(json!({ "order_lines": lines })),
            "mirakl accept",
        )
        .await?;
        tracing::info!(order_id, lines = count, "accepted mirakl order");
        Ok(count)
    }

    /// OR23: attaches carrier and tracking number to an order.
    ///
    /// # Errors
    ///
    /// Propagates request and status failures.
    pub async fn update_tracking(
        &self,
        order_id: &str,
        tracking: &TrackingUpdate,
    ) -> Result<(), ChannelError> {
        let url = endpoint(&self.base_url, &format!("orders/{order_id}/tracking"))?;
        let body = serde_json::to_value(tracking).map_err(|source| ChannelError::Deserialize {
            context: "mirakl tracking body".to_owned(),
            source,
        })?;
        self.send(Method::PUT, url, Some(body), "mirakl tracking")
            .await?;
        Ok(())
    }

    /// OR24: confirms shipment of an order.
    ///
    /// # Errors
    ///
    /// Propagates request and status failures.
    pub async fn mark_shipped(&self, order_id: &str) -> Result<(), ChannelError> {
        let url = endpoint(&self.base_url, &format!("orders/{order_id}/ship"))?;
        self.send(Method::PUT, url, None, "mirakl ship").await?;
        Ok(())
    }

    /// OF21: one page of the shop's offers.
    ///
    /// # Errors
    ///
    /// Propagates request, status and decoding failures.
    pub async fn list_offers(&self, max: u32, offset: u64) -> Result<OfferPage, ChannelError> {
        let mut url = endpoint(&self.base_url, "offers")?;
        url.query_pairs_mut()
            .append_pair("max", &max.clamp(1, MAX_PAGE_SIZE).to_string())
            .append_pair("offset", &offset.to_string());
        let body = self.send(Method::GET, url, None, "mirakl offers").await?;
        serde_json::from_value(body).map_err(|source| ChannelError::Deserialize {
            context: "mirakl offers page".to_owned(),
            source,
        })
    }

    /// Walks OF21 until every offer is collected.
    ///
    /// # Errors
    ///
    /// Propagates failures from [`Self::list_offers`], or
    /// [`ChannelError::PaginationLimit`].
    pub async fn fetch_offers(&self) -> Result<Vec<Value>, ChannelError> {
        let mut collected = Vec::new();
        for _ in 0..MAX_PAGES {
            let page = self
                .list_offers(MAX_PAGE_SIZE, collected.len() as u64)
                .await?;
            let empty = page.offers.is_empty();
            collected.extend(page.offers);
            if empty || collected.len() as u64 >= page.total_count {
                return Ok(collected);
            }
        }
        Err(ChannelError::PaginationLimit {
            url: format!("{}/offers", self.base_url),
            max_pages: MAX_PAGES,
        })
    }

    /// OF24: pushes stock levels as offer updates. Returns Mirakl's import
    /// receipt (it carries an `import_id`).
    ///
    /// # Errors
    ///
    /// Propagates request, status and decoding failures.
    pub async fn update_offers(&self, updates: &[StockUpdate]) -> Result<Value, ChannelError> {
        let offers: Vec<Value> = updates
            .iter()
            .map(|u| {
                let mut offer = json!({
                    "shop_sku": u.shop_sku,
                    "quantity": u.quantity.max(0),
                    "update_delete": "update",
                });
                if let Some(price) = u.price {
                    offer["price"] = json!(price.to_string());
                }
                offer
            })
            .collect();
        let url = endpoint(&self.base_url, "offers")?;
        self.send(
            Method::POST,
            url,
            Some(json!({ "offers": offers })),
            "mirakl offer update",
        )
        .await
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<Value>,
        context: &str,
    ) -> Result<Value, ChannelError> {
        retry_with_backoff(self.max_retries, self.backoff_base_ms, || {
            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .header(reqwest::header::AUTHORIZATION, &self.api_key)
                .header(reqwest::header::ACCEPT, "application/json");
            if let Some(body) = &body {
                request = request.json(body);
            }
            async move {
                let response = check_status(CHANNEL, request.send().await?)?;
                decode_json(response, context).await
            }
        })
        .await
    }
}

/// Shortens an API key for display: `abcd…wxyz`. Keys of eight characters or
/// fewer are fully masked.
#[must_use]
pub fn mask_api_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "****".to_owned();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_all_but_the_ends() {
        assert_eq!(mask_api_key("abcd1234efgh5678wxyz"), "abcd…wxyz");
    }

    #[test]
    fn short_keys_are_fully_masked() {
        assert_eq!(mask_api_key("abc"), "****");
        assert_eq!(mask_api_key("12345678"), "****");
    }

    #[test]
    fn tracking_body_omits_empty_optionals() {
        let body = serde_json::to_value(TrackingUpdate {
            carrier_code: None,
            carrier_name: "Canada Post".to_owned(),
            carrier_url: None,
            tracking_number: "7023210039414604".to_owned(),
        })
        .unwrap();
        assert_eq!(
            body,
            json!({"carrier_name": "Canada Post", "tracking_number": "7023210039414604"})
        );
    }
}
