use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde_json::Value;

use omnidesk_core::ShopifyCredentials;

use crate::error::ChannelError;
use crate::http::{check_status, decode_json, endpoint, HttpSettings};
use crate::pagination::next_page_info;
use crate::retry::retry_with_backoff;

const CHANNEL: &str = "shopify";

/// Largest page the Admin REST API serves.
const PAGE_LIMIT: u32 = 250;

/// Prevents infinite loops on cycling cursors.
const MAX_PAGES: usize = 200;

/// Client for the Shopify Admin REST API.
///
/// Authenticates with a private-app access token sent in
/// `X-Shopify-Access-Token`. List endpoints are walked page by page through
/// the `Link` header cursor. Payloads are returned as raw JSON for
/// [`crate::mapping`] to normalize.
pub struct ShopifyClient {
    client: Client,
    /// `https://{shop}/admin/api/{version}`.
    base_url: String,
    access_token: String,
    max_retries: u32,
    backoff_base_ms: u64,
}

impl ShopifyClient {
    /// Builds a client for the configured shop.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Http`] if the `reqwest::Client` cannot be built.
    pub fn new(
        credentials: &ShopifyCredentials,
        settings: &HttpSettings,
    ) -> Result<Self, ChannelError> {
        let domain = credentials
            .shop_domain
            .trim()
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/');
        let base_url = format!("https://{domain}/admin/api/{}", credentials.api_version);
        Self::with_base_url(&base_url, &credentials.access_token, settings)
    }

    /// Builds a client against an explicit API root, used by tests.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Http`] if the `reqwest::Client` cannot be built.
    pub fn with_base_url(
        base_url: &str,
        access_token: &str,
        settings: &HttpSettings,
    ) -> Result<Self, ChannelError> {
        Ok(Self {
            client: settings.build_client()?,
            base_url: base_url.trim_end_matches('/').to_owned(),
            access_token: access_token.to_owned(),
            max_retries: settings.max_retries,
            backoff_base_ms: settings.backoff_base_ms,
        })
    }

    /// Fetches every order, optionally only those updated since `updated_since`.
    ///
    /// # Errors
    ///
    /// Propagates request, status and decoding failures, and returns
    /// [`ChannelError::PaginationLimit`] past [`MAX_PAGES`] pages.
    pub async fn fetch_orders(
        &self,
        updated_since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>, ChannelError> {
        let mut filters = vec![("status", "any".to_owned())];
        if let Some(since) = updated_since {
            filters.push((
                "updated_at_min",
                since.to_rfc3339_opts(SecondsFormat::Secs, true),
            ));
        }
        self.fetch_all("orders", &filters).await
    }

    /// Fetches every product.
    ///
    /// # Errors
    ///
    /// Same as [`Self::fetch_orders`].
    pub async fn fetch_products(&self) -> Result<Vec<Value>, ChannelError> {
        self.fetch_all("products", &[]).await
    }

    /// Fetches one order by its numeric ID.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotFound`] for an unknown ID, or any request failure.
    pub async fn get_order(&self, order_id: &str) -> Result<Value, ChannelError> {
        let url = endpoint(&self.base_url, &format!("orders/{order_id}.json"))?;
        let body: Value = retry_with_backoff(self.max_retries, self.backoff_base_ms, || {
            let url = url.clone();
            async move {
                let response = self
                    .client
                    .get(url)
                    .header("X-Shopify-Access-Token", &self.access_token)
                    .send()
                    .await?;
                decode_json(check_status(CHANNEL, response)?, "shopify order").await
            }
        })
        .await?;
        body.get("order")
            .cloned()
            .ok_or_else(|| ChannelError::mapping("order"))
    }

    async fn fetch_all(
        &self,
        resource: &str,
        filters: &[(&str, String)],
    ) -> Result<Vec<Value>, ChannelError> {
        let mut collected = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let (page, link) = self.fetch_page(resource, filters, cursor.as_deref()).await?;
            let count = page.len();
            collected.extend(page);
            tracing::debug!(resource, count, "fetched shopify page");

            cursor = next_page_info(link.as_deref());
            if cursor.is_none() {
                return Ok(collected);
            }
        }

        Err(ChannelError::PaginationLimit {
            url: format!("{}/{resource}.json", self.base_url),
            max_pages: MAX_PAGES,
        })
    }

    /// One page of `resource`. Returns the items and the raw `Link` header.
    async fn fetch_page(
        &self,
        resource: &str,
        filters: &[(&str, String)],
        page_info: Option<&str>,
    ) -> Result<(Vec<Value>, Option<String>), ChannelError> {
        let mut url = endpoint(&self.base_url, &format!("{resource}.json"))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &PAGE_LIMIT.to_string());
            match page_info {
                Some(cursor) => {
                    query.append_pair("page_info", cursor);
                }
                None => {
                    for (key, value) in filters {
                        query.append_pair(key, value);
                    }
                }
            }
        }

        retry_with_backoff(self.max_retries, self.backoff_base_ms, || {
            let url = url.clone();
            async move {
                let response = self
                    .client
                    .get(url)
                    .header("X-Shopify-Access-Token", &self.access_token)
                    .send()
                    .await?;
                let response = check_status(CHANNEL, response)?;
                let link = response
                    .headers()
                    .get(reqwest::header::LINK)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned);
                let mut body: Value =
                    decode_json(response, &format!("shopify {resource} page")).await?;
                let items = match body.get_mut(resource).map(Value::take) {
                    Some(Value::Array(items)) => items,
                    _ => return Err(ChannelError::mapping(resource)),
                };
                Ok((items, link))
            }
        })
        .await
    }
}
