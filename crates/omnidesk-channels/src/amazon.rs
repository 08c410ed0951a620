//! Amazon placeholder.
//!
//! SP-API access needs LWA tokens and `SigV4` signing, which are not wired
//! up. Payloads in SP-API shape can still be mapped through
//! [`crate::mapping`]; every remote call fails with
//! [`ChannelError::NotSupported`].

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::ChannelError;
use crate::mirakl::StockUpdate;

const CHANNEL: &str = "amazon";

#[derive(Debug, Clone, Default)]
pub struct AmazonClient {
    seller_id: Option<String>,
}

impl AmazonClient {
    #[must_use]
    pub fn new(seller_id: Option<String>) -> Self {
        Self { seller_id }
    }

    #[must_use]
    pub fn seller_id(&self) -> Option<&str> {
        self.seller_id.as_deref()
    }

    /// # Errors
    ///
    /// Always returns [`ChannelError::NotSupported`].
    #[allow(clippy::unused_async)]
    pub async fn fetch_orders(
        &self,
        _updated_since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>, ChannelError> {
        Err(ChannelError::not_supported(CHANNEL, "fetching orders"))
    }

    /// # Errors
    ///
    /// Always returns [`ChannelError::NotSupported`].
    #[allow(clippy::unused_async)]
    pub async fn fetch_products(&self) -> Result<Vec<Value>, ChannelError> {
        Err(ChannelError::not_supported(CHANNEL, "fetching products"))
    }

    /// # Errors
    ///
    /// Always returns [`ChannelError::NotSupported`].
    #[allow(clippy::unused_async)]
    pub async fn push_inventory(&self, _updates: &[StockUpdate]) -> Result<Value, ChannelError> {
        Err(ChannelError::not_supported(CHANNEL, "pushing inventory"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_remote_call_is_unsupported() {
        let client = AmazonClient::new(Some("A1SELLER".to_owned()));
        assert_eq!(client.seller_id(), Some("A1SELLER"));
        assert!(matches!(
            client.fetch_orders(None).await,
            Err(ChannelError::NotSupported { .. })
        ));
        assert!(matches!(
            client.fetch_products().await,
            Err(ChannelError::NotSupported { .. })
        ));
        assert!(matches!(
            client.push_inventory(&[]).await,
            Err(ChannelError::NotSupported { .. })
        ));
    }
}
