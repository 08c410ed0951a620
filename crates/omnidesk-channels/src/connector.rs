use chrono::{DateTime, Utc};
use serde_json::Value;

use omnidesk_core::{AppConfig, Channel};

use crate::amazon::AmazonClient;
use crate::error::ChannelError;
use crate::http::HttpSettings;
use crate::mirakl::{MiraklClient, StockUpdate};
use crate::shopify::ShopifyClient;

/// A configured client for one channel, dispatching the operations the sync
/// worker needs.
pub enum ChannelConnector {
    Shopify(ShopifyClient),
    BestBuy(MiraklClient),
    Amazon(AmazonClient),
}

impl ChannelConnector {
    /// Builds the connector for `channel` from the loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotConfigured`] when the channel's credentials
    /// are absent, or [`ChannelError::Http`] if the HTTP client cannot be built.
    pub fn from_config(channel: Channel, config: &AppConfig) -> Result<Self, ChannelError> {
        let settings = HttpSettings::from_app_config(config);
        let not_configured = || ChannelError::NotConfigured {
            channel: channel.as_str().to_owned(),
        };
        match channel {
            Channel::Shopify => {
                let credentials = config.shopify.as_ref().ok_or_else(not_configured)?;
                Ok(Self::Shopify(ShopifyClient::new(credentials, &settings)?))
            }
            Channel::BestBuy => {
                let credentials = config.bestbuy.as_ref().ok_or_else(not_configured)?;
                Ok(Self::BestBuy(MiraklClient::new(credentials, &settings)?))
            }
            Channel::Amazon => Ok(Self::Amazon(AmazonClient::new(
                config.amazon_seller_id.clone(),
            ))),
        }
    }

    #[must_use]
    pub fn channel(&self) -> Channel {
        match self {
            Self::Shopify(_) => Channel::Shopify,
            Self::BestBuy(_) => Channel::BestBuy,
            Self::Amazon(_) => Channel::Amazon,
        }
    }

    /// Raw order payloads, ready for [`crate::mapping::map_order`].
    ///
    /// # Errors
    ///
    /// Propagates the underlying client's failure.
    pub async fn fetch_orders(
        &self,
        updated_since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>, ChannelError> {
        match self {
            Self::Shopify(client) => client.fetch_orders(updated_since).await,
            Self::BestBuy(client) => client.fetch_orders(None, updated_since).await,
            Self::Amazon(client) => client.fetch_orders(updated_since).await,
        }
    }

    /// Raw product payloads (Mirakl offers for Best Buy), ready for
    /// [`crate::mapping::map_product`].
    ///
    /// # Errors
    ///
    /// Propagates the underlying client's failure.
    pub async fn fetch_products(&self) -> Result<Vec<Value>, ChannelError> {
        match self {
            Self::Shopify(client) => client.fetch_products().await,
            Self::BestBuy(client) => client.fetch_offers().await,
            Self::Amazon(client) => client.fetch_products().await,
        }
    }

    /// Sends local stock levels to the channel.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotSupported`] for Shopify and Amazon.
    pub async fn push_inventory(&self, updates: &[StockUpdate]) -> Result<Value, ChannelError> {
        match self {
            Self::Shopify(_) => Err(ChannelError::not_supported(
                Channel::Shopify.as_str(),
                "pushing inventory",
            )),
            Self::BestBuy(client) => client.update_offers(updates).await,
            Self::Amazon(client) => client.push_inventory(updates).await,
        }
    }
}
