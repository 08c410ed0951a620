use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// An external sales platform integrated through its own API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Shopify,
    #[serde(alias = "best_buy", alias = "mirakl")]
    BestBuy,
    Amazon,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Shopify, Channel::BestBuy, Channel::Amazon];

    /// Stable code used in the `channels.code` column and in URLs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Shopify => "shopify",
            Channel::BestBuy => "bestbuy",
            Channel::Amazon => "amazon",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shopify" => Ok(Channel::Shopify),
            "bestbuy" | "best_buy" | "mirakl" => Ok(Channel::BestBuy),
            "amazon" => Ok(Channel::Amazon),
            other => Err(CoreError::UnknownChannel(other.to_string())),
        }
    }
}

/// What a sync job moves between a channel and the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Products,
    Orders,
    Inventory,
}

impl DataType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Products => "products",
            DataType::Orders => "orders",
            DataType::Inventory => "inventory",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "products" => Ok(DataType::Products),
            "orders" => Ok(DataType::Orders),
            "inventory" => Ok(DataType::Inventory),
            other => Err(CoreError::UnknownDataType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    #[default]
    Pull,
    Push,
}

impl SyncDirection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SyncDirection::Pull => "pull",
            SyncDirection::Push => "push",
        }
    }
}

impl std::fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncDirection {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pull" => Ok(SyncDirection::Pull),
            "push" => Ok(SyncDirection::Push),
            other => Err(CoreError::UnknownDirection(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_codes_parse_back() {
        for channel in Channel::ALL {
            assert_eq!(channel.as_str().parse::<Channel>().unwrap(), channel);
        }
    }

    #[test]
    fn channel_parse_accepts_aliases_and_case() {
        assert_eq!("Mirakl".parse::<Channel>().unwrap(), Channel::BestBuy);
        assert_eq!(" best_buy ".parse::<Channel>().unwrap(), Channel::BestBuy);
        assert_eq!("SHOPIFY".parse::<Channel>().unwrap(), Channel::Shopify);
    }

    #[test]
    fn unknown_channel_is_an_error() {
        assert_eq!(
            "ebay".parse::<Channel>().unwrap_err(),
            CoreError::UnknownChannel("ebay".to_string())
        );
    }

    #[test]
    fn channel_serializes_as_code() {
        let json = serde_json::to_string(&Channel::BestBuy).unwrap();
        assert_eq!(json, "\"bestbuy\"");
    }

    #[test]
    fn data_type_and_direction_parse() {
        assert_eq!("orders".parse::<DataType>().unwrap(), DataType::Orders);
        assert!("customers".parse::<DataType>().is_err());
        assert_eq!("push".parse::<SyncDirection>().unwrap(), SyncDirection::Push);
        assert_eq!(SyncDirection::default(), SyncDirection::Pull);
    }
}
