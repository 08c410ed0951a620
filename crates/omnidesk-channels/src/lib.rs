pub mod amazon;
pub mod connector;
pub mod error;
pub mod http;
pub mod mapping;
pub mod mirakl;
pub mod pagination;
mod retry;
pub mod shopify;
pub mod signature;

pub use amazon::AmazonClient;
pub use connector::ChannelConnector;
pub use error::ChannelError;
pub use http::HttpSettings;
pub use mapping::{external_order_id, map_order, map_product};
pub use mirakl::{mask_api_key, MiraklClient, OrderQuery, StockUpdate, TrackingUpdate};
pub use shopify::ShopifyClient;
pub use signature::{verify_mirakl, verify_shopify};
