use std::net::SocketAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Shopify Admin API credentials. Present only when the shop domain and the
/// access token are both configured.
#[derive(Clone)]
pub struct ShopifyCredentials {
    pub shop_domain: String,
    pub access_token: String,
    pub api_version: String,
}

impl std::fmt::Debug for ShopifyCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShopifyCredentials")
            .field("shop_domain", &self.shop_domain)
            .field("access_token", &"[redacted]")
            .field("api_version", &self.api_version)
            .finish()
    }
}

/// Best Buy marketplace (Mirakl) credentials.
#[derive(Clone)]
pub struct BestBuyCredentials {
    pub api_key: String,
    pub api_url: String,
}

impl std::fmt::Debug for BestBuyCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BestBuyCredentials")
            .field("api_key", &"[redacted]")
            .field("api_url", &self.api_url)
            .finish()
    }
}

#[derive(Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

impl std::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[redacted]"))
            .field("from", &self.from)
            .finish()
    }
}

/// Polling and retry knobs shared by the sync, sales and notification queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    pub poll_secs: u64,
    pub notification_poll_secs: u64,
    pub batch_size: i64,
    pub max_retries: i32,
    pub backoff_base_secs: i64,
    /// A claimed row untouched for this long is handed back to the queue.
    pub claim_timeout_secs: i64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            poll_secs: 30,
            notification_poll_secs: 60,
            batch_size: 10,
            max_retries: 3,
            backoff_base_secs: 60,
            claim_timeout_secs: 900,
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub jwt_secret: String,
    pub jwt_ttl_hours: i64,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub http_timeout_secs: u64,
    pub http_max_retries: u32,
    pub http_backoff_base_ms: u64,
    pub queue: QueueSettings,
    pub shopify: Option<ShopifyCredentials>,
    pub shopify_webhook_secret: Option<String>,
    pub bestbuy: Option<BestBuyCredentials>,
    pub bestbuy_webhook_secret: Option<String>,
    pub amazon_seller_id: Option<String>,
    pub smtp: Option<SmtpSettings>,
}

impl AppConfig {
    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self.env, Environment::Development)
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("database_url", &"[redacted]")
            .field("jwt_secret", &"[redacted]")
            .field("jwt_ttl_hours", &self.jwt_ttl_hours)
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("http_max_retries", &self.http_max_retries)
            .field("http_backoff_base_ms", &self.http_backoff_base_ms)
            .field("queue", &self.queue)
            .field("shopify", &self.shopify)
            .field(
                "shopify_webhook_secret",
                &self.shopify_webhook_secret.as_ref().map(|_| "[redacted]"),
            )
            .field("bestbuy", &self.bestbuy)
            .field(
                "bestbuy_webhook_secret",
                &self.bestbuy_webhook_secret.as_ref().map(|_| "[redacted]"),
            )
            .field("amazon_seller_id", &self.amazon_seller_id)
            .field("smtp", &self.smtp)
            .finish()
    }
}
