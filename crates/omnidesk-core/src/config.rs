use crate::app_config::{
    AppConfig, BestBuyCredentials, Environment, QueueSettings, ShopifyCredentials, SmtpSettings,
};
use crate::ConfigError;

const DEFAULT_BESTBUY_API_URL: &str = "https://marketplace.bestbuy.ca/api";
const DEFAULT_SHOPIFY_API_VERSION: &str = "2024-01";

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Parses and validates configuration through `lookup`, so tests can feed a
/// plain map instead of mutating the process environment.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::net::SocketAddr;

    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar(var.to_string()))
    };

    let optional = |var: &str| -> Option<String> {
        lookup(var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let or_default = |var: &str, default: &str| -> String {
        optional(var).unwrap_or_else(|| default.to_string())
    };

    let parse_num = |var: &str, default: &str| -> Result<u64, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<u64>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let narrow = |var: &str, value: u64| -> Result<u32, ConfigError> {
        u32::try_from(value).map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let database_url = require("DATABASE_URL")?;
    let jwt_secret = require("JWT_SECRET")?;

    let env = parse_environment(&or_default("OMNIDESK_ENV", "development"));

    let bind_raw = or_default("OMNIDESK_BIND_ADDR", "0.0.0.0:3000");
    let bind_addr = bind_raw
        .parse::<SocketAddr>()
        .map_err(|e| ConfigError::InvalidEnvVar {
            var: "OMNIDESK_BIND_ADDR".to_string(),
            reason: e.to_string(),
        })?;
    let log_level = or_default("OMNIDESK_LOG_LEVEL", "info");

    let jwt_ttl_hours = parse_num("OMNIDESK_JWT_TTL_HOURS", "24")?;
    if jwt_ttl_hours == 0 {
        return Err(ConfigError::InvalidEnvVar {
            var: "OMNIDESK_JWT_TTL_HOURS".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }

    let db_max_connections = narrow(
        "OMNIDESK_DB_MAX_CONNECTIONS",
        parse_num("OMNIDESK_DB_MAX_CONNECTIONS", "10")?,
    )?;
    let db_min_connections = narrow(
        "OMNIDESK_DB_MIN_CONNECTIONS",
        parse_num("OMNIDESK_DB_MIN_CONNECTIONS", "1")?,
    )?;
    let db_acquire_timeout_secs = parse_num("OMNIDESK_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    let http_timeout_secs = parse_num("OMNIDESK_HTTP_TIMEOUT_SECS", "30")?;
    let http_max_retries = narrow(
        "OMNIDESK_HTTP_MAX_RETRIES",
        parse_num("OMNIDESK_HTTP_MAX_RETRIES", "3")?,
    )?;
    let http_backoff_base_ms = parse_num("OMNIDESK_HTTP_BACKOFF_BASE_MS", "500")?;

    let queue = QueueSettings {
        poll_secs: parse_num("OMNIDESK_QUEUE_POLL_SECS", "30")?.max(1),
        notification_poll_secs: parse_num("OMNIDESK_NOTIFICATION_POLL_SECS", "60")?.max(1),
        batch_size: i64::from(narrow(
            "OMNIDESK_QUEUE_BATCH_SIZE",
            parse_num("OMNIDESK_QUEUE_BATCH_SIZE", "10")?,
        )?)
        .max(1),
        max_retries: i32::try_from(parse_num("OMNIDESK_QUEUE_MAX_RETRIES", "3")?).map_err(
            |e| ConfigError::InvalidEnvVar {
                var: "OMNIDESK_QUEUE_MAX_RETRIES".to_string(),
                reason: e.to_string(),
            },
        )?,
        backoff_base_secs: i64::from(narrow(
            "OMNIDESK_QUEUE_BACKOFF_BASE_SECS",
            parse_num("OMNIDESK_QUEUE_BACKOFF_BASE_SECS", "60")?,
        )?),
        claim_timeout_secs: i64::from(narrow(
            "OMNIDESK_QUEUE_CLAIM_TIMEOUT_SECS",
            parse_num("OMNIDESK_QUEUE_CLAIM_TIMEOUT_SECS", "900")?,
        )?)
        .max(1),
    };

    let shopify = match (optional("SHOPIFY_SHOP_DOMAIN"), optional("SHOPIFY_ACCESS_TOKEN")) {
        (Some(shop_domain), Some(access_token)) => Some(ShopifyCredentials {
            shop_domain,
            access_token,
            api_version: or_default("SHOPIFY_API_VERSION", DEFAULT_SHOPIFY_API_VERSION),
        }),
        _ => None,
    };

    let bestbuy = optional("BESTBUY_API_KEY").map(|api_key| BestBuyCredentials {
        api_key,
        api_url: or_default("BESTBUY_API_URL", DEFAULT_BESTBUY_API_URL)
            .trim_end_matches('/')
            .to_string(),
    });

    let smtp = match optional("SMTP_HOST") {
        Some(host) => {
            let port = u16::try_from(parse_num("SMTP_PORT", "587")?).map_err(|e| {
                ConfigError::InvalidEnvVar {
                    var: "SMTP_PORT".to_string(),
                    reason: e.to_string(),
                }
            })?;
            Some(SmtpSettings {
                host,
                port,
                username: optional("SMTP_USERNAME"),
                password: optional("SMTP_PASSWORD"),
                from: require("SMTP_FROM")?,
            })
        }
        None => None,
    };

    Ok(AppConfig {
        database_url,
        env,
        bind_addr,
        log_level,
        jwt_secret,
        jwt_ttl_hours: i64::try_from(jwt_ttl_hours).unwrap_or(24),
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        http_timeout_secs,
        http_max_retries,
        http_backoff_base_ms,
        queue,
        shopify,
        shopify_webhook_secret: optional("SHOPIFY_WEBHOOK_SECRET"),
        bestbuy,
        bestbuy_webhook_secret: optional("BESTBUY_WEBHOOK_SECRET"),
        amazon_seller_id: optional("AMAZON_SELLER_ID"),
        smtp,
    })
}

/// Parse a string into an `Environment` variant.
///
/// Unrecognized values default to `Environment::Development`.
fn parse_environment(s: &str) -> Environment {
    match s {
        "production" => Environment::Production,
        "test" => Environment::Test,
        _ => Environment::Development,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
