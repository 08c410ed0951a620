//! Offline tests for omnidesk-db pool configuration and row types.
//! These tests do not require a live database connection.

use omnidesk_core::{AppConfig, Environment, QueueSettings};
use omnidesk_db::{PoolConfig, SalesGrouping, ValidationRuleRow};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

#[test]
fn pool_config_from_app_config_uses_core_values() {
    let app_config = AppConfig {
        database_url: "postgres://example".to_string(),
        env: Environment::Test,
        bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 3000),
        log_level: "info".to_string(),
        jwt_secret: "secret".to_string(),
        jwt_ttl_hours: 24,
        db_max_connections: 42,
        db_min_connections: 7,
        db_acquire_timeout_secs: 9,
        http_timeout_secs: 30,
        http_max_retries: 3,
        http_backoff_base_ms: 500,
        queue: QueueSettings::default(),
        shopify: None,
        shopify_webhook_secret: None,
        bestbuy: None,
        bestbuy_webhook_secret: None,
        amazon_seller_id: None,
        smtp: None,
    };

    let pool_config = PoolConfig::from_app_config(&app_config);
    assert_eq!(pool_config.max_connections, 42);
    assert_eq!(pool_config.min_connections, 7);
    assert_eq!(pool_config.acquire_timeout_secs, 9);
}

#[test]
fn validation_rule_row_converts_to_core_rule() {
    let row = ValidationRuleRow {
        id: 1,
        name: "product_price_non_negative".to_string(),
        entity: "product".to_string(),
        field: "price".to_string(),
        rule_type: "min".to_string(),
        params: serde_json::json!({"value": 0}),
        severity: "error".to_string(),
        is_active: true,
        created_at: chrono::Utc::now(),
    };

    let rule = row.to_rule().expect("known type and severity");
    assert_eq!(rule.rule_type, omnidesk_core::RuleType::Min);
    assert_eq!(rule.severity, omnidesk_core::Severity::Error);

    let bad = ValidationRuleRow {
        rule_type: "between".to_string(),
        ..row
    };
    assert!(bad.to_rule().is_err());
}

#[test]
fn sales_grouping_defaults_to_day() {
    assert_eq!(SalesGrouping::default(), SalesGrouping::Day);
    assert_eq!(SalesGrouping::Month.to_string(), "month");
}
