//! Integration tests for `ShopifyClient` against a local `wiremock` server.

use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use omnidesk_channels::{ChannelError, HttpSettings, ShopifyClient};

const TOKEN: &str = "shpat_test_token";

fn settings(max_retries: u32) -> HttpSettings {
    HttpSettings {
        timeout_secs: 5,
        max_retries,
        backoff_base_ms: 0,
    }
}

fn client(server: &MockServer, max_retries: u32) -> ShopifyClient {
    ShopifyClient::with_base_url(
        &format!("{}/admin/api/2024-01", server.uri()),
        TOKEN,
        &settings(max_retries),
    )
    .expect("failed to build test ShopifyClient")
}

#[tokio::test]
async fn fetch_orders_sends_token_and_status_filter() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/admin/api/2024-01/orders.json"))
        .and(header("X-Shopify-Access-Token", TOKEN))
        .and(query_param("status", "any"))
        .and(query_param("limit", "250"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"orders": [{"id": 1}, {"id": 2}]})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let orders = client(&server, 0).fetch_orders(None).await.unwrap();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[1]["id"], 2);
}

#[tokio::test]
async fn fetch_products_follows_link_cursor() {
    let server = MockServer::start().await;
    let next = format!(
        r#"<{}/admin/api/2024-01/products.json?limit=250&page_info=PAGE2>; rel="next""#,
        server.uri()
    );

    Mock::given(method("GET"))
        .and(path("/admin/api/2024-01/products.json"))
        .and(query_param("page_info", "PAGE2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"products": [{"id": 20}]})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/admin/api/2024-01/products.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Link", next.as_str())
                .set_body_json(json!({"products": [{"id": 10}]})),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;

    let products = client(&server, 0).fetch_products().await.unwrap();
    let ids: Vec<i64> = products.iter().filter_map(|p| p["id"].as_i64()).collect();
    assert_eq!(ids, vec![10, 20]);
}

#[tokio::test]
async fn unauthorized_is_reported_without_retry() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/admin/api/2024-01/orders.json"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"errors": "Invalid API key"})))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server, 3).fetch_orders(None).await.unwrap_err();
    assert!(
        matches!(err, ChannelError::Unauthorized { status: 401, .. }),
        "got {err:?}"
    );
}

#[tokio::test]
async fn rate_limit_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/admin/api/2024-01/orders.json"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/admin/api/2024-01/orders.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"orders": [{"id": 5}]})))
        .mount(&server)
        .await;

    let orders = client(&server, 2).fetch_orders(None).await.unwrap();
    assert_eq!(orders.len(), 1);
}

#[tokio::test]
async fn body_without_resource_key_is_a_mapping_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/admin/api/2024-01/products.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"unexpected": []})))
        .mount(&server)
        .await;

    let err = client(&server, 0).fetch_products().await.unwrap_err();
    assert!(matches!(err, ChannelError::Mapping { ref field } if field == "products"));
}
