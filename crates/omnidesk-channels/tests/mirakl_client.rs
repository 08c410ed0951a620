//! Integration tests for `MiraklClient` against a local `wiremock` server.

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use omnidesk_channels::{ChannelError, HttpSettings, MiraklClient, StockUpdate, TrackingUpdate};

const API_KEY: &str = "3f2a9c1e-mirakl-shop-key";

fn client(server: &MockServer) -> MiraklClient {
    let settings = HttpSettings {
        timeout_secs: 5,
        max_retries: 0,
        backoff_base_ms: 0,
    };
    MiraklClient::with_base_url(&format!("{}/api", server.uri()), API_KEY, &settings)
        .expect("failed to build test MiraklClient")
}

#[tokio::test]
async fn account_sends_raw_api_key() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/account"))
        .and(header("Authorization", API_KEY))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"shop_id": 2001, "shop_name": "Acme CA"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let account = client(&server).account().await.unwrap();
    assert_eq!(account["shop_name"], "Acme CA");
}

#[tokio::test]
async fn invalid_key_maps_to_unauthorized() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/account"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client(&server).account().await.unwrap_err();
    assert!(matches!(err, ChannelError::Unauthorized { status: 401, .. }));
    assert_eq!(err.upstream_status(), Some(401));
}

#[tokio::test]
async fn fetch_orders_pages_by_offset() {
    let server = MockServer::start().await;
    let first: Vec<_> = (0..100).map(|i| json!({"order_id": format!("O-{i}")})).collect();

    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .and(query_param("offset", "0"))
        .and(query_param("order_state_codes", "WAITING_ACCEPTANCE"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"orders": first, "total_count": 101})),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .and(query_param("offset", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"orders": [{"order_id": "O-100"}], "total_count": 101}),
        ))
        .expect(1)
        .mount(&server)
        .await;

    let orders = client(&server)
        .fetch_orders(Some("WAITING_ACCEPTANCE"), None)
        .await
        .unwrap();
    assert_eq!(orders.len(), 101);
    assert_eq!(orders[100]["order_id"], "O-100");
}

#[tokio::test]
async fn accept_order_accepts_every_line() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .and(query_param("order_ids", "BB-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "orders": [{
                "order_id": "BB-1",
                "order_lines": [{"order_line_id": "BB-1-1"}, {"order_line_id": "BB-1-2"}]
            }],
            "total_count": 1
        })))
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/api/orders/BB-1/accept"))
        .and(body_json(json!({"order_lines": [
            {"accepted": true, "id": "BB-1-1"},
            {"accepted": true, "id": "BB-1-2"}
        ]})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let accepted = client(&server).accept_order("BB-1").await.unwrap();
    assert_eq!(accepted, 2);
}

#[tokio::test]
async fn accept_unknown_order_is_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"orders": [], "total_count": 0})),
        )
        .mount(&server)
        .await;

    let err = client(&server).accept_order("missing").await.unwrap_err();
    assert!(matches!(err, ChannelError::NotFound { .. }));
}

#[tokio::test]
async fn tracking_then_ship() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/api/orders/BB-2/tracking"))
        .and(body_json(json!({
            "carrier_code": "CPC",
            "carrier_name": "Canada Post",
            "tracking_number": "7023210039414604"
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/api/orders/BB-2/ship"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let tracking = TrackingUpdate {
        carrier_code: Some("CPC".to_owned()),
        carrier_name: "Canada Post".to_owned(),
        carrier_url: None,
        tracking_number: "7023210039414604".to_owned(),
    };
    client.update_tracking("BB-2", &tracking).await.unwrap();
    client.mark_shipped("BB-2").await.unwrap();
}

#[tokio::test]
async fn update_offers_posts_stock_levels() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/offers"))
        .and(body_json(json!({"offers": [
            {"shop_sku": "SKU-1", "quantity": 12, "update_delete": "update"},
            {"shop_sku": "SKU-2", "quantity": 0, "update_delete": "update", "price": "19.99"}
        ]})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"import_id": 7781})))
        .expect(1)
        .mount(&server)
        .await;

    let receipt = client(&server)
        .update_offers(&[
            StockUpdate {
                shop_sku: "SKU-1".to_owned(),
                quantity: 12,
                price: None,
            },
            StockUpdate {
                shop_sku: "SKU-2".to_owned(),
                quantity: -3,
                price: Some("19.99".parse().unwrap()),
            },
        ])
        .await
        .unwrap();
    assert_eq!(receipt["import_id"], 7781);
}

#[tokio::test]
async fn server_error_surfaces_status() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/offers"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client(&server).list_offers(10, 0).await.unwrap_err();
    assert!(matches!(err, ChannelError::UnexpectedStatus { status: 503, .. }));
}
