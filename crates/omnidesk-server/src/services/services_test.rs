//! Database-backed tests for the queue workers, sync execution, workflow
//! rules and fulfillment. Channel APIs are served by `wiremock`.

use std::net::SocketAddr;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sqlx::PgPool;
use wiremock::matchers::{body_json, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

use omnidesk_channels::{ChannelConnector, ChannelError, HttpSettings, MiraklClient, ShopifyClient};
use omnidesk_core::{
    AppConfig, BestBuyCredentials, Channel, Environment, OrderStatus, QueueSettings,
};
use omnidesk_db::{ChannelListing, NewProduct, NewWorkflowRule, SyncJobRow};

use super::fulfillment::{mark_delivered, ship_order, NewShipment};
use super::notifications::{enqueue_manual, process_notification_batch};
use super::order_status::{change_order_status, StatusChange};
use super::sales::{ingest_sale, process_sales_batch};
use super::sync::{execute_job, process_sync_batch};
use super::workflow::evaluate_order;
use super::{BatchOutcome, ServiceError};
use crate::mailer::LogMailer;

const MIRAKL_KEY: &str = "7c1e-mirakl-test-key";

fn settings() -> QueueSettings {
    QueueSettings {
        backoff_base_secs: 0,
        ..QueueSettings::default()
    }
}

fn config(bestbuy_url: Option<String>) -> AppConfig {
    AppConfig {
        database_url: "postgres://unused".to_string(),
        env: Environment::Test,
        bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        log_level: "warn".to_string(),
        jwt_secret: "test-secret".to_string(),
        jwt_ttl_hours: 1,
        db_max_connections: 2,
        db_min_connections: 0,
        db_acquire_timeout_secs: 5,
        http_timeout_secs: 5,
        http_max_retries: 0,
        http_backoff_base_ms: 1,
        queue: settings(),
        shopify: None,
        shopify_webhook_secret: None,
        bestbuy: bestbuy_url.map(|api_url| BestBuyCredentials {
            api_key: MIRAKL_KEY.to_string(),
            api_url,
        }),
        bestbuy_webhook_secret: None,
        amazon_seller_id: None,
        smtp: None,
    }
}

fn http_settings() -> HttpSettings {
    HttpSettings {
        timeout_secs: 5,
        max_retries: 0,
        backoff_base_ms: 0,
    }
}

fn mirakl(server: &MockServer) -> ChannelConnector {
    let client =
        MiraklClient::with_base_url(&format!("{}/api", server.uri()), MIRAKL_KEY, &http_settings())
            .expect("mirakl client");
    ChannelConnector::BestBuy(client)
}

fn mirakl_order(order_id: &str, state: &str, quantity: i64, email: Option<&str>) -> Value {
    let mut order = json!({
        "order_id": order_id,
        "commercial_id": order_id.trim_start_matches("BB-"),
        "order_state": state,
        "created_date": "2026-03-01T10:00:00Z",
        "currency_iso_code": "CAD",
        "customer": {"firstname": "Jeanne", "lastname": "Tremblay"},
        "order_lines": [{
            "order_line_id": format!("{order_id}-1"),
            "offer_sku": "CBL-USB-C-2M",
            "product_title": "USB-C Cable 2m",
            "quantity": quantity,
            "price_unit": 10.0
        }]
    });
    if let Some(email) = email {
        order["customer_notification_email"] = json!(email);
    }
    order
}

/// Catalog product `CBL-USB-C-2M` with `quantity` units at the default location.
async fn stocked_cable(pool: &PgPool, quantity: i32) -> i64 {
    let product = omnidesk_db::create_product(
        pool,
        &NewProduct {
            sku: "CBL-USB-C-2M".to_string(),
            name: "USB-C Cable 2m".to_string(),
            description: None,
            brand: None,
            category: None,
            price: Decimal::new(1000, 2),
            cost: None,
            currency: None,
            status: None,
        },
    )
    .await
    .expect("product");
    omnidesk_db::set_inventory(pool, product.id, omnidesk_db::DEFAULT_LOCATION, quantity, None)
        .await
        .expect("inventory");
    product.id
}

/// `(quantity, reserved, available)` at the default location.
async fn stock(pool: &PgPool, product_id: i64) -> (i32, i32, i32) {
    let rows = omnidesk_db::list_inventory(pool, product_id)
        .await
        .expect("inventory");
    let row = rows
        .iter()
        .find(|row| row.location == omnidesk_db::DEFAULT_LOCATION)
        .expect("default location row");
    (row.quantity, row.reserved, row.available)
}

async fn ingest_and_process(pool: &PgPool, payload: &Value) -> BatchOutcome {
    ingest_sale(pool, Channel::BestBuy, payload, 3)
        .await
        .expect("ingest");
    process_sales_batch(pool, &settings())
        .await
        .expect("sales batch")
}

async fn order_id_for(pool: &PgPool, external_order_id: &str) -> i64 {
    sqlx::query_scalar::<_, i64>(
        "SELECT id FROM sales_orders WHERE channel = 'bestbuy' AND external_order_id = $1",
    )
    .bind(external_order_id)
    .fetch_one(pool)
    .await
    .expect("order row")
}

async fn sync_job(pool: &PgPool, channel: &str, data_type: &str, direction: &str) -> SyncJobRow {
    omnidesk_db::create_sync_job(pool, channel, data_type, direction, &json!({}), 3)
        .await
        .expect("sync job")
}

fn at(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339)
        .expect("timestamp")
        .with_timezone(&Utc)
}

// ---------------------------------------------------------------------------
// sales queue
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn queued_sale_becomes_a_reserved_order(pool: PgPool) {
    let product_id = stocked_cable(&pool, 10).await;

    let payload = mirakl_order("BB-1001", "WAITING_ACCEPTANCE", 3, None);
    let outcome = ingest_and_process(&pool, &payload).await;
    assert_eq!(outcome.claimed, 1);
    assert_eq!(outcome.succeeded, 1);

    let order_id = order_id_for(&pool, "BB-1001").await;
    let order = omnidesk_db::get_order(&pool, order_id).await.expect("order");
    assert_eq!(order.status, "pending");
    assert_eq!(order.subtotal, Decimal::new(3000, 2));
    assert_eq!(stock(&pool, product_id).await, (10, 3, 7));

    let processed = omnidesk_db::list_sales_queue(&pool, Some("processed"), 10)
        .await
        .expect("queue");
    assert_eq!(processed.len(), 1);
    assert_eq!(processed[0].order_id, Some(order_id));
}

#[sqlx::test(migrations = "../../migrations")]
async fn unmappable_sale_retries_then_fails(pool: PgPool) {
    let mut payload = mirakl_order("BB-2002", "WAITING_ACCEPTANCE", 1, None);
    payload["created_date"] = json!("yesterday");
    ingest_sale(&pool, Channel::BestBuy, &payload, 2)
        .await
        .expect("ingest");

    let first = process_sales_batch(&pool, &settings()).await.expect("batch");
    assert_eq!(first.failed, 1);
    let pending = omnidesk_db::list_sales_queue(&pool, Some("pending"), 10)
        .await
        .expect("queue");
    assert_eq!(pending[0].retry_count, 1);
    assert!(pending[0]
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("created_date")));

    let second = process_sales_batch(&pool, &settings()).await.expect("batch");
    assert_eq!(second.failed, 1);
    let failed = omnidesk_db::list_sales_queue(&pool, Some("failed"), 10)
        .await
        .expect("queue");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].retry_count, 2);
}

#[sqlx::test(migrations = "../../migrations")]
async fn abandoned_sale_claim_is_picked_up_by_the_next_batch(pool: PgPool) {
    stocked_cable(&pool, 10).await;
    ingest_sale(
        &pool,
        Channel::BestBuy,
        &mirakl_order("BB-3003", "WAITING_ACCEPTANCE", 1, None),
        3,
    )
    .await
    .expect("ingest");

    // A worker claims the row and never reports back.
    let claimed = omnidesk_db::claim_due_sales(&pool, 10).await.expect("claim");
    assert_eq!(claimed.len(), 1);
    sqlx::query("UPDATE sales_processing_queue SET updated_at = NOW() - INTERVAL '1 hour'")
        .execute(&pool)
        .await
        .expect("backdate claim");

    let settings = QueueSettings {
        claim_timeout_secs: 60,
        ..settings()
    };
    let outcome = process_sales_batch(&pool, &settings).await.expect("batch");
    assert_eq!(outcome.expired, 1);
    assert_eq!(outcome.claimed, 1);
    assert_eq!(outcome.succeeded, 1);

    let processed = omnidesk_db::list_sales_queue(&pool, Some("processed"), 10)
        .await
        .expect("queue");
    assert_eq!(processed[0].retry_count, 1);
}

// ---------------------------------------------------------------------------
// stock reservations across the order lifecycle
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn channel_status_updates_settle_reservations(pool: PgPool) {
    let product_id = stocked_cable(&pool, 10).await;

    ingest_and_process(&pool, &mirakl_order("BB-4001", "WAITING_ACCEPTANCE", 3, None)).await;
    ingest_and_process(&pool, &mirakl_order("BB-4002", "WAITING_ACCEPTANCE", 3, None)).await;
    assert_eq!(stock(&pool, product_id).await, (10, 6, 4));

    ingest_and_process(&pool, &mirakl_order("BB-4001", "SHIPPING", 3, None)).await;
    assert_eq!(stock(&pool, product_id).await, (10, 6, 4), "processing still holds");

    ingest_and_process(&pool, &mirakl_order("BB-4001", "SHIPPED", 3, None)).await;
    ingest_and_process(&pool, &mirakl_order("BB-4002", "CANCELED", 3, None)).await;

    let shipped = omnidesk_db::get_order(&pool, order_id_for(&pool, "BB-4001").await)
        .await
        .expect("order");
    let cancelled = omnidesk_db::get_order(&pool, order_id_for(&pool, "BB-4002").await)
        .await
        .expect("order");
    assert_eq!(shipped.status, "shipped");
    assert_eq!(cancelled.status, "cancelled");
    assert_eq!(stock(&pool, product_id).await, (7, 0, 7));

    // A late re-delivery of the shipped order must not move stock again.
    ingest_and_process(&pool, &mirakl_order("BB-4001", "SHIPPED", 3, None)).await;
    assert_eq!(stock(&pool, product_id).await, (7, 0, 7));
}

#[sqlx::test(migrations = "../../migrations")]
async fn cancelling_an_order_releases_its_stock(pool: PgPool) {
    let product_id = stocked_cable(&pool, 10).await;
    ingest_and_process(&pool, &mirakl_order("BB-5001", "WAITING_ACCEPTANCE", 4, None)).await;
    let order_id = order_id_for(&pool, "BB-5001").await;
    assert_eq!(stock(&pool, product_id).await, (10, 4, 6));

    let change = StatusChange {
        reason: Some("customer request"),
        ..StatusChange::default()
    };
    let order = change_order_status(&pool, order_id, OrderStatus::Cancelled, &change, 3)
        .await
        .expect("cancel");
    assert_eq!(order.status, "cancelled");
    assert_eq!(stock(&pool, product_id).await, (10, 0, 10));

    let items = omnidesk_db::list_order_items(&pool, order_id)
        .await
        .expect("items");
    assert!(items.iter().all(|item| item.reserved_qty == 0));
}

#[sqlx::test(migrations = "../../migrations")]
async fn shipping_consumes_stock_and_delivery_closes_the_order(pool: PgPool) {
    let product_id = stocked_cable(&pool, 10).await;
    ingest_and_process(
        &pool,
        &mirakl_order("BB-6001", "WAITING_ACCEPTANCE", 2, Some("jeanne@example.com")),
    )
    .await;
    let order_id = order_id_for(&pool, "BB-6001").await;

    change_order_status(&pool, order_id, OrderStatus::Processing, &StatusChange::default(), 3)
        .await
        .expect("processing");

    let shipment = NewShipment {
        carrier: "Purolator".to_string(),
        tracking_number: "PUR-778812".to_string(),
        tracking_url: None,
        items: None,
    };
    let (fulfillment, order) = ship_order(&pool, order_id, &shipment, None, 3)
        .await
        .expect("ship");
    assert_eq!(order.status, "shipped");
    assert_eq!(stock(&pool, product_id).await, (8, 0, 8));

    let (_, delivered) = mark_delivered(&pool, fulfillment.id, None, 3)
        .await
        .expect("deliver");
    assert_eq!(delivered.map(|o| o.status).as_deref(), Some("delivered"));
    assert_eq!(stock(&pool, product_id).await, (8, 0, 8));

    let queued: Vec<String> = omnidesk_db::list_notifications(&pool, None, Some(order_id), 10)
        .await
        .expect("notifications")
        .into_iter()
        .map(|n| n.template)
        .collect();
    for template in ["order_processing", "order_shipped", "order_delivered"] {
        assert_eq!(
            queued.iter().filter(|t| *t == template).count(),
            1,
            "{template} queued once"
        );
    }
}

#[sqlx::test(migrations = "../../migrations")]
async fn shipping_from_pending_is_rejected_without_touching_stock(pool: PgPool) {
    let product_id = stocked_cable(&pool, 10).await;
    ingest_and_process(&pool, &mirakl_order("BB-6002", "WAITING_ACCEPTANCE", 2, None)).await;
    let order_id = order_id_for(&pool, "BB-6002").await;

    let shipment = NewShipment {
        carrier: "UPS".to_string(),
        tracking_number: "1Z999".to_string(),
        tracking_url: None,
        items: None,
    };
    let err = ship_order(&pool, order_id, &shipment, None, 3)
        .await
        .expect_err("pending cannot ship");
    assert!(matches!(err, ServiceError::Core(_)));
    assert_eq!(stock(&pool, product_id).await, (10, 2, 8));
}

// ---------------------------------------------------------------------------
// sync jobs
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn first_order_pull_reads_everything_and_sets_the_cursor(pool: PgPool) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .and(query_param_is_missing("start_update_date"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "orders": [
                mirakl_order("BB-7001", "WAITING_ACCEPTANCE", 1, None),
                {"commercial_id": "no-id"}
            ],
            "total_count": 2
        })))
        .expect(1)
        .mount(&server)
        .await;

    let before = Utc::now();
    let job = sync_job(&pool, "bestbuy", "orders", "pull").await;
    let result = execute_job(&pool, &mirakl(&server), &job, 3)
        .await
        .expect("pull");
    assert_eq!(result["fetched"], 2);
    assert_eq!(result["enqueued"], 1);
    assert_eq!(result["skipped"], 1);

    let cursor = omnidesk_db::get_sync_cursor(&pool, "bestbuy", "orders")
        .await
        .expect("cursor")
        .expect("cursor set");
    assert!(cursor >= before - chrono::Duration::seconds(1));
    let queued = omnidesk_db::list_sales_queue(&pool, Some("pending"), 10)
        .await
        .expect("queue");
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].external_order_id, "BB-7001");
}

#[sqlx::test(migrations = "../../migrations")]
async fn later_order_pulls_resume_from_the_cursor_with_overlap(pool: PgPool) {
    let last_run = Utc
        .with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
        .single()
        .expect("timestamp");
    omnidesk_db::advance_sync_cursor(&pool, "bestbuy", "orders", last_run)
        .await
        .expect("seed cursor");

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .and(query_param(
            "start_update_date",
            at("2026-03-01T11:55:00Z").to_rfc3339_opts(SecondsFormat::Secs, true),
        ))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"orders": [], "total_count": 0})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let job = sync_job(&pool, "bestbuy", "orders", "pull").await;
    let result = execute_job(&pool, &mirakl(&server), &job, 3)
        .await
        .expect("pull");
    assert_eq!(result["fetched"], 0);

    let cursor = omnidesk_db::get_sync_cursor(&pool, "bestbuy", "orders")
        .await
        .expect("cursor")
        .expect("cursor set");
    assert!(cursor > last_run);
    // Other data types keep their own position.
    assert!(omnidesk_db::get_sync_cursor(&pool, "bestbuy", "products")
        .await
        .expect("cursor")
        .is_none());
}

#[sqlx::test(migrations = "../../migrations")]
async fn failed_order_pull_keeps_the_cursor_and_is_rescheduled(pool: PgPool) {
    let last_run = at("2026-03-01T12:00:00Z");
    omnidesk_db::advance_sync_cursor(&pool, "bestbuy", "orders", last_run)
        .await
        .expect("seed cursor");

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    sync_job(&pool, "bestbuy", "orders", "pull").await;
    let config = config(Some(format!("{}/api", server.uri())));
    let outcome = process_sync_batch(&pool, &config).await.expect("batch");
    assert_eq!(outcome.claimed, 1);
    assert_eq!(outcome.failed, 1);

    let cursor = omnidesk_db::get_sync_cursor(&pool, "bestbuy", "orders")
        .await
        .expect("cursor");
    assert_eq!(cursor, Some(last_run));

    let jobs = omnidesk_db::list_sync_jobs(&pool, Some("pending"), None, 10)
        .await
        .expect("jobs");
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].retry_count, 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn sync_batch_completes_a_job_and_stamps_the_channel(pool: PgPool) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"orders": [], "total_count": 0})),
        )
        .mount(&server)
        .await;

    let job = sync_job(&pool, "bestbuy", "orders", "pull").await;
    let config = config(Some(format!("{}/api", server.uri())));
    let outcome = process_sync_batch(&pool, &config).await.expect("batch");
    assert_eq!(outcome.succeeded, 1);

    let job = omnidesk_db::get_sync_job(&pool, job.id).await.expect("job");
    assert_eq!(job.status, "completed");
    assert_eq!(job.result.as_ref().map(|r| r["fetched"].clone()), Some(json!(0)));
    let channel = omnidesk_db::get_channel(&pool, "bestbuy").await.expect("channel");
    assert!(channel.last_synced_at.is_some());
}

#[sqlx::test(migrations = "../../migrations")]
async fn offers_pull_upserts_products_then_sets_stock(pool: PgPool) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/offers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "offers": [
                {"offer_id": 88101, "shop_sku": "KBD-MX-CA", "product_title": "Keyboard",
                 "price": 49.99, "quantity": 4, "active": true},
                {"offer_id": 88102, "product_title": "No SKU"}
            ],
            "total_count": 2
        })))
        .mount(&server)
        .await;
    let connector = mirakl(&server);

    let products = sync_job(&pool, "bestbuy", "products", "pull").await;
    let result = execute_job(&pool, &connector, &products, 3)
        .await
        .expect("products pull");
    assert_eq!(result["upserted"], 1);
    assert_eq!(result["skipped"], 1);
    let keyboard = omnidesk_db::get_product_by_sku(&pool, "KBD-MX-CA")
        .await
        .expect("lookup")
        .expect("product created");
    assert_eq!(keyboard.price, Decimal::new(4999, 2));

    let inventory = sync_job(&pool, "bestbuy", "inventory", "pull").await;
    let result = execute_job(&pool, &connector, &inventory, 3)
        .await
        .expect("inventory pull");
    assert_eq!(result["updated"], 1);
    assert_eq!(result["unmatched"], 1);
    assert_eq!(stock(&pool, keyboard.id).await, (4, 0, 4));
}

#[sqlx::test(migrations = "../../migrations")]
async fn inventory_push_sends_available_stock(pool: PgPool) {
    let product_id = stocked_cable(&pool, 10).await;
    omnidesk_db::upsert_channel_product(
        &pool,
        product_id,
        "bestbuy",
        &ChannelListing {
            external_id: "88200".to_string(),
            channel_sku: Some("BB-CBL-2M".to_string()),
            channel_price: None,
            status: None,
        },
    )
    .await
    .expect("listing");
    ingest_and_process(&pool, &mirakl_order("BB-8001", "WAITING_ACCEPTANCE", 3, None)).await;

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/offers"))
        .and(body_json(json!({"offers": [
            {"shop_sku": "BB-CBL-2M", "quantity": 7, "update_delete": "update"}
        ]})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"import_id": 9120})))
        .expect(1)
        .mount(&server)
        .await;

    let job = sync_job(&pool, "bestbuy", "inventory", "push").await;
    let result = execute_job(&pool, &mirakl(&server), &job, 3)
        .await
        .expect("push");
    assert_eq!(result["pushed"], 1);
    assert_eq!(result["receipt"]["import_id"], 9120);
}

#[sqlx::test(migrations = "../../migrations")]
async fn shopify_inventory_push_is_not_supported(pool: PgPool) {
    let client = ShopifyClient::with_base_url("http://127.0.0.1:9", "shpat_test", &http_settings())
        .expect("shopify client");
    let job = sync_job(&pool, "shopify", "inventory", "push").await;

    let err = execute_job(&pool, &ChannelConnector::Shopify(client), &job, 3)
        .await
        .expect_err("shopify has no stock push");
    assert!(matches!(
        err,
        ServiceError::Channel(ChannelError::NotSupported { .. })
    ));
}

#[sqlx::test(migrations = "../../migrations")]
async fn jobs_for_inactive_channels_fail_without_retry(pool: PgPool) {
    let job = sync_job(&pool, "amazon", "orders", "pull").await;

    let outcome = process_sync_batch(&pool, &config(None)).await.expect("batch");
    assert_eq!(outcome.failed, 1);

    let job = omnidesk_db::get_sync_job(&pool, job.id).await.expect("job");
    assert_eq!(job.status, "failed");
    assert_eq!(job.retry_count, 0);
    assert!(job
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("inactive")));
}

// ---------------------------------------------------------------------------
// workflow rules
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn matching_rule_applies_its_actions_once(pool: PgPool) {
    stocked_cable(&pool, 10).await;
    ingest_and_process(
        &pool,
        &mirakl_order("BB-9001", "WAITING_ACCEPTANCE", 5, Some("jeanne@example.com")),
    )
    .await;
    let order_id = order_id_for(&pool, "BB-9001").await;

    omnidesk_db::create_workflow_rule(
        &pool,
        &NewWorkflowRule {
            name: "auto-confirm".to_string(),
            from_status: "pending".to_string(),
            to_status: "confirmed".to_string(),
            conditions: json!([{ "field": "total", "operator": "gt", "value": 20 }]),
            actions: json!([
                { "type": "tag", "value": "auto" },
                { "type": "note", "value": "confirmed by rule" },
                { "type": "notify", "template": "order_confirmed" },
                { "type": "notify", "template": "order_processing" }
            ]),
            priority: 10,
            is_active: true,
        },
    )
    .await
    .expect("rule");

    let applied = evaluate_order(&pool, order_id, None, 3)
        .await
        .expect("evaluate");
    assert_eq!(applied.map(|rule| rule.name).as_deref(), Some("auto-confirm"));

    let order = omnidesk_db::get_order(&pool, order_id).await.expect("order");
    assert_eq!(order.status, "confirmed");
    assert!(order.tags.iter().any(|tag| tag == "auto"));
    assert!(order
        .notes
        .as_deref()
        .is_some_and(|notes| notes.contains("confirmed by rule")));

    let mut templates: Vec<String> =
        omnidesk_db::list_notifications(&pool, None, Some(order_id), 10)
            .await
            .expect("notifications")
            .into_iter()
            .map(|n| n.template)
            .collect();
    templates.sort();
    assert_eq!(templates, ["order_confirmed", "order_processing"]);

    // The order is no longer pending, so the rule does not fire again.
    assert!(evaluate_order(&pool, order_id, None, 3)
        .await
        .expect("evaluate")
        .is_none());
}

#[sqlx::test(migrations = "../../migrations")]
async fn rule_with_unmet_conditions_leaves_the_order_alone(pool: PgPool) {
    stocked_cable(&pool, 10).await;
    ingest_and_process(&pool, &mirakl_order("BB-9002", "WAITING_ACCEPTANCE", 1, None)).await;
    let order_id = order_id_for(&pool, "BB-9002").await;

    omnidesk_db::create_workflow_rule(
        &pool,
        &NewWorkflowRule {
            name: "hold big orders".to_string(),
            from_status: "pending".to_string(),
            to_status: "on_hold".to_string(),
            conditions: json!([{ "field": "total", "operator": "gte", "value": 1000 }]),
            actions: json!([{ "type": "tag", "value": "review" }]),
            priority: 5,
            is_active: true,
        },
    )
    .await
    .expect("rule");

    assert!(evaluate_order(&pool, order_id, None, 3)
        .await
        .expect("evaluate")
        .is_none());
    let order = omnidesk_db::get_order(&pool, order_id).await.expect("order");
    assert_eq!(order.status, "pending");
    assert!(order.tags.is_empty());
}

// ---------------------------------------------------------------------------
// notifications
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn notification_batch_sends_due_messages(pool: PgPool) {
    ingest_and_process(
        &pool,
        &mirakl_order("BB-9101", "WAITING_ACCEPTANCE", 1, Some("jeanne@example.com")),
    )
    .await;
    let order_id = order_id_for(&pool, "BB-9101").await;
    let queued = enqueue_manual(&pool, order_id, "order_confirmed", 3)
        .await
        .expect("queued");
    assert_eq!(queued.status, "pending");

    let outcome = process_notification_batch(&pool, &LogMailer, &settings())
        .await
        .expect("batch");
    assert_eq!(outcome.claimed, 1);
    assert_eq!(outcome.succeeded, 1);

    let sent = omnidesk_db::get_notification(&pool, queued.id)
        .await
        .expect("notification");
    assert_eq!(sent.status, "sent");
    assert!(sent.sent_at.is_some());
}

#[sqlx::test(migrations = "../../migrations")]
async fn undeliverable_notification_retries_then_fails(pool: PgPool) {
    ingest_and_process(
        &pool,
        &mirakl_order("BB-9102", "WAITING_ACCEPTANCE", 1, Some("not-an-address")),
    )
    .await;
    let order_id = order_id_for(&pool, "BB-9102").await;
    let queued = enqueue_manual(&pool, order_id, "order_confirmed", 2)
        .await
        .expect("queued");

    let first = process_notification_batch(&pool, &LogMailer, &settings())
        .await
        .expect("batch");
    assert_eq!(first.failed, 1);
    let row = omnidesk_db::get_notification(&pool, queued.id)
        .await
        .expect("notification");
    assert_eq!(row.status, "pending");
    assert_eq!(row.retry_count, 1);

    let second = process_notification_batch(&pool, &LogMailer, &settings())
        .await
        .expect("batch");
    assert_eq!(second.failed, 1);
    let row = omnidesk_db::get_notification(&pool, queued.id)
        .await
        .expect("notification");
    assert_eq!(row.status, "failed");
    assert_eq!(row.retry_count, 2);
    assert!(row.last_error.is_some());
}
