//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};

use marketplace_sync::config::{AccountConfig, Config, RateLimitConfig};
use marketplace_sync::database::SqliteDatabase;
use marketplace_sync::models::AccountType;

/// Create an in-memory database for testing
pub async fn create_test_database() -> Arc<SqliteDatabase> {
    Arc::new(
        SqliteDatabase::in_memory()
            .await
            .expect("Failed to create test database"),
    )
}

/// Create a test configuration pointed at a mock server
///
/// Retries are immediate, jitter and the circuit breaker are off, and
/// rate ceilings are high enough not to slow tests down.
pub fn create_test_config(base_url: &str, items_per_page: u32) -> Config {
    let mut config = Config::default();
    config.api.base_url = base_url.to_string();
    config.api.connect_timeout_secs = 5;
    config.api.request_timeout_secs = 10;
    config.retry.max_retries = 2;
    config.retry.initial_backoff_ms = 0;
    config.retry.max_backoff_ms = 0;
    config.retry.jitter = false;
    config.circuit_breaker.enabled = false;
    config.sync.items_per_page = items_per_page;
    config.sync.max_pages = 50;
    config.sync.inter_page_delay_ms = 0;

    for account in AccountType::all() {
        config.accounts.insert(
            account.to_string(),
            AccountConfig {
                enabled: true,
                username: format!("seller-{}", account),
                password: "secret".to_string(),
                rate_limit: RateLimitConfig {
                    orders_per_second: 100,
                    other_per_second: 100,
                },
            },
        );
    }

    config
}

/// Build a listing response envelope
pub fn envelope(items: Vec<Value>, total_pages: Option<u32>) -> Value {
    json!({
        "isError": false,
        "messages": [],
        "results": items,
        "pagination": {
            "totalPages": total_pages,
            "totalItems": null
        }
    })
}

/// Build a product listing item
pub fn product_item(sku: &str, price: f64) -> Value {
    json!({
        "sku": sku,
        "name": format!("Product {}", sku),
        "price": price,
        "stock": 10,
        "reserved_stock": 2
    })
}

/// Build an order listing item
pub fn order_item(order_id: &str, status: &str) -> Value {
    json!({
        "order_id": order_id,
        "status": status,
        "customer_name": "Ana Pop",
        "customer_email": "ana@example.com",
        "total_amount": 120.5,
        "line_items": [{"sku": "SKU-1", "quantity": 2}]
    })
}
