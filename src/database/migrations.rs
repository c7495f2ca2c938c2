//! Database migrations for marketplace-sync
//!
//! This module contains SQL migrations for the SQLite database schema.

/// SQL statement to create the initial database schema
pub const CREATE_SCHEMA: &str = r#"
-- Product mirror table
CREATE TABLE IF NOT EXISTS remote_products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_type TEXT NOT NULL,
    sku TEXT NOT NULL,
    name TEXT NOT NULL,
    price REAL NOT NULL,
    sale_price REAL,
    currency TEXT,
    stock INTEGER NOT NULL DEFAULT 0,
    reserved_stock INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    remote_modified_at DATETIME,
    sync_status TEXT NOT NULL DEFAULT 'pending',
    sync_error TEXT,
    sync_attempts INTEGER NOT NULL DEFAULT 0,
    last_synced_at DATETIME,
    raw_payload TEXT NOT NULL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME,
    UNIQUE(sku, account_type)
);

CREATE INDEX IF NOT EXISTS idx_products_account ON remote_products(account_type);
CREATE INDEX IF NOT EXISTS idx_products_synced_at ON remote_products(last_synced_at);

-- Offer mirror table
CREATE TABLE IF NOT EXISTS remote_offers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_type TEXT NOT NULL,
    sku TEXT NOT NULL,
    price REAL NOT NULL,
    sale_price REAL,
    stock INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    remote_modified_at DATETIME,
    sync_status TEXT NOT NULL DEFAULT 'pending',
    sync_error TEXT,
    sync_attempts INTEGER NOT NULL DEFAULT 0,
    last_synced_at DATETIME,
    raw_payload TEXT NOT NULL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME,
    UNIQUE(sku, account_type)
);

CREATE INDEX IF NOT EXISTS idx_offers_account ON remote_offers(account_type);

-- Order mirror table
CREATE TABLE IF NOT EXISTS remote_orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_type TEXT NOT NULL,
    remote_order_id TEXT NOT NULL,
    status TEXT NOT NULL,
    customer_name TEXT NOT NULL,
    customer_email TEXT,
    total_amount REAL NOT NULL,
    line_items TEXT,
    remote_modified_at DATETIME,
    sync_status TEXT NOT NULL DEFAULT 'pending',
    sync_error TEXT,
    sync_attempts INTEGER NOT NULL DEFAULT 0,
    last_synced_at DATETIME,
    raw_payload TEXT NOT NULL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME,
    UNIQUE(remote_order_id, account_type)
);

CREATE INDEX IF NOT EXISTS idx_orders_account ON remote_orders(account_type);
CREATE INDEX IF NOT EXISTS idx_orders_status ON remote_orders(status);

-- Sync run log table
CREATE TABLE IF NOT EXISTS sync_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sync_type TEXT NOT NULL,
    account_scope TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'running',
    total_items INTEGER NOT NULL DEFAULT 0,
    processed_items INTEGER NOT NULL DEFAULT 0,
    created_items INTEGER NOT NULL DEFAULT 0,
    updated_items INTEGER NOT NULL DEFAULT 0,
    unchanged_items INTEGER NOT NULL DEFAULT 0,
    conflicted_items INTEGER NOT NULL DEFAULT 0,
    failed_items INTEGER NOT NULL DEFAULT 0,
    errors TEXT NOT NULL DEFAULT '[]',
    rate_limit_hits INTEGER NOT NULL DEFAULT 0,
    api_requests_made INTEGER NOT NULL DEFAULT 0,
    started_at DATETIME NOT NULL,
    completed_at DATETIME
);

CREATE INDEX IF NOT EXISTS idx_sync_logs_status ON sync_logs(status);

-- Sync progress table, at most one row per sync log
CREATE TABLE IF NOT EXISTS sync_progress (
    sync_log_id INTEGER PRIMARY KEY REFERENCES sync_logs(id),
    current_page INTEGER NOT NULL DEFAULT 0,
    total_pages INTEGER,
    current_item INTEGER NOT NULL DEFAULT 0,
    total_items INTEGER,
    percentage_complete REAL NOT NULL DEFAULT 0,
    items_per_second REAL NOT NULL DEFAULT 0,
    estimated_completion DATETIME,
    is_active INTEGER NOT NULL DEFAULT 1,
    updated_at DATETIME NOT NULL
);

-- Import conflict table
CREATE TABLE IF NOT EXISTS import_conflicts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sync_log_id INTEGER NOT NULL REFERENCES sync_logs(id),
    entity_kind TEXT NOT NULL,
    entity_key TEXT NOT NULL,
    conflict_type TEXT NOT NULL,
    remote_payload TEXT NOT NULL,
    local_payload TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    resolution TEXT,
    created_at DATETIME NOT NULL,
    resolved_at DATETIME
);

CREATE INDEX IF NOT EXISTS idx_conflicts_status ON import_conflicts(status);

-- API request audit log, minimum 30-day retention
CREATE TABLE IF NOT EXISTS api_request_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    headers TEXT NOT NULL,
    payload TEXT,
    status INTEGER,
    duration_ms INTEGER NOT NULL DEFAULT 0,
    is_error INTEGER NOT NULL DEFAULT 0,
    created_at DATETIME NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_request_log_created ON api_request_log(created_at);
"#;

/// Get the migration version
pub fn migration_version() -> i32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_create_schema_valid_sql() {
        // Create an in-memory SQLite database
        let conn = Connection::open_in_memory().unwrap();

        // Execute the schema creation
        conn.execute_batch(CREATE_SCHEMA).unwrap();

        // Verify tables were created
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(Result::ok)
            .collect();

        assert!(tables.contains(&"remote_products".to_string()));
        assert!(tables.contains(&"remote_offers".to_string()));
        assert!(tables.contains(&"remote_orders".to_string()));
        assert!(tables.contains(&"sync_logs".to_string()));
        assert!(tables.contains(&"sync_progress".to_string()));
        assert!(tables.contains(&"import_conflicts".to_string()));
        assert!(tables.contains(&"api_request_log".to_string()));
    }

    #[test]
    fn test_product_natural_key_unique() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(CREATE_SCHEMA).unwrap();

        // Insert first record
        conn.execute(
            "INSERT INTO remote_products (account_type, sku, name, price, raw_payload) VALUES (?, ?, ?, ?, ?)",
            rusqlite::params!["main", "SKU-1", "Widget", 10.0, "{}"],
        )
        .unwrap();

        // Same SKU under the other account is fine
        conn.execute(
            "INSERT INTO remote_products (account_type, sku, name, price, raw_payload) VALUES (?, ?, ?, ?, ?)",
            rusqlite::params!["fbe", "SKU-1", "Widget", 10.0, "{}"],
        )
        .unwrap();

        // Duplicate (sku, account) must fail
        let result = conn.execute(
            "INSERT INTO remote_products (account_type, sku, name, price, raw_payload) VALUES (?, ?, ?, ?, ?)",
            rusqlite::params!["main", "SKU-1", "Widget again", 11.0, "{}"],
        );

        assert!(result.is_err());
    }

    #[test]
    fn test_order_natural_key_unique() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(CREATE_SCHEMA).unwrap();

        conn.execute(
            "INSERT INTO remote_orders (account_type, remote_order_id, status, customer_name, total_amount, raw_payload) VALUES (?, ?, ?, ?, ?, ?)",
            rusqlite::params!["main", "ORD-1", "new", "Ana", 10.0, "{}"],
        )
        .unwrap();

        let result = conn.execute(
            "INSERT INTO remote_orders (account_type, remote_order_id, status, customer_name, total_amount, raw_payload) VALUES (?, ?, ?, ?, ?, ?)",
            rusqlite::params!["main", "ORD-1", "shipped", "Ana", 10.0, "{}"],
        );

        assert!(result.is_err());
    }

    #[test]
    fn test_sync_progress_one_row_per_log() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(CREATE_SCHEMA).unwrap();

        conn.execute(
            "INSERT INTO sync_progress (sync_log_id, updated_at) VALUES (?, ?)",
            rusqlite::params![1, "2026-01-01T00:00:00Z"],
        )
        .unwrap();

        // Second row for the same sync log must fail
        let result = conn.execute(
            "INSERT INTO sync_progress (sync_log_id, updated_at) VALUES (?, ?)",
            rusqlite::params![1, "2026-01-01T00:00:01Z"],
        );

        assert!(result.is_err());
    }

    #[test]
    fn test_migration_version() {
        assert_eq!(migration_version(), 1);
    }
}
