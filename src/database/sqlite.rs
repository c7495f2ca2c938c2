//! SQLite implementation of the Database trait
//!
//! This module provides a SQLite-based implementation of the Database
//! trait using rusqlite and tokio-rusqlite for async operations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use super::migrations::CREATE_SCHEMA;
use super::Database;
use crate::error::DbError;
use crate::models::{
    AccountType, ConflictStatus, ImportConflict, RemoteOffer, RemoteOrder, RemoteProduct,
    RequestLogEntry, SyncLog, SyncProgress, SyncType,
};

/// SQLite database implementation
pub struct SqliteDatabase {
    conn: Connection,
}

impl SqliteDatabase {
    /// Create a new SQLite database connection
    ///
    /// Use `:memory:` for an in-memory database or a file path for
    /// persistent storage.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let conn = Connection::open(path).await?;

        // Run migrations
        conn.call(|conn| {
            conn.execute_batch(CREATE_SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Create a new in-memory database (useful for testing)
    pub async fn in_memory() -> Result<Self, DbError> {
        Self::new(":memory:").await
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    // =========================================================================
    // Product mirror operations
    // =========================================================================

    async fn get_product(
        &self,
        account: AccountType,
        sku: &str,
    ) -> Result<Option<RemoteProduct>, DbError> {
        let account = account.to_string();
        let sku = sku.to_string();

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, account_type, sku, name, price, sale_price, currency,
                           stock, reserved_stock, is_active, remote_modified_at,
                           sync_status, sync_error, sync_attempts, last_synced_at,
                           raw_payload, created_at, updated_at
                    FROM remote_products
                    WHERE account_type = ?1 AND sku = ?2
                    "#,
                )?;

                let result = stmt
                    .query_row(rusqlite::params![account, sku], product_from_row)
                    .optional()?;

                Ok(result)
            })
            .await
            .map_err(map_db_err)
    }

    async fn insert_product(&self, product: &RemoteProduct) -> Result<i64, DbError> {
        let p = product.clone();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO remote_products
                    (account_type, sku, name, price, sale_price, currency, stock,
                     reserved_stock, is_active, remote_modified_at, sync_status,
                     sync_error, sync_attempts, last_synced_at, raw_payload,
                     created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
                    "#,
                    rusqlite::params![
                        p.account.to_string(),
                        p.sku,
                        p.name,
                        p.price,
                        p.sale_price,
                        p.currency,
                        p.stock,
                        p.reserved_stock,
                        p.is_active as i64,
                        p.remote_modified_at.map(|dt| dt.to_rfc3339()),
                        p.sync_status.to_string(),
                        p.sync_error,
                        p.sync_attempts,
                        p.last_synced_at.map(|dt| dt.to_rfc3339()),
                        p.raw_payload.to_string(),
                        Utc::now().to_rfc3339(),
                        p.updated_at.map(|dt| dt.to_rfc3339()),
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(map_db_err)
    }

    async fn update_product(&self, product: &RemoteProduct) -> Result<(), DbError> {
        let p = product.clone();

        let rows_affected = self
            .conn
            .call(move |conn| {
                let count = conn.execute(
                    r#"
                    UPDATE remote_products
                    SET name = ?1, price = ?2, sale_price = ?3, currency = ?4,
                        stock = ?5, reserved_stock = ?6, is_active = ?7,
                        remote_modified_at = ?8, sync_status = ?9, sync_error = ?10,
                        sync_attempts = ?11, last_synced_at = ?12, raw_payload = ?13,
                        updated_at = ?14
                    WHERE account_type = ?15 AND sku = ?16
                    "#,
                    rusqlite::params![
                        p.name,
                        p.price,
                        p.sale_price,
                        p.currency,
                        p.stock,
                        p.reserved_stock,
                        p.is_active as i64,
                        p.remote_modified_at.map(|dt| dt.to_rfc3339()),
                        p.sync_status.to_string(),
                        p.sync_error,
                        p.sync_attempts,
                        p.last_synced_at.map(|dt| dt.to_rfc3339()),
                        p.raw_payload.to_string(),
                        p.updated_at.map(|dt| dt.to_rfc3339()),
                        p.account.to_string(),
                        p.sku,
                    ],
                )?;
                Ok(count)
            })
            .await
            .map_err(map_db_err)?;

        if rows_affected == 0 {
            return Err(DbError::NotFound);
        }

        Ok(())
    }

    async fn touch_product_sync(
        &self,
        account: AccountType,
        sku: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let account = account.to_string();
        let sku = sku.to_string();
        let at = at.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE remote_products SET last_synced_at = ?1 WHERE account_type = ?2 AND sku = ?3",
                    rusqlite::params![at, account, sku],
                )?;
                Ok(())
            })
            .await
            .map_err(map_db_err)
    }

    async fn mark_products_inactive_except(
        &self,
        account: AccountType,
        seen_skus: &[String],
    ) -> Result<u64, DbError> {
        let account = account.to_string();
        let seen: Vec<String> = seen_skus.to_vec();

        self.conn
            .call(move |conn| {
                let sql = if seen.is_empty() {
                    "UPDATE remote_products SET is_active = 0, updated_at = ? \
                     WHERE account_type = ? AND is_active = 1"
                        .to_string()
                } else {
                    let placeholders = vec!["?"; seen.len()].join(", ");
                    format!(
                        "UPDATE remote_products SET is_active = 0, updated_at = ? \
                         WHERE account_type = ? AND is_active = 1 AND sku NOT IN ({})",
                        placeholders
                    )
                };

                let mut params: Vec<String> = vec![Utc::now().to_rfc3339(), account];
                params.extend(seen);

                let count = conn.execute(&sql, rusqlite::params_from_iter(params.iter()))?;
                Ok(count as u64)
            })
            .await
            .map_err(map_db_err)
    }

    async fn count_products(&self, account: AccountType) -> Result<u64, DbError> {
        let account = account.to_string();

        self.conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM remote_products WHERE account_type = ?1",
                    [&account],
                    |row| row.get(0),
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(map_db_err)
    }

    // =========================================================================
    // Offer mirror operations
    // =========================================================================

    async fn get_offer(
        &self,
        account: AccountType,
        sku: &str,
    ) -> Result<Option<RemoteOffer>, DbError> {
        let account = account.to_string();
        let sku = sku.to_string();

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, account_type, sku, price, sale_price, stock, is_active,
                           remote_modified_at, sync_status, sync_error, sync_attempts,
                           last_synced_at, raw_payload, created_at, updated_at
                    FROM remote_offers
                    WHERE account_type = ?1 AND sku = ?2
                    "#,
                )?;

                let result = stmt
                    .query_row(rusqlite::params![account, sku], offer_from_row)
                    .optional()?;

                Ok(result)
            })
            .await
            .map_err(map_db_err)
    }

    async fn insert_offer(&self, offer: &RemoteOffer) -> Result<i64, DbError> {
        let o = offer.clone();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO remote_offers
                    (account_type, sku, price, sale_price, stock, is_active,
                     remote_modified_at, sync_status, sync_error, sync_attempts,
                     last_synced_at, raw_payload, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                    "#,
                    rusqlite::params![
                        o.account.to_string(),
                        o.sku,
                        o.price,
                        o.sale_price,
                        o.stock,
                        o.is_active as i64,
                        o.remote_modified_at.map(|dt| dt.to_rfc3339()),
                        o.sync_status.to_string(),
                        o.sync_error,
                        o.sync_attempts,
                        o.last_synced_at.map(|dt| dt.to_rfc3339()),
                        o.raw_payload.to_string(),
                        Utc::now().to_rfc3339(),
                        o.updated_at.map(|dt| dt.to_rfc3339()),
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(map_db_err)
    }

    async fn update_offer(&self, offer: &RemoteOffer) -> Result<(), DbError> {
        let o = offer.clone();

        let rows_affected = self
            .conn
            .call(move |conn| {
                let count = conn.execute(
                    r#"
                    UPDATE remote_offers
                    SET price = ?1, sale_price = ?2, stock = ?3, is_active = ?4,
                        remote_modified_at = ?5, sync_status = ?6, sync_error = ?7,
                        sync_attempts = ?8, last_synced_at = ?9, raw_payload = ?10,
                        updated_at = ?11
                    WHERE account_type = ?12 AND sku = ?13
                    "#,
                    rusqlite::params![
                        o.price,
                        o.sale_price,
                        o.stock,
                        o.is_active as i64,
                        o.remote_modified_at.map(|dt| dt.to_rfc3339()),
                        o.sync_status.to_string(),
                        o.sync_error,
                        o.sync_attempts,
                        o.last_synced_at.map(|dt| dt.to_rfc3339()),
                        o.raw_payload.to_string(),
                        o.updated_at.map(|dt| dt.to_rfc3339()),
                        o.account.to_string(),
                        o.sku,
                    ],
                )?;
                Ok(count)
            })
            .await
            .map_err(map_db_err)?;

        if rows_affected == 0 {
            return Err(DbError::NotFound);
        }

        Ok(())
    }

    async fn touch_offer_sync(
        &self,
        account: AccountType,
        sku: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let account = account.to_string();
        let sku = sku.to_string();
        let at = at.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE remote_offers SET last_synced_at = ?1 WHERE account_type = ?2 AND sku = ?3",
                    rusqlite::params![at, account, sku],
                )?;
                Ok(())
            })
            .await
            .map_err(map_db_err)
    }

    async fn mark_offers_inactive_except(
        &self,
        account: AccountType,
        seen_skus: &[String],
    ) -> Result<u64, DbError> {
        let account = account.to_string();
        let seen: Vec<String> = seen_skus.to_vec();

        self.conn
            .call(move |conn| {
                let sql = if seen.is_empty() {
                    "UPDATE remote_offers SET is_active = 0, updated_at = ? \
                     WHERE account_type = ? AND is_active = 1"
                        .to_string()
                } else {
                    let placeholders = vec!["?"; seen.len()].join(", ");
                    format!(
                        "UPDATE remote_offers SET is_active = 0, updated_at = ? \
                         WHERE account_type = ? AND is_active = 1 AND sku NOT IN ({})",
                        placeholders
                    )
                };

                let mut params: Vec<String> = vec![Utc::now().to_rfc3339(), account];
                params.extend(seen);

                let count = conn.execute(&sql, rusqlite::params_from_iter(params.iter()))?;
                Ok(count as u64)
            })
            .await
            .map_err(map_db_err)
    }

    // =========================================================================
    // Order mirror operations
    // =========================================================================

    async fn get_order(
        &self,
        account: AccountType,
        remote_order_id: &str,
    ) -> Result<Option<RemoteOrder>, DbError> {
        let account = account.to_string();
        let remote_order_id = remote_order_id.to_string();

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, account_type, remote_order_id, status, customer_name,
                           customer_email, total_amount, line_items, remote_modified_at,
                           sync_status, sync_error, sync_attempts, last_synced_at,
                           raw_payload, created_at, updated_at
                    FROM remote_orders
                    WHERE account_type = ?1 AND remote_order_id = ?2
                    "#,
                )?;

                let result = stmt
                    .query_row(rusqlite::params![account, remote_order_id], order_from_row)
                    .optional()?;

                Ok(result)
            })
            .await
            .map_err(map_db_err)
    }

    async fn insert_order(&self, order: &RemoteOrder) -> Result<i64, DbError> {
        let o = order.clone();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO remote_orders
                    (account_type, remote_order_id, status, customer_name, customer_email,
                     total_amount, line_items, remote_modified_at, sync_status, sync_error,
                     sync_attempts, last_synced_at, raw_payload, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                    "#,
                    rusqlite::params![
                        o.account.to_string(),
                        o.remote_order_id,
                        o.status.to_string(),
                        o.customer_name,
                        o.customer_email,
                        o.total_amount,
                        o.line_items.as_ref().map(|v| v.to_string()),
                        o.remote_modified_at.map(|dt| dt.to_rfc3339()),
                        o.sync_status.to_string(),
                        o.sync_error,
                        o.sync_attempts,
                        o.last_synced_at.map(|dt| dt.to_rfc3339()),
                        o.raw_payload.to_string(),
                        Utc::now().to_rfc3339(),
                        o.updated_at.map(|dt| dt.to_rfc3339()),
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(map_db_err)
    }

    async fn update_order(&self, order: &RemoteOrder) -> Result<(), DbError> {
        let o = order.clone();

        let rows_affected = self
            .conn
            .call(move |conn| {
                let count = conn.execute(
                    r#"
                    UPDATE remote_orders
                    SET status = ?1, customer_name = ?2, customer_email = ?3,
                        total_amount = ?4, line_items = ?5, remote_modified_at = ?6,
                        sync_status = ?7, sync_error = ?8, sync_attempts = ?9,
                        last_synced_at = ?10, raw_payload = ?11, updated_at = ?12
                    WHERE account_type = ?13 AND remote_order_id = ?14
                    "#,
                    rusqlite::params![
                        o.status.to_string(),
                        o.customer_name,
                        o.customer_email,
                        o.total_amount,
                        o.line_items.as_ref().map(|v| v.to_string()),
                        o.remote_modified_at.map(|dt| dt.to_rfc3339()),
                        o.sync_status.to_string(),
                        o.sync_error,
                        o.sync_attempts,
                        o.last_synced_at.map(|dt| dt.to_rfc3339()),
                        o.raw_payload.to_string(),
                        o.updated_at.map(|dt| dt.to_rfc3339()),
                        o.account.to_string(),
                        o.remote_order_id,
                    ],
                )?;
                Ok(count)
            })
            .await
            .map_err(map_db_err)?;

        if rows_affected == 0 {
            return Err(DbError::NotFound);
        }

        Ok(())
    }

    async fn touch_order_sync(
        &self,
        account: AccountType,
        remote_order_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let account = account.to_string();
        let remote_order_id = remote_order_id.to_string();
        let at = at.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE remote_orders SET last_synced_at = ?1 WHERE account_type = ?2 AND remote_order_id = ?3",
                    rusqlite::params![at, account, remote_order_id],
                )?;
                Ok(())
            })
            .await
            .map_err(map_db_err)
    }

    async fn count_orders(&self, account: AccountType) -> Result<u64, DbError> {
        let account = account.to_string();

        self.conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM remote_orders WHERE account_type = ?1",
                    [&account],
                    |row| row.get(0),
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(map_db_err)
    }

    // =========================================================================
    // Sync log operations
    // =========================================================================

    async fn insert_sync_log(&self, log: &SyncLog) -> Result<i64, DbError> {
        let l = log.clone();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO sync_logs
                    (sync_type, account_scope, status, total_items, processed_items,
                     created_items, updated_items, unchanged_items, conflicted_items,
                     failed_items, errors, rate_limit_hits, api_requests_made,
                     started_at, completed_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                    "#,
                    rusqlite::params![
                        l.sync_type.to_string(),
                        l.account_scope.to_string(),
                        l.status.to_string(),
                        l.total_items as i64,
                        l.processed_items as i64,
                        l.created_items as i64,
                        l.updated_items as i64,
                        l.unchanged_items as i64,
                        l.conflicted_items as i64,
                        l.failed_items as i64,
                        serde_json::to_string(&l.errors).unwrap_or_else(|_| "[]".to_string()),
                        l.rate_limit_hits as i64,
                        l.api_requests_made as i64,
                        l.started_at.to_rfc3339(),
                        l.completed_at.map(|dt| dt.to_rfc3339()),
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(map_db_err)
    }

    async fn update_sync_log(&self, log: &SyncLog) -> Result<(), DbError> {
        let id = log.id.ok_or(DbError::NotFound)?;
        let l = log.clone();

        let rows_affected = self
            .conn
            .call(move |conn| {
                let count = conn.execute(
                    r#"
                    UPDATE sync_logs
                    SET total_items = ?1, processed_items = ?2, created_items = ?3,
                        updated_items = ?4, unchanged_items = ?5, conflicted_items = ?6,
                        failed_items = ?7, errors = ?8, rate_limit_hits = ?9,
                        api_requests_made = ?10
                    WHERE id = ?11 AND status = 'running'
                    "#,
                    rusqlite::params![
                        l.total_items as i64,
                        l.processed_items as i64,
                        l.created_items as i64,
                        l.updated_items as i64,
                        l.unchanged_items as i64,
                        l.conflicted_items as i64,
                        l.failed_items as i64,
                        serde_json::to_string(&l.errors).unwrap_or_else(|_| "[]".to_string()),
                        l.rate_limit_hits as i64,
                        l.api_requests_made as i64,
                        id,
                    ],
                )?;
                Ok(count)
            })
            .await
            .map_err(map_db_err)?;

        if rows_affected == 0 {
            return Err(self.classify_missing_log(id).await);
        }

        Ok(())
    }

    async fn finalize_sync_log(&self, log: &SyncLog) -> Result<(), DbError> {
        let id = log.id.ok_or(DbError::NotFound)?;
        let l = log.clone();

        let rows_affected = self
            .conn
            .call(move |conn| {
                let count = conn.execute(
                    r#"
                    UPDATE sync_logs
                    SET status = ?1, total_items = ?2, processed_items = ?3,
                        created_items = ?4, updated_items = ?5, unchanged_items = ?6,
                        conflicted_items = ?7, failed_items = ?8, errors = ?9,
                        rate_limit_hits = ?10, api_requests_made = ?11, completed_at = ?12
                    WHERE id = ?13 AND status = 'running'
                    "#,
                    rusqlite::params![
                        l.status.to_string(),
                        l.total_items as i64,
                        l.processed_items as i64,
                        l.created_items as i64,
                        l.updated_items as i64,
                        l.unchanged_items as i64,
                        l.conflicted_items as i64,
                        l.failed_items as i64,
                        serde_json::to_string(&l.errors).unwrap_or_else(|_| "[]".to_string()),
                        l.rate_limit_hits as i64,
                        l.api_requests_made as i64,
                        l.completed_at.map(|dt| dt.to_rfc3339()),
                        id,
                    ],
                )?;
                Ok(count)
            })
            .await
            .map_err(map_db_err)?;

        if rows_affected == 0 {
            return Err(self.classify_missing_log(id).await);
        }

        Ok(())
    }

    async fn get_sync_log(&self, id: i64) -> Result<Option<SyncLog>, DbError> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, sync_type, account_scope, status, total_items,
                           processed_items, created_items, updated_items, unchanged_items,
                           conflicted_items, failed_items, errors, rate_limit_hits,
                           api_requests_made, started_at, completed_at
                    FROM sync_logs
                    WHERE id = ?1
                    "#,
                )?;

                let result = stmt.query_row([id], sync_log_from_row).optional()?;

                Ok(result)
            })
            .await
            .map_err(map_db_err)
    }

    // =========================================================================
    // Sync progress operations
    // =========================================================================

    async fn upsert_sync_progress(&self, progress: &SyncProgress) -> Result<(), DbError> {
        let p = progress.clone();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT OR REPLACE INTO sync_progress
                    (sync_log_id, current_page, total_pages, current_item, total_items,
                     percentage_complete, items_per_second, estimated_completion,
                     is_active, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                    "#,
                    rusqlite::params![
                        p.sync_log_id,
                        p.current_page,
                        p.total_pages,
                        p.current_item as i64,
                        p.total_items.map(|v| v as i64),
                        p.percentage_complete,
                        p.items_per_second,
                        p.estimated_completion.map(|dt| dt.to_rfc3339()),
                        p.is_active as i64,
                        p.updated_at.to_rfc3339(),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(map_db_err)
    }

    async fn get_sync_progress(&self, sync_log_id: i64) -> Result<Option<SyncProgress>, DbError> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT sync_log_id, current_page, total_pages, current_item,
                           total_items, percentage_complete, items_per_second,
                           estimated_completion, is_active, updated_at
                    FROM sync_progress
                    WHERE sync_log_id = ?1
                    "#,
                )?;

                let result = stmt
                    .query_row([sync_log_id], progress_from_row)
                    .optional()?;

                Ok(result)
            })
            .await
            .map_err(map_db_err)
    }

    async fn deactivate_sync_progress(&self, sync_log_id: i64) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE sync_progress SET is_active = 0, updated_at = ?1 WHERE sync_log_id = ?2",
                    rusqlite::params![now, sync_log_id],
                )?;
                Ok(())
            })
            .await
            .map_err(map_db_err)
    }

    // =========================================================================
    // Import conflict operations
    // =========================================================================

    async fn insert_conflict(&self, conflict: &ImportConflict) -> Result<i64, DbError> {
        let c = conflict.clone();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO import_conflicts
                    (sync_log_id, entity_kind, entity_key, conflict_type, remote_payload,
                     local_payload, status, resolution, created_at, resolved_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                    "#,
                    rusqlite::params![
                        c.sync_log_id,
                        c.entity_kind.to_string(),
                        c.entity_key,
                        c.conflict_type,
                        c.remote_payload.to_string(),
                        c.local_payload.to_string(),
                        c.status.to_string(),
                        c.resolution,
                        c.created_at.to_rfc3339(),
                        c.resolved_at.map(|dt| dt.to_rfc3339()),
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(map_db_err)
    }

    async fn list_pending_conflicts(&self, limit: u32) -> Result<Vec<ImportConflict>, DbError> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, sync_log_id, entity_kind, entity_key, conflict_type,
                           remote_payload, local_payload, status, resolution,
                           created_at, resolved_at
                    FROM import_conflicts
                    WHERE status = 'pending'
                    ORDER BY created_at ASC
                    LIMIT ?1
                    "#,
                )?;

                let conflicts = stmt
                    .query_map([limit], conflict_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(conflicts)
            })
            .await
            .map_err(map_db_err)
    }

    async fn resolve_conflict(&self, id: i64, resolution: &str) -> Result<(), DbError> {
        let resolution = resolution.to_string();
        let now = Utc::now().to_rfc3339();

        let rows_affected = self
            .conn
            .call(move |conn| {
                let count = conn.execute(
                    r#"
                    UPDATE import_conflicts
                    SET status = 'resolved', resolution = ?1, resolved_at = ?2
                    WHERE id = ?3 AND status = 'pending'
                    "#,
                    rusqlite::params![resolution, now, id],
                )?;
                Ok(count)
            })
            .await
            .map_err(map_db_err)?;

        if rows_affected == 0 {
            return Err(DbError::NotFound);
        }

        Ok(())
    }

    // =========================================================================
    // Request audit log operations
    // =========================================================================

    async fn insert_request_log(&self, entry: &RequestLogEntry) -> Result<(), DbError> {
        let e = entry.clone();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO api_request_log
                    (method, url, headers, payload, status, duration_ms, is_error, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    "#,
                    rusqlite::params![
                        e.method,
                        e.url,
                        e.headers.to_string(),
                        e.payload.as_ref().map(|v| v.to_string()),
                        e.status,
                        e.duration_ms as i64,
                        e.is_error as i64,
                        e.created_at.to_rfc3339(),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(map_db_err)
    }

    async fn purge_request_logs(&self, older_than: DateTime<Utc>) -> Result<u64, DbError> {
        let cutoff = older_than.to_rfc3339();

        self.conn
            .call(move |conn| {
                let count = conn.execute(
                    "DELETE FROM api_request_log WHERE created_at < ?1",
                    [&cutoff],
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(map_db_err)
    }

    async fn count_request_logs(&self) -> Result<u64, DbError> {
        self.conn
            .call(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM api_request_log", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(map_db_err)
    }

    // =========================================================================
    // Run summary operations
    // =========================================================================

    async fn list_synced_keys(
        &self,
        sync_type: SyncType,
        since: DateTime<Utc>,
    ) -> Result<Vec<String>, DbError> {
        let since = since.to_rfc3339();
        let sql = match sync_type {
            SyncType::Products => {
                "SELECT sku || '@' || account_type FROM remote_products \
                 WHERE last_synced_at >= ?1 ORDER BY sku"
            }
            SyncType::Offers => {
                "SELECT sku || '@' || account_type FROM remote_offers \
                 WHERE last_synced_at >= ?1 ORDER BY sku"
            }
            SyncType::Orders => {
                "SELECT remote_order_id || '@' || account_type FROM remote_orders \
                 WHERE last_synced_at >= ?1 ORDER BY remote_order_id"
            }
        };

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(sql)?;
                let keys = stmt
                    .query_map([&since], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(keys)
            })
            .await
            .map_err(map_db_err)
    }
}

impl SqliteDatabase {
    /// Distinguish "log missing" from "log already terminal" after a
    /// guarded update matched zero rows
    async fn classify_missing_log(&self, id: i64) -> DbError {
        let exists = self
            .conn
            .call(move |conn| {
                let found: Option<i64> = conn
                    .query_row("SELECT id FROM sync_logs WHERE id = ?1", [id], |row| {
                        row.get(0)
                    })
                    .optional()?;
                Ok(found.is_some())
            })
            .await
            .unwrap_or(false);

        if exists {
            DbError::AlreadyFinalized(id)
        } else {
            DbError::NotFound
        }
    }
}

/// Map async connection errors to DbError, surfacing constraint violations
fn map_db_err(err: tokio_rusqlite::Error) -> DbError {
    if let tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(code, ref msg)) = err {
        if code.code == rusqlite::ErrorCode::ConstraintViolation {
            return DbError::ConstraintViolation(
                msg.clone().unwrap_or_else(|| "unique constraint".to_string()),
            );
        }
    }
    DbError::Connection(err)
}

fn product_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RemoteProduct> {
    Ok(RemoteProduct {
        id: Some(row.get(0)?),
        account: parse_account(row.get::<_, String>(1)?),
        sku: row.get(2)?,
        name: row.get(3)?,
        price: row.get(4)?,
        sale_price: row.get(5)?,
        currency: row.get(6)?,
        stock: row.get(7)?,
        reserved_stock: row.get(8)?,
        is_active: row.get::<_, i64>(9)? != 0,
        remote_modified_at: parse_datetime(row.get::<_, Option<String>>(10)?),
        sync_status: row
            .get::<_, String>(11)?
            .parse()
            .unwrap_or_default(),
        sync_error: row.get(12)?,
        sync_attempts: row.get(13)?,
        last_synced_at: parse_datetime(row.get::<_, Option<String>>(14)?),
        raw_payload: parse_json(row.get::<_, String>(15)?),
        created_at: parse_datetime(row.get::<_, Option<String>>(16)?),
        updated_at: parse_datetime(row.get::<_, Option<String>>(17)?),
    })
}

fn offer_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RemoteOffer> {
    Ok(RemoteOffer {
        id: Some(row.get(0)?),
        account: parse_account(row.get::<_, String>(1)?),
        sku: row.get(2)?,
        price: row.get(3)?,
        sale_price: row.get(4)?,
        stock: row.get(5)?,
        is_active: row.get::<_, i64>(6)? != 0,
        remote_modified_at: parse_datetime(row.get::<_, Option<String>>(7)?),
        sync_status: row.get::<_, String>(8)?.parse().unwrap_or_default(),
        sync_error: row.get(9)?,
        sync_attempts: row.get(10)?,
        last_synced_at: parse_datetime(row.get::<_, Option<String>>(11)?),
        raw_payload: parse_json(row.get::<_, String>(12)?),
        created_at: parse_datetime(row.get::<_, Option<String>>(13)?),
        updated_at: parse_datetime(row.get::<_, Option<String>>(14)?),
    })
}

fn order_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RemoteOrder> {
    Ok(RemoteOrder {
        id: Some(row.get(0)?),
        account: parse_account(row.get::<_, String>(1)?),
        remote_order_id: row.get(2)?,
        status: row
            .get::<_, String>(3)?
            .parse()
            .unwrap_or(crate::models::OrderStatus::New),
        customer_name: row.get(4)?,
        customer_email: row.get(5)?,
        total_amount: row.get(6)?,
        line_items: row
            .get::<_, Option<String>>(7)?
            .map(parse_json),
        remote_modified_at: parse_datetime(row.get::<_, Option<String>>(8)?),
        sync_status: row.get::<_, String>(9)?.parse().unwrap_or_default(),
        sync_error: row.get(10)?,
        sync_attempts: row.get(11)?,
        last_synced_at: parse_datetime(row.get::<_, Option<String>>(12)?),
        raw_payload: parse_json(row.get::<_, String>(13)?),
        created_at: parse_datetime(row.get::<_, Option<String>>(14)?),
        updated_at: parse_datetime(row.get::<_, Option<String>>(15)?),
    })
}

fn sync_log_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncLog> {
    Ok(SyncLog {
        id: Some(row.get(0)?),
        sync_type: row
            .get::<_, String>(1)?
            .parse()
            .unwrap_or(SyncType::Products),
        account_scope: row
            .get::<_, String>(2)?
            .parse()
            .unwrap_or(crate::models::AccountScope::Both),
        status: row
            .get::<_, String>(3)?
            .parse()
            .unwrap_or(crate::models::SyncRunStatus::Running),
        total_items: row.get::<_, i64>(4)? as u64,
        processed_items: row.get::<_, i64>(5)? as u64,
        created_items: row.get::<_, i64>(6)? as u64,
        updated_items: row.get::<_, i64>(7)? as u64,
        unchanged_items: row.get::<_, i64>(8)? as u64,
        conflicted_items: row.get::<_, i64>(9)? as u64,
        failed_items: row.get::<_, i64>(10)? as u64,
        errors: serde_json::from_str(&row.get::<_, String>(11)?).unwrap_or_default(),
        rate_limit_hits: row.get::<_, i64>(12)? as u64,
        api_requests_made: row.get::<_, i64>(13)? as u64,
        started_at: parse_datetime(Some(row.get::<_, String>(14)?)).unwrap_or_else(Utc::now),
        completed_at: parse_datetime(row.get::<_, Option<String>>(15)?),
    })
}

fn progress_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncProgress> {
    Ok(SyncProgress {
        sync_log_id: row.get(0)?,
        current_page: row.get(1)?,
        total_pages: row.get(2)?,
        current_item: row.get::<_, i64>(3)? as u64,
        total_items: row.get::<_, Option<i64>>(4)?.map(|v| v as u64),
        percentage_complete: row.get(5)?,
        items_per_second: row.get(6)?,
        estimated_completion: parse_datetime(row.get::<_, Option<String>>(7)?),
        is_active: row.get::<_, i64>(8)? != 0,
        updated_at: parse_datetime(Some(row.get::<_, String>(9)?)).unwrap_or_else(Utc::now),
    })
}

fn conflict_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ImportConflict> {
    Ok(ImportConflict {
        id: Some(row.get(0)?),
        sync_log_id: row.get(1)?,
        entity_kind: row
            .get::<_, String>(2)?
            .parse()
            .unwrap_or(crate::models::EntityKind::Product),
        entity_key: row.get(3)?,
        conflict_type: row.get(4)?,
        remote_payload: parse_json(row.get::<_, String>(5)?),
        local_payload: parse_json(row.get::<_, String>(6)?),
        status: row
            .get::<_, String>(7)?
            .parse()
            .unwrap_or(ConflictStatus::Pending),
        resolution: row.get(8)?,
        created_at: parse_datetime(Some(row.get::<_, String>(9)?)).unwrap_or_else(Utc::now),
        resolved_at: parse_datetime(row.get::<_, Option<String>>(10)?),
    })
}

/// Parse a stored account tag, defaulting to MAIN for unknown values
fn parse_account(s: String) -> AccountType {
    s.parse().unwrap_or(AccountType::Main)
}

/// Parse a datetime string to DateTime<Utc>
fn parse_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| {
                // Try parsing SQLite's datetime format
                chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                    .ok()
                    .map(|dt| dt.and_utc())
            })
    })
}

/// Parse a stored JSON column, falling back to Null on corruption
fn parse_json(s: String) -> serde_json::Value {
    serde_json::from_str(&s).unwrap_or(serde_json::Value::Null)
}
