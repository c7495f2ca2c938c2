//! Database layer for marketplace-sync
//!
//! This module defines the database trait and SQLite implementation.

pub mod migrations;
pub mod sqlite;

pub use sqlite::SqliteDatabase;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DbError;
use crate::models::{
    AccountType, ImportConflict, RemoteOffer, RemoteOrder, RemoteProduct, RequestLogEntry,
    SyncLog, SyncProgress, SyncType,
};

/// Database trait for data persistence
///
/// This trait defines all database operations needed by the engine.
/// It uses `async_trait` for async methods and `mockall::automock` for
/// testing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Database: Send + Sync {
    // =========================================================================
    // Product mirror operations
    // =========================================================================

    /// Get a product by its natural key
    async fn get_product(
        &self,
        account: AccountType,
        sku: &str,
    ) -> Result<Option<RemoteProduct>, DbError>;

    /// Insert a new product row
    ///
    /// Returns the ID of the inserted row; a duplicate natural key is a
    /// constraint violation
    async fn insert_product(&self, product: &RemoteProduct) -> Result<i64, DbError>;

    /// Update an existing product row, addressed by its natural key
    async fn update_product(&self, product: &RemoteProduct) -> Result<(), DbError>;

    /// Refresh only `last_synced_at` for an unchanged product
    async fn touch_product_sync(
        &self,
        account: AccountType,
        sku: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DbError>;

    /// Mark active products not in `seen_skus` as inactive
    ///
    /// Returns the number of deactivated rows
    async fn mark_products_inactive_except(
        &self,
        account: AccountType,
        seen_skus: &[String],
    ) -> Result<u64, DbError>;

    /// Count product rows for an account
    async fn count_products(&self, account: AccountType) -> Result<u64, DbError>;

    // =========================================================================
    // Offer mirror operations
    // =========================================================================

    /// Get an offer by its natural key
    async fn get_offer(
        &self,
        account: AccountType,
        sku: &str,
    ) -> Result<Option<RemoteOffer>, DbError>;

    /// Insert a new offer row
    async fn insert_offer(&self, offer: &RemoteOffer) -> Result<i64, DbError>;

    /// Update an existing offer row, addressed by its natural key
    async fn update_offer(&self, offer: &RemoteOffer) -> Result<(), DbError>;

    /// Refresh only `last_synced_at` for an unchanged offer
    async fn touch_offer_sync(
        &self,
        account: AccountType,
        sku: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DbError>;

    /// Mark active offers not in `seen_skus` as inactive
    async fn mark_offers_inactive_except(
        &self,
        account: AccountType,
        seen_skus: &[String],
    ) -> Result<u64, DbError>;

    // =========================================================================
    // Order mirror operations
    // =========================================================================

    /// Get an order by its natural key
    async fn get_order(
        &self,
        account: AccountType,
        remote_order_id: &str,
    ) -> Result<Option<RemoteOrder>, DbError>;

    /// Insert a new order row
    async fn insert_order(&self, order: &RemoteOrder) -> Result<i64, DbError>;

    /// Update an existing order row, addressed by its natural key
    async fn update_order(&self, order: &RemoteOrder) -> Result<(), DbError>;

    /// Refresh only `last_synced_at` for an unchanged order
    async fn touch_order_sync(
        &self,
        account: AccountType,
        remote_order_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DbError>;

    /// Count order rows for an account
    async fn count_orders(&self, account: AccountType) -> Result<u64, DbError>;

    // =========================================================================
    // Sync log operations
    // =========================================================================

    /// Insert a new sync log row
    ///
    /// Returns the ID of the inserted row
    async fn insert_sync_log(&self, log: &SyncLog) -> Result<i64, DbError>;

    /// Update counters and errors of a running sync log
    async fn update_sync_log(&self, log: &SyncLog) -> Result<(), DbError>;

    /// Set a terminal status on a sync log
    ///
    /// Fails with `DbError::AlreadyFinalized` when the log already holds
    /// a terminal status; terminal logs are immutable.
    async fn finalize_sync_log(&self, log: &SyncLog) -> Result<(), DbError>;

    /// Get a sync log by ID
    async fn get_sync_log(&self, id: i64) -> Result<Option<SyncLog>, DbError>;

    // =========================================================================
    // Sync progress operations
    // =========================================================================

    /// Insert or update the progress row for a sync log
    async fn upsert_sync_progress(&self, progress: &SyncProgress) -> Result<(), DbError>;

    /// Get the progress row for a sync log
    async fn get_sync_progress(&self, sync_log_id: i64) -> Result<Option<SyncProgress>, DbError>;

    /// Mark the progress row for a sync log inactive
    async fn deactivate_sync_progress(&self, sync_log_id: i64) -> Result<(), DbError>;

    // =========================================================================
    // Import conflict operations
    // =========================================================================

    /// Insert a conflict record
    ///
    /// Returns the ID of the inserted row
    async fn insert_conflict(&self, conflict: &ImportConflict) -> Result<i64, DbError>;

    /// List pending conflicts, oldest first
    async fn list_pending_conflicts(&self, limit: u32) -> Result<Vec<ImportConflict>, DbError>;

    /// Resolve a pending conflict with a resolution note
    async fn resolve_conflict(&self, id: i64, resolution: &str) -> Result<(), DbError>;

    // =========================================================================
    // Request audit log operations
    // =========================================================================

    /// Insert a request audit entry
    async fn insert_request_log(&self, entry: &RequestLogEntry) -> Result<(), DbError>;

    /// Delete audit entries older than the given instant
    ///
    /// Returns the number of purged entries
    async fn purge_request_logs(&self, older_than: DateTime<Utc>) -> Result<u64, DbError>;

    /// Count audit entries
    async fn count_request_logs(&self) -> Result<u64, DbError>;

    // =========================================================================
    // Run summary operations
    // =========================================================================

    /// Natural keys of rows touched by syncs since the given instant
    ///
    /// Keys are formatted `<sku-or-order-id>@<account>`.
    async fn list_synced_keys(
        &self,
        sync_type: SyncType,
        since: DateTime<Utc>,
    ) -> Result<Vec<String>, DbError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProductRecord, SyncRunStatus};
    use serde_json::json;

    // Test 1: MockDatabase product lookup
    #[tokio::test]
    async fn test_mock_database_get_product() {
        let mut mock = MockDatabase::new();

        mock.expect_get_product()
            .withf(|account, sku| *account == AccountType::Main && sku == "SKU-1")
            .returning(|account, _| {
                let raw = json!({"sku": "SKU-1", "name": "Widget", "price": 10.0});
                let record = ProductRecord::from_value(&raw).unwrap();
                Ok(Some(RemoteProduct::from_record(
                    account,
                    &record,
                    raw,
                    Utc::now(),
                )))
            });

        let result = mock.get_product(AccountType::Main, "SKU-1").await;
        assert!(result.is_ok());
        let product = result.unwrap().unwrap();
        assert_eq!(product.sku, "SKU-1");
    }

    // Test 2: MockDatabase returns None for unknown keys
    #[tokio::test]
    async fn test_mock_database_product_not_found() {
        let mut mock = MockDatabase::new();

        mock.expect_get_product().returning(|_, _| Ok(None));

        let result = mock.get_product(AccountType::Fbe, "missing").await;
        assert!(result.unwrap().is_none());
    }

    // Test 3: MockDatabase sync log lifecycle
    #[tokio::test]
    async fn test_mock_database_sync_log() {
        let mut mock = MockDatabase::new();

        mock.expect_insert_sync_log().returning(|_| Ok(5));
        mock.expect_finalize_sync_log().returning(|_| Ok(()));
        mock.expect_get_sync_log().withf(|id| *id == 5).returning(|_| {
            let mut log = SyncLog::new(
                crate::models::SyncType::Products,
                crate::models::AccountScope::Main,
            );
            log.id = Some(5);
            log.status = SyncRunStatus::Completed;
            Ok(Some(log))
        });

        let log = SyncLog::new(
            crate::models::SyncType::Products,
            crate::models::AccountScope::Main,
        );
        let id = mock.insert_sync_log(&log).await.unwrap();
        assert_eq!(id, 5);

        assert!(mock.finalize_sync_log(&log).await.is_ok());

        let fetched = mock.get_sync_log(5).await.unwrap().unwrap();
        assert_eq!(fetched.status, SyncRunStatus::Completed);
    }

    // Test 4: MockDatabase error propagation
    #[tokio::test]
    async fn test_mock_database_error_handling() {
        let mut mock = MockDatabase::new();

        mock.expect_get_order().returning(|_, _| Err(DbError::NotFound));

        let result = mock.get_order(AccountType::Main, "ORD-1").await;
        assert!(matches!(result, Err(DbError::NotFound)));
    }
}
