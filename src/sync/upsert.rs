//! Idempotent upsert engine
//!
//! Maps one page of remote records into local mirror rows keyed by their
//! natural key. Each record is decoded, validated, conflict-checked, and
//! then inserted or updated; a bad record is isolated and reported, it
//! never aborts the batch. Replaying an identical batch yields zero
//! creations and zero updates.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use super::conflict::ConflictRecorder;
use super::CancelToken;
use crate::database::Database;
use crate::error::DbError;
use crate::models::{
    AccountType, EntityKind, OfferRecord, OrderRecord, ProductRecord, RemoteOffer, RemoteOrder,
    RemoteProduct, SyncType,
};

/// One isolated record failure within a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    /// Natural-key hint of the failing record, "<unknown>" when even
    /// that could not be read
    pub record_id: String,

    /// Why the record was rejected
    pub reason: String,
}

/// Outcome of processing one batch of records
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Rows inserted
    pub created: u64,

    /// Rows updated because a business field changed
    pub updated: u64,

    /// Rows left untouched apart from `last_synced_at`
    pub unchanged: u64,

    /// Records skipped because a conflict was recorded
    pub conflicted: u64,

    /// Isolated record failures
    pub failed: Vec<RecordFailure>,

    /// Natural keys seen in this batch that have a local row afterwards
    pub seen_keys: Vec<String>,
}

impl BatchOutcome {
    /// Records handed to the engine that reached a verdict
    pub fn processed(&self) -> u64 {
        self.created + self.updated + self.unchanged + self.conflicted + self.failed.len() as u64
    }

    /// Fold another batch outcome into this one
    pub fn merge(&mut self, other: BatchOutcome) {
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.conflicted += other.conflicted;
        self.failed.extend(other.failed);
        self.seen_keys.extend(other.seen_keys);
    }
}

/// Verdict for one record
enum UpsertKind {
    Created,
    Updated,
    Unchanged,
    Conflicted,
}

/// Idempotent insert-or-update engine with per-record failure isolation
pub struct UpsertEngine {
    db: Arc<dyn Database>,
    conflicts: ConflictRecorder,
}

impl UpsertEngine {
    /// Create an engine persisting through the given database
    pub fn new(db: Arc<dyn Database>) -> Self {
        let conflicts = ConflictRecorder::new(Arc::clone(&db));
        Self { db, conflicts }
    }

    /// Process one page of records for the given sync type
    pub async fn process_batch(
        &self,
        sync_type: SyncType,
        account: AccountType,
        sync_log_id: i64,
        items: &[Value],
        cancel: &CancelToken,
    ) -> BatchOutcome {
        match sync_type {
            SyncType::Products => {
                self.process_products(account, sync_log_id, items, cancel).await
            }
            SyncType::Offers => self.process_offers(account, sync_log_id, items, cancel).await,
            SyncType::Orders => self.process_orders(account, sync_log_id, items, cancel).await,
        }
    }

    /// Process one page of product records
    pub async fn process_products(
        &self,
        account: AccountType,
        sync_log_id: i64,
        items: &[Value],
        cancel: &CancelToken,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for item in items {
            if cancel.is_cancelled() {
                break;
            }
            match self.upsert_product(account, sync_log_id, item).await {
                Ok((kind, sku)) => {
                    outcome.seen_keys.push(sku);
                    count(&mut outcome, kind);
                }
                Err(failure) => {
                    warn!(
                        account = %account,
                        record_id = %failure.record_id,
                        reason = %failure.reason,
                        "Product record isolated"
                    );
                    outcome.failed.push(failure);
                }
            }
        }

        outcome
    }

    /// Process one page of offer records
    pub async fn process_offers(
        &self,
        account: AccountType,
        sync_log_id: i64,
        items: &[Value],
        cancel: &CancelToken,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for item in items {
            if cancel.is_cancelled() {
                break;
            }
            match self.upsert_offer(account, sync_log_id, item).await {
                Ok((kind, sku)) => {
                    outcome.seen_keys.push(sku);
                    count(&mut outcome, kind);
                }
                Err(failure) => {
                    warn!(
                        account = %account,
                        record_id = %failure.record_id,
                        reason = %failure.reason,
                        "Offer record isolated"
                    );
                    outcome.failed.push(failure);
                }
            }
        }

        outcome
    }

    /// Process one page of order records
    pub async fn process_orders(
        &self,
        account: AccountType,
        sync_log_id: i64,
        items: &[Value],
        cancel: &CancelToken,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for item in items {
            if cancel.is_cancelled() {
                break;
            }
            match self.upsert_order(account, sync_log_id, item).await {
                Ok((kind, order_id)) => {
                    outcome.seen_keys.push(order_id);
                    count(&mut outcome, kind);
                }
                Err(failure) => {
                    warn!(
                        account = %account,
                        record_id = %failure.record_id,
                        reason = %failure.reason,
                        "Order record isolated"
                    );
                    outcome.failed.push(failure);
                }
            }
        }

        outcome
    }

    /// Flip unseen rows to inactive after a complete, uncapped sync
    ///
    /// Remote removals are never deleted locally. Orders have no removal
    /// semantics and are left alone.
    pub async fn mark_missing_inactive(
        &self,
        sync_type: SyncType,
        account: AccountType,
        seen_keys: &[String],
    ) -> Result<u64, DbError> {
        let deactivated = match sync_type {
            SyncType::Products => {
                self.db
                    .mark_products_inactive_except(account, seen_keys)
                    .await?
            }
            SyncType::Offers => {
                self.db
                    .mark_offers_inactive_except(account, seen_keys)
                    .await?
            }
            SyncType::Orders => 0,
        };

        if deactivated > 0 {
            debug!(
                account = %account,
                sync_type = %sync_type,
                deactivated = deactivated,
                "Marked rows missing from remote as inactive"
            );
        }

        Ok(deactivated)
    }

    async fn upsert_product(
        &self,
        account: AccountType,
        sync_log_id: i64,
        item: &Value,
    ) -> Result<(UpsertKind, String), RecordFailure> {
        let record = ProductRecord::from_value(item)
            .map_err(|reason| failure_for(item, "sku", reason))?;
        let sku = record.sku.clone();

        if record.reserved_stock > record.stock {
            // The clamp itself happens in available_stock(); the anomaly
            // still deserves a trace
            warn!(
                account = %account,
                sku = %sku,
                stock = record.stock,
                reserved = record.reserved_stock,
                "Reserved stock exceeds total stock, available clamped to zero"
            );
        }

        let existing = self
            .db
            .get_product(account, &sku)
            .await
            .map_err(|e| db_failure(&sku, e))?;
        let now = Utc::now();

        match existing {
            None => {
                let product = RemoteProduct::from_record(account, &record, item.clone(), now);
                self.db
                    .insert_product(&product)
                    .await
                    .map_err(|e| db_failure(&sku, e))?;
                Ok((UpsertKind::Created, sku))
            }
            Some(mut existing) => {
                if let Some(conflict_type) =
                    ConflictRecorder::product_conflict(&existing, &record)
                {
                    self.conflicts
                        .record(
                            sync_log_id,
                            EntityKind::Product,
                            &format!("{}@{}", sku, account),
                            conflict_type,
                            item.clone(),
                            snapshot(&existing),
                        )
                        .await
                        .map_err(|e| db_failure(&sku, e))?;
                    Ok((UpsertKind::Conflicted, sku))
                } else if existing.differs_from(&record) {
                    existing.apply_record(&record, item.clone(), now);
                    self.db
                        .update_product(&existing)
                        .await
                        .map_err(|e| db_failure(&sku, e))?;
                    Ok((UpsertKind::Updated, sku))
                } else {
                    self.db
                        .touch_product_sync(account, &sku, now)
                        .await
                        .map_err(|e| db_failure(&sku, e))?;
                    Ok((UpsertKind::Unchanged, sku))
                }
            }
        }
    }

    async fn upsert_offer(
        &self,
        account: AccountType,
        sync_log_id: i64,
        item: &Value,
    ) -> Result<(UpsertKind, String), RecordFailure> {
        let record =
            OfferRecord::from_value(item).map_err(|reason| failure_for(item, "sku", reason))?;
        let sku = record.sku.clone();

        let existing = self
            .db
            .get_offer(account, &sku)
            .await
            .map_err(|e| db_failure(&sku, e))?;
        let now = Utc::now();

        match existing {
            None => {
                let offer = RemoteOffer::from_record(account, &record, item.clone(), now);
                self.db
                    .insert_offer(&offer)
                    .await
                    .map_err(|e| db_failure(&sku, e))?;
                Ok((UpsertKind::Created, sku))
            }
            Some(mut existing) => {
                if let Some(conflict_type) = ConflictRecorder::offer_conflict(&existing, &record) {
                    self.conflicts
                        .record(
                            sync_log_id,
                            EntityKind::Offer,
                            &format!("{}@{}", sku, account),
                            conflict_type,
                            item.clone(),
                            snapshot(&existing),
                        )
                        .await
                        .map_err(|e| db_failure(&sku, e))?;
                    Ok((UpsertKind::Conflicted, sku))
                } else if existing.differs_from(&record) {
                    existing.apply_record(&record, item.clone(), now);
                    self.db
                        .update_offer(&existing)
                        .await
                        .map_err(|e| db_failure(&sku, e))?;
                    Ok((UpsertKind::Updated, sku))
                } else {
                    self.db
                        .touch_offer_sync(account, &sku, now)
                        .await
                        .map_err(|e| db_failure(&sku, e))?;
                    Ok((UpsertKind::Unchanged, sku))
                }
            }
        }
    }

    async fn upsert_order(
        &self,
        account: AccountType,
        sync_log_id: i64,
        item: &Value,
    ) -> Result<(UpsertKind, String), RecordFailure> {
        let record = OrderRecord::from_value(item)
            .map_err(|reason| failure_for(item, "order_id", reason))?;
        let order_id = record.order_id.clone();

        let existing = self
            .db
            .get_order(account, &order_id)
            .await
            .map_err(|e| db_failure(&order_id, e))?;
        let now = Utc::now();

        match existing {
            None => {
                let order = RemoteOrder::from_record(account, &record, item.clone(), now);
                self.db
                    .insert_order(&order)
                    .await
                    .map_err(|e| db_failure(&order_id, e))?;
                Ok((UpsertKind::Created, order_id))
            }
            Some(mut existing) => {
                if let Some(conflict_type) = ConflictRecorder::order_conflict(&existing, &record) {
                    self.conflicts
                        .record(
                            sync_log_id,
                            EntityKind::Order,
                            &format!("{}@{}", order_id, account),
                            conflict_type,
                            item.clone(),
                            snapshot(&existing),
                        )
                        .await
                        .map_err(|e| db_failure(&order_id, e))?;
                    Ok((UpsertKind::Conflicted, order_id))
                } else if existing.differs_from(&record) {
                    existing.apply_record(&record, item.clone(), now);
                    self.db
                        .update_order(&existing)
                        .await
                        .map_err(|e| db_failure(&order_id, e))?;
                    Ok((UpsertKind::Updated, order_id))
                } else {
                    self.db
                        .touch_order_sync(account, &order_id, now)
                        .await
                        .map_err(|e| db_failure(&order_id, e))?;
                    Ok((UpsertKind::Unchanged, order_id))
                }
            }
        }
    }
}

fn count(outcome: &mut BatchOutcome, kind: UpsertKind) {
    match kind {
        UpsertKind::Created => outcome.created += 1,
        UpsertKind::Updated => outcome.updated += 1,
        UpsertKind::Unchanged => outcome.unchanged += 1,
        UpsertKind::Conflicted => outcome.conflicted += 1,
    }
}

/// Best-effort natural-key hint for a record that failed to decode
fn failure_for(item: &Value, key_field: &str, reason: String) -> RecordFailure {
    let record_id = item
        .get(key_field)
        .and_then(|v| v.as_str())
        .unwrap_or("<unknown>")
        .to_string();
    RecordFailure { record_id, reason }
}

fn db_failure(record_id: &str, err: DbError) -> RecordFailure {
    RecordFailure {
        record_id: record_id.to_string(),
        reason: err.to_string(),
    }
}

/// Local row snapshot for conflict payloads
fn snapshot<T: serde::Serialize>(row: &T) -> Value {
    serde_json::to_value(row).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SqliteDatabase;
    use crate::models::OrderStatus;
    use chrono::Duration;
    use serde_json::json;

    async fn engine() -> (UpsertEngine, Arc<SqliteDatabase>) {
        let db = Arc::new(SqliteDatabase::in_memory().await.unwrap());
        (UpsertEngine::new(Arc::clone(&db) as Arc<dyn Database>), db)
    }

    fn product_item(sku: &str, price: f64) -> Value {
        json!({"sku": sku, "name": "Widget", "price": price, "stock": 5})
    }

    fn order_item(order_id: &str, status: &str) -> Value {
        json!({
            "order_id": order_id,
            "status": status,
            "customer_name": "Ana Pop",
            "total_amount": 50.0
        })
    }

    // Test 1: New records are created
    #[tokio::test]
    async fn test_batch_creates_new_products() {
        let (engine, db) = engine().await;
        let cancel = CancelToken::new();

        let items = vec![product_item("SKU-1", 10.0), product_item("SKU-2", 20.0)];
        let outcome = engine
            .process_products(AccountType::Main, 1, &items, &cancel)
            .await;

        assert_eq!(outcome.created, 2);
        assert_eq!(outcome.updated, 0);
        assert!(outcome.failed.is_empty());
        assert_eq!(db.count_products(AccountType::Main).await.unwrap(), 2);
    }

    // Test 2: Replaying an identical batch is a no-op (idempotence)
    #[tokio::test]
    async fn test_replay_is_idempotent() {
        let (engine, db) = engine().await;
        let cancel = CancelToken::new();

        let items = vec![product_item("SKU-1", 10.0), product_item("SKU-2", 20.0)];
        engine
            .process_products(AccountType::Main, 1, &items, &cancel)
            .await;
        let replay = engine
            .process_products(AccountType::Main, 1, &items, &cancel)
            .await;

        assert_eq!(replay.created, 0);
        assert_eq!(replay.updated, 0);
        assert_eq!(replay.unchanged, 2);
        // Still exactly one row per natural key
        assert_eq!(db.count_products(AccountType::Main).await.unwrap(), 2);
    }

    // Test 3: A changed business field updates in place
    #[tokio::test]
    async fn test_changed_field_updates() {
        let (engine, db) = engine().await;
        let cancel = CancelToken::new();

        engine
            .process_products(AccountType::Main, 1, &[product_item("SKU-1", 10.0)], &cancel)
            .await;
        let outcome = engine
            .process_products(AccountType::Main, 1, &[product_item("SKU-1", 12.5)], &cancel)
            .await;

        assert_eq!(outcome.updated, 1);

        let product = db
            .get_product(AccountType::Main, "SKU-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(product.price, 12.5);
        assert_eq!(product.sync_attempts, 2);
        assert!(product.sync_error.is_none());
    }

    // Test 4: A single bad record never aborts the batch
    #[tokio::test]
    async fn test_partial_failure_isolation() {
        let (engine, db) = engine().await;
        let cancel = CancelToken::new();

        // Records 1..K-1 invalid, record K valid
        let items = vec![
            json!({"name": "no sku", "price": 1.0}),
            json!({"sku": "SKU-BAD", "name": "negative", "price": -5.0}),
            json!({"sku": "", "name": "blank sku", "price": 1.0}),
            product_item("SKU-OK", 10.0),
        ];

        let outcome = engine
            .process_products(AccountType::Main, 1, &items, &cancel)
            .await;

        assert_eq!(outcome.failed.len(), 3);
        assert_eq!(outcome.created, 1);
        assert_eq!(db.count_products(AccountType::Main).await.unwrap(), 1);

        // Failure entries carry a key hint and a reason
        assert_eq!(outcome.failed[0].record_id, "<unknown>");
        assert_eq!(outcome.failed[1].record_id, "SKU-BAD");
        assert!(outcome.failed[1].reason.contains("price"));
    }

    // Test 5: Reserved stock above total is clamped, not rejected
    #[tokio::test]
    async fn test_stock_anomaly_clamped() {
        let (engine, db) = engine().await;
        let cancel = CancelToken::new();

        let item = json!({
            "sku": "SKU-1",
            "name": "Widget",
            "price": 10.0,
            "stock": 2,
            "reserved_stock": 7
        });
        let outcome = engine
            .process_products(AccountType::Main, 1, &[item], &cancel)
            .await;

        assert_eq!(outcome.created, 1);

        let product = db
            .get_product(AccountType::Main, "SKU-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(product.available_stock(), 0);
    }

    // Test 6: Order status regression records a conflict, row untouched
    #[tokio::test]
    async fn test_order_conflict_skips_upsert() {
        let (engine, db) = engine().await;
        let cancel = CancelToken::new();

        // Ingest the order, then simulate a human operator shipping it
        engine
            .process_orders(AccountType::Main, 1, &[order_item("ORD-1", "new")], &cancel)
            .await;

        let mut local = db
            .get_order(AccountType::Main, "ORD-1")
            .await
            .unwrap()
            .unwrap();
        local.status = OrderStatus::Shipped;
        local.updated_at = Some(Utc::now());
        db.update_order(&local).await.unwrap();

        // Remote replays the order as new with an older modification time
        let mut stale = order_item("ORD-1", "new");
        stale["modified_at"] = json!((Utc::now() - Duration::hours(3)).to_rfc3339());

        let outcome = engine
            .process_orders(AccountType::Main, 1, &[stale], &cancel)
            .await;

        assert_eq!(outcome.conflicted, 1);
        assert_eq!(outcome.updated, 0);
        assert!(outcome.failed.is_empty());

        // Local row keeps the operator's status
        let kept = db
            .get_order(AccountType::Main, "ORD-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kept.status, OrderStatus::Shipped);

        // A pending conflict row exists
        let conflicts = db.list_pending_conflicts(10).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_type, "status_regression");
        assert_eq!(conflicts[0].entity_key, "ORD-1@main");
    }

    // Test 7: Unchanged records only refresh last_synced_at
    #[tokio::test]
    async fn test_unchanged_touches_sync_time() {
        let (engine, db) = engine().await;
        let cancel = CancelToken::new();

        engine
            .process_products(AccountType::Main, 1, &[product_item("SKU-1", 10.0)], &cancel)
            .await;
        let before = db
            .get_product(AccountType::Main, "SKU-1")
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let outcome = engine
            .process_products(AccountType::Main, 1, &[product_item("SKU-1", 10.0)], &cancel)
            .await;
        assert_eq!(outcome.unchanged, 1);

        let after = db
            .get_product(AccountType::Main, "SKU-1")
            .await
            .unwrap()
            .unwrap();
        assert!(after.last_synced_at.unwrap() > before.last_synced_at.unwrap());
        // Business-field bookkeeping untouched
        assert_eq!(after.sync_attempts, before.sync_attempts);
        assert_eq!(after.updated_at, before.updated_at);
    }

    // Test 8: Cancellation stops mid-batch
    #[tokio::test]
    async fn test_cancel_stops_batch() {
        let (engine, _db) = engine().await;
        let cancel = CancelToken::new();
        cancel.cancel();

        let items = vec![product_item("SKU-1", 10.0), product_item("SKU-2", 20.0)];
        let outcome = engine
            .process_products(AccountType::Main, 1, &items, &cancel)
            .await;

        assert_eq!(outcome.processed(), 0);
    }

    // Test 9: Offers upsert mirrors the product flow
    #[tokio::test]
    async fn test_offer_upsert() {
        let (engine, db) = engine().await;
        let cancel = CancelToken::new();

        let items = vec![json!({"sku": "SKU-1", "price": 20.0, "stock": 4})];
        let outcome = engine
            .process_offers(AccountType::Fbe, 1, &items, &cancel)
            .await;
        assert_eq!(outcome.created, 1);

        let changed = vec![json!({"sku": "SKU-1", "price": 18.0, "stock": 4})];
        let outcome = engine
            .process_offers(AccountType::Fbe, 1, &changed, &cancel)
            .await;
        assert_eq!(outcome.updated, 1);

        let offer = db.get_offer(AccountType::Fbe, "SKU-1").await.unwrap().unwrap();
        assert_eq!(offer.price, 18.0);
    }

    // Test 10: Unseen rows are flipped inactive after a complete sync
    #[tokio::test]
    async fn test_mark_missing_inactive() {
        let (engine, db) = engine().await;
        let cancel = CancelToken::new();

        let items = vec![product_item("SKU-1", 10.0), product_item("SKU-2", 20.0)];
        let outcome = engine
            .process_products(AccountType::Main, 1, &items, &cancel)
            .await;

        // Next run only sees SKU-1
        let seen = vec!["SKU-1".to_string()];
        let deactivated = engine
            .mark_missing_inactive(SyncType::Products, AccountType::Main, &seen)
            .await
            .unwrap();
        assert_eq!(deactivated, 1);

        let gone = db
            .get_product(AccountType::Main, "SKU-2")
            .await
            .unwrap()
            .unwrap();
        assert!(!gone.is_active);

        // Orders have no removal semantics
        let noop = engine
            .mark_missing_inactive(SyncType::Orders, AccountType::Main, &outcome.seen_keys)
            .await
            .unwrap();
        assert_eq!(noop, 0);
    }

    // Test 11: Batch outcome merge accumulates counters
    #[test]
    fn test_batch_outcome_merge() {
        let mut a = BatchOutcome {
            created: 1,
            updated: 2,
            unchanged: 3,
            conflicted: 0,
            failed: vec![RecordFailure {
                record_id: "X".to_string(),
                reason: "bad".to_string(),
            }],
            seen_keys: vec!["X1".to_string()],
        };
        let b = BatchOutcome {
            created: 4,
            updated: 0,
            unchanged: 1,
            conflicted: 2,
            failed: vec![],
            seen_keys: vec!["X2".to_string()],
        };

        a.merge(b);

        assert_eq!(a.created, 5);
        assert_eq!(a.unchanged, 4);
        assert_eq!(a.conflicted, 2);
        assert_eq!(a.failed.len(), 1);
        assert_eq!(a.seen_keys.len(), 2);
        assert_eq!(a.processed(), 12);
    }
}
