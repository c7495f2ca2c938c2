//! Order mirror models
//!
//! Orders are keyed by `(remote_order_id, account)`. Their status moves
//! through a forward-only lifecycle on the remote side; a remote payload
//! that would move a locally-updated order backwards is a conflict, not
//! an update (see `sync::conflict`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{AccountType, SyncStatus};

/// Order lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Freshly placed
    New,
    /// Acknowledged by the seller
    InProgress,
    /// Picked and packed
    Prepared,
    /// Handed to the carrier
    Shipped,
    /// Delivered and settled
    Finalized,
    /// Returned by the customer
    Returned,
    /// Cancelled
    Canceled,
}

impl OrderStatus {
    /// Position in the forward-only lifecycle
    ///
    /// `Returned` and `Canceled` sit outside the progression and never
    /// count as regressions in either direction.
    fn rank(&self) -> Option<u8> {
        match self {
            OrderStatus::New => Some(1),
            OrderStatus::InProgress => Some(2),
            OrderStatus::Prepared => Some(3),
            OrderStatus::Shipped => Some(4),
            OrderStatus::Finalized => Some(5),
            OrderStatus::Returned | OrderStatus::Canceled => None,
        }
    }

    /// Whether moving from `self` to `incoming` walks the lifecycle backwards
    pub fn is_regression_to(&self, incoming: OrderStatus) -> bool {
        match (self.rank(), incoming.rank()) {
            (Some(current), Some(next)) => next < current,
            _ => false,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::New => write!(f, "new"),
            OrderStatus::InProgress => write!(f, "in_progress"),
            OrderStatus::Prepared => write!(f, "prepared"),
            OrderStatus::Shipped => write!(f, "shipped"),
            OrderStatus::Finalized => write!(f, "finalized"),
            OrderStatus::Returned => write!(f, "returned"),
            OrderStatus::Canceled => write!(f, "canceled"),
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "new" => Ok(OrderStatus::New),
            "in_progress" => Ok(OrderStatus::InProgress),
            "prepared" => Ok(OrderStatus::Prepared),
            "shipped" => Ok(OrderStatus::Shipped),
            "finalized" => Ok(OrderStatus::Finalized),
            "returned" => Ok(OrderStatus::Returned),
            "canceled" => Ok(OrderStatus::Canceled),
            _ => Err(format!("Invalid order status: {}", s)),
        }
    }
}

/// Typed remote order record from a listing page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Remote order identifier, the natural key together with the account
    pub order_id: String,

    /// Order lifecycle status
    pub status: OrderStatus,

    /// Customer display name
    pub customer_name: String,

    /// Customer email, when the remote shares it
    #[serde(default)]
    pub customer_email: Option<String>,

    /// Order total
    pub total_amount: f64,

    /// Line items, kept as JSON
    #[serde(default)]
    pub line_items: Option<Value>,

    /// Remote-reported last modification time
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
}

impl OrderRecord {
    /// Decode and validate one listing item
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let record: OrderRecord = serde_json::from_value(value.clone())
            .map_err(|e| format!("malformed order record: {}", e))?;
        record.validate()?;
        Ok(record)
    }

    fn validate(&self) -> Result<(), String> {
        if self.order_id.trim().is_empty() {
            return Err("order_id must not be empty".to_string());
        }
        if self.customer_name.trim().is_empty() {
            return Err("customer_name must not be empty".to_string());
        }
        if !self.total_amount.is_finite() || self.total_amount < 0.0 {
            return Err(format!(
                "total_amount must be non-negative, got {}",
                self.total_amount
            ));
        }
        Ok(())
    }
}

/// Local mirror of a remote order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteOrder {
    /// Database ID (set after insertion)
    pub id: Option<i64>,

    /// Owning seller account
    pub account: AccountType,

    /// Remote order identifier
    pub remote_order_id: String,

    /// Order lifecycle status
    pub status: OrderStatus,

    /// Customer display name
    pub customer_name: String,

    /// Customer email
    pub customer_email: Option<String>,

    /// Order total
    pub total_amount: f64,

    /// Line items as JSON
    pub line_items: Option<Value>,

    /// Remote-reported last modification time
    pub remote_modified_at: Option<DateTime<Utc>>,

    /// Record-level sync state
    pub sync_status: SyncStatus,

    /// Last sync error, cleared on a successful update
    pub sync_error: Option<String>,

    /// Number of sync attempts against this row
    pub sync_attempts: u32,

    /// Last time a sync touched this row
    pub last_synced_at: Option<DateTime<Utc>>,

    /// Verbatim remote JSON
    pub raw_payload: Value,

    /// When the row was created
    pub created_at: Option<DateTime<Utc>>,

    /// When a business field last changed (locally or via sync)
    pub updated_at: Option<DateTime<Utc>>,
}

impl RemoteOrder {
    /// Build a fresh mirror row from a validated record
    pub fn from_record(
        account: AccountType,
        record: &OrderRecord,
        raw_payload: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            account,
            remote_order_id: record.order_id.clone(),
            status: record.status,
            customer_name: record.customer_name.clone(),
            customer_email: record.customer_email.clone(),
            total_amount: record.total_amount,
            line_items: record.line_items.clone(),
            remote_modified_at: record.modified_at,
            sync_status: SyncStatus::Synced,
            sync_error: None,
            sync_attempts: 1,
            last_synced_at: Some(now),
            raw_payload,
            created_at: None,
            updated_at: Some(now),
        }
    }

    /// Whether any mutable business field differs from the incoming record
    pub fn differs_from(&self, record: &OrderRecord) -> bool {
        self.status != record.status
            || self.customer_name != record.customer_name
            || self.customer_email != record.customer_email
            || self.total_amount != record.total_amount
            || self.line_items != record.line_items
    }

    /// Apply the incoming record's business fields to this row
    pub fn apply_record(&mut self, record: &OrderRecord, raw_payload: Value, now: DateTime<Utc>) {
        self.status = record.status;
        self.customer_name = record.customer_name.clone();
        self.customer_email = record.customer_email.clone();
        self.total_amount = record.total_amount;
        self.line_items = record.line_items.clone();
        self.remote_modified_at = record.modified_at;
        self.sync_status = SyncStatus::Synced;
        self.sync_error = None;
        self.sync_attempts += 1;
        self.last_synced_at = Some(now);
        self.raw_payload = raw_payload;
        self.updated_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_value() -> Value {
        json!({
            "order_id": "ORD-9001",
            "status": "new",
            "customer_name": "Ana Pop",
            "total_amount": 120.5,
            "line_items": [{"sku": "SKU-1", "qty": 2}]
        })
    }

    // Test 1: Valid order decodes with typed status
    #[test]
    fn test_order_record_from_value() {
        let record = OrderRecord::from_value(&sample_value()).unwrap();

        assert_eq!(record.order_id, "ORD-9001");
        assert_eq!(record.status, OrderStatus::New);
        assert_eq!(record.total_amount, 120.5);
        assert!(record.line_items.is_some());
    }

    // Test 2: Unknown status string is a decode failure
    #[test]
    fn test_order_record_unknown_status() {
        let mut value = sample_value();
        value["status"] = json!("teleported");
        let err = OrderRecord::from_value(&value).unwrap_err();
        assert!(err.contains("malformed order record"));
    }

    // Test 3: Validation rejects blank identifiers and negative totals
    #[test]
    fn test_order_record_validation() {
        let mut value = sample_value();
        value["order_id"] = json!("");
        assert!(OrderRecord::from_value(&value)
            .unwrap_err()
            .contains("order_id"));

        let mut value = sample_value();
        value["total_amount"] = json!(-1.0);
        assert!(OrderRecord::from_value(&value)
            .unwrap_err()
            .contains("total_amount"));
    }

    // Test 4: Status regression detection
    #[test]
    fn test_status_regression() {
        assert!(OrderStatus::Shipped.is_regression_to(OrderStatus::New));
        assert!(OrderStatus::Finalized.is_regression_to(OrderStatus::Prepared));

        assert!(!OrderStatus::New.is_regression_to(OrderStatus::Shipped));
        assert!(!OrderStatus::New.is_regression_to(OrderStatus::New));

        // Cancellation and returns are not regressions in either direction
        assert!(!OrderStatus::Shipped.is_regression_to(OrderStatus::Canceled));
        assert!(!OrderStatus::Returned.is_regression_to(OrderStatus::New));
    }

    // Test 5: Status display/parse roundtrip
    #[test]
    fn test_status_roundtrip() {
        for status in [
            OrderStatus::New,
            OrderStatus::InProgress,
            OrderStatus::Prepared,
            OrderStatus::Shipped,
            OrderStatus::Finalized,
            OrderStatus::Returned,
            OrderStatus::Canceled,
        ] {
            assert_eq!(status.to_string().parse::<OrderStatus>().unwrap(), status);
        }
    }

    // Test 6: Diff and apply cycle
    #[test]
    fn test_order_diff_and_apply() {
        let raw = sample_value();
        let record = OrderRecord::from_value(&raw).unwrap();
        let mut order = RemoteOrder::from_record(AccountType::Main, &record, raw.clone(), Utc::now());

        assert!(!order.differs_from(&record));

        let mut changed = record.clone();
        changed.status = OrderStatus::InProgress;
        assert!(order.differs_from(&changed));

        order.apply_record(&changed, raw, Utc::now());
        assert_eq!(order.status, OrderStatus::InProgress);
        assert_eq!(order.sync_attempts, 2);
    }
}
