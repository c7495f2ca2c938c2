//! Offer mirror models
//!
//! An offer is the price/stock attachment for a SKU. Natural key is
//! `(sku, account)`, same as products.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{AccountType, SyncStatus};

/// Typed remote offer record from a listing page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferRecord {
    /// Seller SKU
    pub sku: String,

    /// List price
    pub price: f64,

    /// Discounted price, if any
    #[serde(default)]
    pub sale_price: Option<f64>,

    /// Offered stock
    #[serde(default)]
    pub stock: i64,

    /// Remote status string ("active"/"inactive"); missing means active
    #[serde(default)]
    pub status: Option<String>,

    /// Remote-reported last modification time
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
}

impl OfferRecord {
    /// Decode and validate one listing item
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let record: OfferRecord = serde_json::from_value(value.clone())
            .map_err(|e| format!("malformed offer record: {}", e))?;
        record.validate()?;
        Ok(record)
    }

    fn validate(&self) -> Result<(), String> {
        if self.sku.trim().is_empty() {
            return Err("sku must not be empty".to_string());
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(format!("price must be non-negative, got {}", self.price));
        }
        if self.stock < 0 {
            return Err(format!("stock must be non-negative, got {}", self.stock));
        }
        Ok(())
    }

    /// Whether the remote considers this offer active
    pub fn is_active(&self) -> bool {
        match self.status.as_deref() {
            Some(s) => !s.eq_ignore_ascii_case("inactive"),
            None => true,
        }
    }
}

/// Local mirror of a remote offer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteOffer {
    /// Database ID (set after insertion)
    pub id: Option<i64>,

    /// Owning seller account
    pub account: AccountType,

    /// Seller SKU
    pub sku: String,

    /// List price
    pub price: f64,

    /// Discounted price, if any
    pub sale_price: Option<f64>,

    /// Offered stock
    pub stock: i64,

    /// Active flag; remote removals flip this instead of deleting the row
    pub is_active: bool,

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

    /// When a business field last changed
    pub updated_at: Option<DateTime<Utc>>,
}

impl RemoteOffer {
    /// Build a fresh mirror row from a validated record
    pub fn from_record(
        account: AccountType,
        record: &OfferRecord,
        raw_payload: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            account,
            sku: record.sku.clone(),
            price: record.price,
            sale_price: record.sale_price,
            stock: record.stock,
            is_active: record.is_active(),
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
    pub fn differs_from(&self, record: &OfferRecord) -> bool {
        self.price != record.price
            || self.sale_price != record.sale_price
            || self.stock != record.stock
            || self.is_active != record.is_active()
    }

    /// Apply the incoming record's business fields to this row
    pub fn apply_record(&mut self, record: &OfferRecord, raw_payload: Value, now: DateTime<Utc>) {
        self.price = record.price;
        self.sale_price = record.sale_price;
        self.stock = record.stock;
        self.is_active = record.is_active();
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

    // Test 1: Valid offer decodes
    #[test]
    fn test_offer_record_from_value() {
        let value = json!({"sku": "SKU-1", "price": 20.0, "stock": 4});
        let record = OfferRecord::from_value(&value).unwrap();

        assert_eq!(record.sku, "SKU-1");
        assert_eq!(record.price, 20.0);
        assert_eq!(record.stock, 4);
        assert!(record.is_active());
    }

    // Test 2: Validation failures are reported, not panicked
    #[test]
    fn test_offer_record_validation() {
        let value = json!({"sku": "", "price": 20.0});
        assert!(OfferRecord::from_value(&value).unwrap_err().contains("sku"));

        let value = json!({"sku": "SKU-1", "price": -2.0});
        assert!(OfferRecord::from_value(&value)
            .unwrap_err()
            .contains("price"));
    }

    // Test 3: Diff and apply cycle
    #[test]
    fn test_offer_diff_and_apply() {
        let raw = json!({"sku": "SKU-1", "price": 20.0, "stock": 4});
        let record = OfferRecord::from_value(&raw).unwrap();
        let mut offer = RemoteOffer::from_record(AccountType::Fbe, &record, raw.clone(), Utc::now());

        assert!(!offer.differs_from(&record));

        let mut changed = record.clone();
        changed.stock = 9;
        assert!(offer.differs_from(&changed));

        offer.apply_record(&changed, raw, Utc::now());
        assert_eq!(offer.stock, 9);
        assert_eq!(offer.sync_attempts, 2);
    }
}
