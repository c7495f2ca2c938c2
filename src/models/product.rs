//! Product mirror models
//!
//! `ProductRecord` is the typed shape of one product item from a remote
//! listing page, decoded and validated once at the client boundary.
//! `RemoteProduct` is the local mirror row, keyed by `(sku, account)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{AccountType, SyncStatus};

/// Typed remote product record from a listing page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    /// Seller SKU, the natural key together with the account
    pub sku: String,

    /// Product name
    pub name: String,

    /// List price
    pub price: f64,

    /// Discounted price, if any
    #[serde(default)]
    pub sale_price: Option<f64>,

    /// ISO currency code
    #[serde(default)]
    pub currency: Option<String>,

    /// Total stock reported by the remote
    #[serde(default)]
    pub stock: i64,

    /// Stock reserved for open orders
    #[serde(default)]
    pub reserved_stock: i64,

    /// Remote status string ("active"/"inactive"); missing means active
    #[serde(default)]
    pub status: Option<String>,

    /// Remote-reported last modification time
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
}

impl ProductRecord {
    /// Decode and validate one listing item
    ///
    /// Returns a human-readable reason on failure; the caller isolates
    /// the bad record instead of aborting the batch.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let record: ProductRecord = serde_json::from_value(value.clone())
            .map_err(|e| format!("malformed product record: {}", e))?;
        record.validate()?;
        Ok(record)
    }

    fn validate(&self) -> Result<(), String> {
        if self.sku.trim().is_empty() {
            return Err("sku must not be empty".to_string());
        }
        if self.name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(format!("price must be non-negative, got {}", self.price));
        }
        if let Some(sale_price) = self.sale_price {
            if !sale_price.is_finite() || sale_price < 0.0 {
                return Err(format!(
                    "sale_price must be non-negative, got {}",
                    sale_price
                ));
            }
        }
        if self.stock < 0 {
            return Err(format!("stock must be non-negative, got {}", self.stock));
        }
        Ok(())
    }

    /// Whether the remote considers this product active
    pub fn is_active(&self) -> bool {
        match self.status.as_deref() {
            Some(s) => !s.eq_ignore_ascii_case("inactive"),
            None => true,
        }
    }
}

/// Local mirror of a remote product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteProduct {
    /// Database ID (set after insertion)
    pub id: Option<i64>,

    /// Owning seller account
    pub account: AccountType,

    /// Seller SKU
    pub sku: String,

    /// Product name
    pub name: String,

    /// List price
    pub price: f64,

    /// Discounted price, if any
    pub sale_price: Option<f64>,

    /// ISO currency code
    pub currency: Option<String>,

    /// Total stock
    pub stock: i64,

    /// Stock reserved for open orders
    pub reserved_stock: i64,

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

    /// Verbatim remote JSON, kept for forward compatibility
    pub raw_payload: Value,

    /// When the row was created
    pub created_at: Option<DateTime<Utc>>,

    /// When a business field last changed (locally or via sync)
    pub updated_at: Option<DateTime<Utc>>,
}

impl RemoteProduct {
    /// Build a fresh mirror row from a validated record
    pub fn from_record(
        account: AccountType,
        record: &ProductRecord,
        raw_payload: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            account,
            sku: record.sku.clone(),
            name: record.name.clone(),
            price: record.price,
            sale_price: record.sale_price,
            currency: record.currency.clone(),
            stock: record.stock,
            reserved_stock: record.reserved_stock,
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

    /// Sellable stock: total minus reserved, clamped to zero
    pub fn available_stock(&self) -> i64 {
        (self.stock - self.reserved_stock).max(0)
    }

    /// Whether any mutable business field differs from the incoming record
    pub fn differs_from(&self, record: &ProductRecord) -> bool {
        self.name != record.name
            || self.price != record.price
            || self.sale_price != record.sale_price
            || self.currency != record.currency
            || self.stock != record.stock
            || self.reserved_stock != record.reserved_stock
            || self.is_active != record.is_active()
    }

    /// Apply the incoming record's business fields to this row
    ///
    /// Bumps `updated_at`, increments `sync_attempts`, and clears any
    /// previous sync error.
    pub fn apply_record(&mut self, record: &ProductRecord, raw_payload: Value, now: DateTime<Utc>) {
        self.name = record.name.clone();
        self.price = record.price;
        self.sale_price = record.sale_price;
        self.currency = record.currency.clone();
        self.stock = record.stock;
        self.reserved_stock = record.reserved_stock;
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
