//! Conflict detection and recording
//!
//! Before the upsert engine overwrites an existing row, it asks this
//! module whether the incoming remote record diverges from a row that
//! was modified locally. A detected divergence is persisted as a
//! pending `ImportConflict` and the local row is left untouched; the
//! record counts as conflicted, not failed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::info;

use crate::database::Database;
use crate::error::DbError;
use crate::models::{
    EntityKind, ImportConflict, OfferRecord, OrderRecord, ProductRecord, RemoteOffer, RemoteOrder,
    RemoteProduct,
};

/// Records divergences between incoming remote records and locally
/// modified rows
pub struct ConflictRecorder {
    db: Arc<dyn Database>,
}

impl ConflictRecorder {
    /// Create a recorder persisting through the given database
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Divergence check for a product row
    ///
    /// Triggers when the local row is newer than the remote record's
    /// reported modification time and a business field differs.
    pub fn product_conflict(
        existing: &RemoteProduct,
        incoming: &ProductRecord,
    ) -> Option<&'static str> {
        if !locally_newer(existing.updated_at, incoming.modified_at) {
            return None;
        }
        if existing.price != incoming.price
            || existing.sale_price != incoming.sale_price
            || existing.is_active != incoming.is_active()
        {
            Some("local_edit_divergence")
        } else {
            None
        }
    }

    /// Divergence check for an offer row
    pub fn offer_conflict(existing: &RemoteOffer, incoming: &OfferRecord) -> Option<&'static str> {
        if !locally_newer(existing.updated_at, incoming.modified_at) {
            return None;
        }
        if existing.price != incoming.price
            || existing.sale_price != incoming.sale_price
            || existing.is_active != incoming.is_active()
        {
            Some("local_edit_divergence")
        } else {
            None
        }
    }

    /// Divergence check for an order row
    ///
    /// The business-significant divergence here is the order status
    /// walking its lifecycle backwards, e.g. a shipped order arriving
    /// as new again.
    pub fn order_conflict(existing: &RemoteOrder, incoming: &OrderRecord) -> Option<&'static str> {
        if !locally_newer(existing.updated_at, incoming.modified_at) {
            return None;
        }
        if existing.status.is_regression_to(incoming.status) {
            Some("status_regression")
        } else {
            None
        }
    }

    /// Persist a pending conflict for manual resolution
    pub async fn record(
        &self,
        sync_log_id: i64,
        entity_kind: EntityKind,
        entity_key: &str,
        conflict_type: &str,
        remote_payload: Value,
        local_payload: Value,
    ) -> Result<i64, DbError> {
        let conflict = ImportConflict::new(
            sync_log_id,
            entity_kind,
            entity_key,
            conflict_type,
            remote_payload,
            local_payload,
        );

        let id = self.db.insert_conflict(&conflict).await?;

        info!(
            entity_kind = %entity_kind,
            entity_key = entity_key,
            conflict_type = conflict_type,
            conflict_id = id,
            "Recorded import conflict, local row left untouched"
        );

        Ok(id)
    }
}

/// Whether the local row was updated after the remote record's reported
/// modification time
///
/// Without both timestamps there is nothing to compare and the guard
/// does not fire.
fn locally_newer(
    local_updated: Option<DateTime<Utc>>,
    remote_modified: Option<DateTime<Utc>>,
) -> bool {
    match (local_updated, remote_modified) {
        (Some(local), Some(remote)) => local > remote,
        _ => false,
    }
}
