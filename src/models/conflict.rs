//! Import conflict models
//!
//! A conflict is recorded when an incoming remote record would overwrite
//! a row that was modified locally. The row is left untouched and the
//! divergence is persisted for manual resolution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of entity a conflict was detected on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Product mirror row
    Product,
    /// Offer mirror row
    Offer,
    /// Order mirror row
    Order,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Product => write!(f, "product"),
            EntityKind::Offer => write!(f, "offer"),
            EntityKind::Order => write!(f, "order"),
        }
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "product" => Ok(EntityKind::Product),
            "offer" => Ok(EntityKind::Offer),
            "order" => Ok(EntityKind::Order),
            _ => Err(format!("Invalid entity kind: {}", s)),
        }
    }
}

/// Resolution state of a recorded conflict
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStatus {
    /// Waiting for a human decision
    #[default]
    Pending,
    /// Resolved by an external actor
    Resolved,
}

impl std::fmt::Display for ConflictStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictStatus::Pending => write!(f, "pending"),
            ConflictStatus::Resolved => write!(f, "resolved"),
        }
    }
}

impl std::str::FromStr for ConflictStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ConflictStatus::Pending),
            "resolved" => Ok(ConflictStatus::Resolved),
            _ => Err(format!("Invalid conflict status: {}", s)),
        }
    }
}

/// One detected divergence between a remote record and a local row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportConflict {
    /// Database ID (set after insertion)
    pub id: Option<i64>,

    /// Sync run that detected the conflict
    pub sync_log_id: i64,

    /// Entity kind the conflict was detected on
    pub entity_kind: EntityKind,

    /// Natural key of the affected row, e.g. "SKU-100@main"
    pub entity_key: String,

    /// Short machine-readable conflict label, e.g. "status_regression"
    pub conflict_type: String,

    /// Incoming remote payload
    pub remote_payload: Value,

    /// Local row snapshot at detection time
    pub local_payload: Value,

    /// Resolution state
    pub status: ConflictStatus,

    /// Free-form resolution note, set by the resolving actor
    pub resolution: Option<String>,

    /// When the conflict was recorded
    pub created_at: DateTime<Utc>,

    /// When the conflict was resolved
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ImportConflict {
    /// Create a new pending conflict
    pub fn new(
        sync_log_id: i64,
        entity_kind: EntityKind,
        entity_key: impl Into<String>,
        conflict_type: impl Into<String>,
        remote_payload: Value,
        local_payload: Value,
    ) -> Self {
        Self {
            id: None,
            sync_log_id,
            entity_kind,
            entity_key: entity_key.into(),
            conflict_type: conflict_type.into(),
            remote_payload,
            local_payload,
            status: ConflictStatus::Pending,
            resolution: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }
}
