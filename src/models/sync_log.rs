//! Sync run bookkeeping models
//!
//! A sync run is one orchestrator invocation for one sync type and one
//! account scope. `SyncLog` is its durable record, `SyncProgress` its
//! live progress row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AccountType;

/// Kind of data a sync run ingests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncType {
    /// Product catalog entries
    Products,
    /// Price/stock offers
    Offers,
    /// Customer orders
    Orders,
}

impl SyncType {
    /// Remote listing endpoint for this sync type
    pub fn endpoint(&self) -> &'static str {
        match self {
            SyncType::Products => "product/read",
            SyncType::Offers => "offer/read",
            SyncType::Orders => "order/read",
        }
    }
}

impl std::fmt::Display for SyncType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncType::Products => write!(f, "products"),
            SyncType::Offers => write!(f, "offers"),
            SyncType::Orders => write!(f, "orders"),
        }
    }
}

impl std::str::FromStr for SyncType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "products" => Ok(SyncType::Products),
            "offers" => Ok(SyncType::Offers),
            "orders" => Ok(SyncType::Orders),
            _ => Err(format!("Invalid sync type: {}", s)),
        }
    }
}

/// Record-level synchronization state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Not yet synchronized
    #[default]
    Pending,
    /// Last sync succeeded
    Synced,
    /// Last sync failed
    Failed,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Pending => write!(f, "pending"),
            SyncStatus::Synced => write!(f, "synced"),
            SyncStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            "failed" => Ok(SyncStatus::Failed),
            _ => Err(format!("Invalid sync status: {}", s)),
        }
    }
}

/// Run-level status of a sync invocation
///
/// `Running` is the only non-terminal state; once a terminal state is
/// set the log is immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncRunStatus {
    /// Run in progress
    Running,
    /// All accounts succeeded with zero record failures
    Completed,
    /// Every account failed outright (or the run was cancelled)
    Failed,
    /// Some mix of success and failure
    Partial,
}

impl SyncRunStatus {
    /// Whether this status is terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SyncRunStatus::Running)
    }
}

impl std::fmt::Display for SyncRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncRunStatus::Running => write!(f, "running"),
            SyncRunStatus::Completed => write!(f, "completed"),
            SyncRunStatus::Failed => write!(f, "failed"),
            SyncRunStatus::Partial => write!(f, "partial"),
        }
    }
}

impl std::str::FromStr for SyncRunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(SyncRunStatus::Running),
            "completed" => Ok(SyncRunStatus::Completed),
            "failed" => Ok(SyncRunStatus::Failed),
            "partial" => Ok(SyncRunStatus::Partial),
            _ => Err(format!("Invalid sync run status: {}", s)),
        }
    }
}

/// Which seller accounts a sync run covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountScope {
    /// MAIN account only
    Main,
    /// FBE account only
    Fbe,
    /// Both accounts, run concurrently
    Both,
}

impl AccountScope {
    /// Accounts included in this scope
    pub fn accounts(&self) -> Vec<AccountType> {
        match self {
            AccountScope::Main => vec![AccountType::Main],
            AccountScope::Fbe => vec![AccountType::Fbe],
            AccountScope::Both => vec![AccountType::Main, AccountType::Fbe],
        }
    }

    /// Build a scope from an explicit account list
    pub fn from_accounts(accounts: &[AccountType]) -> Self {
        let main = accounts.contains(&AccountType::Main);
        let fbe = accounts.contains(&AccountType::Fbe);
        match (main, fbe) {
            (true, false) => AccountScope::Main,
            (false, true) => AccountScope::Fbe,
            _ => AccountScope::Both,
        }
    }
}

impl std::fmt::Display for AccountScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountScope::Main => write!(f, "main"),
            AccountScope::Fbe => write!(f, "fbe"),
            AccountScope::Both => write!(f, "both"),
        }
    }
}

impl std::str::FromStr for AccountScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "main" => Ok(AccountScope::Main),
            "fbe" => Ok(AccountScope::Fbe),
            "both" | "all" => Ok(AccountScope::Both),
            _ => Err(format!("Invalid account scope: {}", s)),
        }
    }
}

/// One structured entry in a sync log's append-only error list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncErrorEntry {
    /// Account the error occurred on, if account-specific
    pub account: Option<AccountType>,

    /// Human-readable error message
    pub message: String,

    /// When the error was recorded
    pub at: DateTime<Utc>,
}

impl SyncErrorEntry {
    /// Create a new error entry for an account
    pub fn for_account(account: AccountType, message: impl Into<String>) -> Self {
        Self {
            account: Some(account),
            message: message.into(),
            at: Utc::now(),
        }
    }

    /// Create a new run-level error entry
    pub fn run_level(message: impl Into<String>) -> Self {
        Self {
            account: None,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Durable record of one sync run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLog {
    /// Database ID (set after insertion)
    pub id: Option<i64>,

    /// Kind of data this run ingests
    pub sync_type: SyncType,

    /// Accounts covered by this run
    pub account_scope: AccountScope,

    /// Run-level status
    pub status: SyncRunStatus,

    /// Total items reported by the remote API, when known
    pub total_items: u64,

    /// Items pulled from pages and handed to the upsert engine
    pub processed_items: u64,

    /// Rows created
    pub created_items: u64,

    /// Rows updated
    pub updated_items: u64,

    /// Rows left untouched (no business-field change)
    pub unchanged_items: u64,

    /// Records skipped because a conflict was recorded
    pub conflicted_items: u64,

    /// Records that failed validation or persistence
    pub failed_items: u64,

    /// Append-only structured error list
    pub errors: Vec<SyncErrorEntry>,

    /// Number of 429 responses observed
    pub rate_limit_hits: u64,

    /// Number of HTTP requests issued
    pub api_requests_made: u64,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncLog {
    /// Create a new running sync log
    pub fn new(sync_type: SyncType, account_scope: AccountScope) -> Self {
        Self {
            id: None,
            sync_type,
            account_scope,
            status: SyncRunStatus::Running,
            total_items: 0,
            processed_items: 0,
            created_items: 0,
            updated_items: 0,
            unchanged_items: 0,
            conflicted_items: 0,
            failed_items: 0,
            errors: Vec::new(),
            rate_limit_hits: 0,
            api_requests_made: 0,
            started_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Live progress row for an in-flight sync run
///
/// At most one row exists per sync log; it is updated in place after
/// every page and marked inactive when the run ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncProgress {
    /// Owning sync log
    pub sync_log_id: i64,

    /// Last page processed
    pub current_page: u32,

    /// Estimated total pages, when the remote reports one
    pub total_pages: Option<u32>,

    /// Items processed so far
    pub current_item: u64,

    /// Estimated total items, when the remote reports one
    pub total_items: Option<u64>,

    /// Completion percentage in [0, 100]
    pub percentage_complete: f64,

    /// Rolling processing rate
    pub items_per_second: f64,

    /// Extrapolated completion time at the current rate
    pub estimated_completion: Option<DateTime<Utc>>,

    /// Whether the run is still in flight
    pub is_active: bool,

    /// When this row was last updated
    pub updated_at: DateTime<Utc>,
}

impl SyncProgress {
    /// Create a fresh progress row for a sync log
    pub fn new(sync_log_id: i64) -> Self {
        Self {
            sync_log_id,
            current_page: 0,
            total_pages: None,
            current_item: 0,
            total_items: None,
            percentage_complete: 0.0,
            items_per_second: 0.0,
            estimated_completion: None,
            is_active: true,
            updated_at: Utc::now(),
        }
    }
}
