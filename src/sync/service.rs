//! Sync service facade
//!
//! `SyncService` is the inbound surface for CLI/scheduler/API
//! collaborators: start a run, cancel it, poll its progress, read its
//! summary, and work the conflict queue. It owns nothing beyond a
//! handle registry; all run semantics live in the orchestrator.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::orchestrator::{RunOptions, SyncOrchestrator};
use super::CancelToken;
use crate::config::Config;
use crate::database::Database;
use crate::error::{AppError, DbError};
use crate::models::{
    AccountType, ImportConflict, SyncLog, SyncProgress, SyncType,
};

/// Sync log plus the identifiers it touched
#[derive(Debug, Clone)]
pub struct SyncSummary {
    /// The run's durable record
    pub log: SyncLog,

    /// Natural keys (`<id>@<account>`) synced during the run
    pub synced_keys: Vec<String>,
}

/// Bookkeeping for one in-flight run
struct ActiveRun {
    cancel: CancelToken,
    handle: Option<JoinHandle<SyncLog>>,
}

/// Facade over the sync engine
pub struct SyncService {
    db: Arc<dyn Database>,
    orchestrator: SyncOrchestrator,
    active: Mutex<HashMap<i64, ActiveRun>>,
}

impl SyncService {
    /// Create a service over the given store and configuration
    pub fn new(db: Arc<dyn Database>, config: Config) -> Self {
        let orchestrator = SyncOrchestrator::new(Arc::clone(&db), config);
        Self {
            db,
            orchestrator,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Start a sync run in the background
    ///
    /// Returns the sync log ID immediately; progress can be polled with
    /// [`get_progress`](Self::get_progress) while the run executes.
    pub async fn start_sync(
        &self,
        accounts: Vec<AccountType>,
        sync_type: SyncType,
        max_pages: Option<u32>,
    ) -> Result<i64, AppError> {
        let cancel = CancelToken::new();
        let (id, handle) = self
            .orchestrator
            .start(
                RunOptions {
                    accounts,
                    sync_type,
                    max_pages,
                },
                cancel.clone(),
            )
            .await?;

        self.active.lock().await.insert(
            id,
            ActiveRun {
                cancel,
                handle: Some(handle),
            },
        );

        Ok(id)
    }

    /// Request cancellation of an in-flight run
    ///
    /// Returns false when the run is unknown (already finished and
    /// awaited, or never started here).
    pub async fn cancel_sync(&self, sync_log_id: i64) -> bool {
        let active = self.active.lock().await;
        match active.get(&sync_log_id) {
            Some(run) => {
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Wait for a started run to finish and return its finalized log
    pub async fn wait(&self, sync_log_id: i64) -> Result<SyncLog, AppError> {
        let handle = {
            let mut active = self.active.lock().await;
            active
                .get_mut(&sync_log_id)
                .and_then(|run| run.handle.take())
        };

        let Some(handle) = handle else {
            return Err(AppError::Internal(format!(
                "sync run {} is not awaitable",
                sync_log_id
            )));
        };

        let log = handle
            .await
            .map_err(|e| AppError::Internal(format!("sync run task failed: {}", e)))?;

        self.active.lock().await.remove(&sync_log_id);
        Ok(log)
    }

    /// Run a sync to completion (start + wait)
    pub async fn run_sync(
        &self,
        accounts: Vec<AccountType>,
        sync_type: SyncType,
        max_pages: Option<u32>,
    ) -> Result<SyncLog, AppError> {
        let id = self.start_sync(accounts, sync_type, max_pages).await?;
        self.wait(id).await
    }

    /// Live progress of a run
    pub async fn get_progress(&self, sync_log_id: i64) -> Result<Option<SyncProgress>, AppError> {
        Ok(self.db.get_sync_progress(sync_log_id).await?)
    }

    /// Sync log plus the record identifiers it touched
    pub async fn get_sync_summary(&self, sync_log_id: i64) -> Result<SyncSummary, AppError> {
        let log = self
            .db
            .get_sync_log(sync_log_id)
            .await?
            .ok_or(AppError::Database(DbError::NotFound))?;

        let synced_keys = self
            .db
            .list_synced_keys(log.sync_type, log.started_at)
            .await?;

        Ok(SyncSummary { log, synced_keys })
    }

    /// Pending import conflicts, oldest first
    pub async fn list_pending_conflicts(
        &self,
        limit: u32,
    ) -> Result<Vec<ImportConflict>, AppError> {
        Ok(self.db.list_pending_conflicts(limit).await?)
    }

    /// Resolve a pending conflict with a note from the resolving actor
    pub async fn resolve_conflict(
        &self,
        conflict_id: i64,
        resolution: &str,
    ) -> Result<(), AppError> {
        Ok(self.db.resolve_conflict(conflict_id, resolution).await?)
    }
}
