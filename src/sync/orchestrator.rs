//! Sync run orchestrator
//!
//! Owns the lifecycle of one sync run: creates the sync log, spawns one
//! task per requested account (each with its own rate limiter and
//! client), accumulates counters and progress after every page, and
//! finalizes the run with a terminal status. Pages within one account
//! are strictly sequential; accounts interleave freely. No error
//! escapes the orchestrator's boundary: the only failure artifacts are
//! the sync log's status and its append-only error list.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::upsert::{BatchOutcome, UpsertEngine};
use super::CancelToken;
use crate::client::{
    ClientObserver, DatabaseRequestRecorder, MarketplaceClient, Page, PageFetcher, RateLimiter,
};
use crate::config::Config;
use crate::database::Database;
use crate::error::{ApiError, AppError};
use crate::models::{
    AccountScope, AccountType, SyncErrorEntry, SyncLog, SyncProgress, SyncRunStatus, SyncType,
};

/// Options for one sync run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Accounts to sync, run concurrently
    pub accounts: Vec<AccountType>,

    /// Kind of data to ingest
    pub sync_type: SyncType,

    /// Page cap per account; falls back to the configured default
    pub max_pages: Option<u32>,
}

/// Per-run request counters fed by the client observer callback
#[derive(Debug, Default)]
struct RunCounters {
    api_requests: AtomicU64,
    rate_limit_hits: AtomicU64,
}

impl ClientObserver for RunCounters {
    fn on_request(&self) {
        self.api_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn on_rate_limit_hit(&self) {
        self.rate_limit_hits.fetch_add(1, Ordering::SeqCst);
    }
}

/// Shared mutable state of one run
struct RunState {
    log: SyncLog,
    started: Instant,
    pages_done: u32,
    total_pages_hints: HashMap<AccountType, u32>,
    total_items_hints: HashMap<AccountType, u64>,
}

/// Result of one account's page loop
struct AccountOutcome {
    account: AccountType,
    pages: u32,
    errored: bool,
}

/// Orchestrates sync runs against the marketplace
pub struct SyncOrchestrator {
    db: Arc<dyn Database>,
    config: Arc<Config>,
}

impl SyncOrchestrator {
    /// Create an orchestrator over the given store and configuration
    pub fn new(db: Arc<dyn Database>, config: Config) -> Self {
        Self {
            db,
            config: Arc::new(config),
        }
    }

    /// Begin a sync run and return its log ID plus the join handle
    ///
    /// The log row is created before this returns, so callers can poll
    /// progress immediately. The returned handle resolves to the
    /// finalized log.
    pub async fn start(
        &self,
        options: RunOptions,
        cancel: CancelToken,
    ) -> Result<(i64, tokio::task::JoinHandle<SyncLog>), AppError> {
        if options.accounts.is_empty() {
            return Err(AppError::Internal(
                "sync run requested with no accounts".to_string(),
            ));
        }

        let mut log = SyncLog::new(
            options.sync_type,
            AccountScope::from_accounts(&options.accounts),
        );
        let id = self.db.insert_sync_log(&log).await?;
        log.id = Some(id);
        self.db.upsert_sync_progress(&SyncProgress::new(id)).await?;

        // Enforce audit retention at run start
        let cutoff = Utc::now() - chrono::Duration::days(self.config.audit.retention_days as i64);
        match self.db.purge_request_logs(cutoff).await {
            Ok(purged) if purged > 0 => {
                info!(purged = purged, "Purged request audit entries past retention")
            }
            Err(err) => warn!(error = %err, "Request audit purge failed"),
            _ => {}
        }

        info!(
            sync_log_id = id,
            sync_type = %options.sync_type,
            scope = %log.account_scope,
            "Starting sync run"
        );

        let db = Arc::clone(&self.db);
        let config = Arc::clone(&self.config);
        let handle = tokio::spawn(Self::execute(db, config, log, options, cancel));

        Ok((id, handle))
    }

    /// Run a sync to completion and return the finalized log
    pub async fn run(
        &self,
        options: RunOptions,
        cancel: CancelToken,
    ) -> Result<SyncLog, AppError> {
        let (_, handle) = self.start(options, cancel).await?;
        handle
            .await
            .map_err(|e| AppError::Internal(format!("sync run task failed: {}", e)))
    }

    async fn execute(
        db: Arc<dyn Database>,
        config: Arc<Config>,
        log: SyncLog,
        options: RunOptions,
        cancel: CancelToken,
    ) -> SyncLog {
        let sync_log_id = log.id.unwrap_or_default();
        let counters = Arc::new(RunCounters::default());
        let state = Arc::new(Mutex::new(RunState {
            log,
            started: Instant::now(),
            pages_done: 0,
            total_pages_hints: HashMap::new(),
            total_items_hints: HashMap::new(),
        }));

        // One task per account, each owning its own rate limiter and client
        let mut handles = Vec::new();
        for account in &options.accounts {
            let handle = tokio::spawn(Self::run_account(
                Arc::clone(&db),
                Arc::clone(&config),
                Arc::clone(&state),
                Arc::clone(&counters),
                sync_log_id,
                *account,
                options.sync_type,
                options.max_pages,
                cancel.clone(),
            ));
            handles.push((*account, handle));
        }

        let mut outcomes = Vec::new();
        for (account, handle) in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    error!(account = %account, error = %err, "Account sync task aborted");
                    let mut s = state.lock().await;
                    s.log.errors.push(SyncErrorEntry::for_account(
                        account,
                        format!("account task aborted: {}", err),
                    ));
                    outcomes.push(AccountOutcome {
                        account,
                        pages: 0,
                        errored: true,
                    });
                }
            }
        }

        Self::finalize(db, state, counters, cancel, outcomes).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_account(
        db: Arc<dyn Database>,
        config: Arc<Config>,
        state: Arc<Mutex<RunState>>,
        counters: Arc<RunCounters>,
        sync_log_id: i64,
        account: AccountType,
        sync_type: SyncType,
        max_pages: Option<u32>,
        cancel: CancelToken,
    ) -> AccountOutcome {
        let Some(account_config) = config.account(account) else {
            warn!(account = %account, "Account not configured or disabled, skipping");
            let mut s = state.lock().await;
            s.log.errors.push(SyncErrorEntry::for_account(
                account,
                "account not configured or disabled",
            ));
            return AccountOutcome {
                account,
                pages: 0,
                errored: true,
            };
        };

        let rate_limiter = Arc::new(RateLimiter::new(&account_config.rate_limit));
        let client = match MarketplaceClient::new(
            account,
            account_config,
            &config.api,
            config.retry.clone(),
            config.circuit_breaker.clone(),
            rate_limiter,
        ) {
            Ok(client) => Arc::new(
                client
                    .with_observer(Arc::clone(&counters) as Arc<dyn ClientObserver>)
                    .with_recorder(Arc::new(DatabaseRequestRecorder::new(Arc::clone(&db)))),
            ),
            Err(err) => {
                let mut s = state.lock().await;
                s.log
                    .errors
                    .push(SyncErrorEntry::for_account(account, err.to_string()));
                return AccountOutcome {
                    account,
                    pages: 0,
                    errored: true,
                };
            }
        };

        let mut fetcher = PageFetcher::new(
            Arc::clone(&client),
            sync_type.endpoint(),
            config.sync.items_per_page,
            max_pages.unwrap_or(config.sync.max_pages),
            Duration::from_millis(config.sync.inter_page_delay_ms),
        );
        let engine = UpsertEngine::new(Arc::clone(&db));

        let mut pages = 0u32;
        let mut seen_keys: Vec<String> = Vec::new();
        let mut errored = false;

        // Pages within one account are strictly sequential: this task
        // owns the fetcher exclusively, which is the per-account
        // concurrency guard.
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let page = match fetcher.next_page().await {
                Ok(Some(page)) => page,
                Ok(None) => break,
                Err(err) => {
                    errored = true;
                    Self::record_account_error(&db, &state, account, &err).await;
                    break;
                }
            };

            let outcome = engine
                .process_batch(sync_type, account, sync_log_id, &page.items, &cancel)
                .await;
            pages += 1;
            seen_keys.extend(outcome.seen_keys.iter().cloned());

            Self::apply_page(&db, &state, &counters, account, &page, outcome).await;
        }

        // Remote-removal sweep, only after a complete uncapped pass so a
        // page-capped run can never deactivate rows it simply did not see
        if !errored
            && !cancel.is_cancelled()
            && !fetcher.cap_reached()
            && matches!(sync_type, SyncType::Products | SyncType::Offers)
        {
            match engine
                .mark_missing_inactive(sync_type, account, &seen_keys)
                .await
            {
                Ok(deactivated) if deactivated > 0 => info!(
                    account = %account,
                    deactivated = deactivated,
                    "Deactivated rows missing from remote"
                ),
                Err(err) => {
                    warn!(account = %account, error = %err, "Missing-row sweep failed")
                }
                _ => {}
            }
        }

        AccountOutcome {
            account,
            pages,
            errored,
        }
    }

    /// Append an account-level error and persist the log
    async fn record_account_error(
        db: &Arc<dyn Database>,
        state: &Arc<Mutex<RunState>>,
        account: AccountType,
        err: &ApiError,
    ) {
        warn!(account = %account, error = %err, "Aborting account after unrecoverable error");

        let mut s = state.lock().await;
        s.log
            .errors
            .push(SyncErrorEntry::for_account(account, err.to_string()));
        if let Err(db_err) = db.update_sync_log(&s.log).await {
            warn!(error = %db_err, "Failed to persist sync log error entry");
        }
    }

    /// Fold one page's outcome into the shared log and progress row
    ///
    /// The state lock is held across the persistence calls so the
    /// stored counters and percentage stay monotonic.
    async fn apply_page(
        db: &Arc<dyn Database>,
        state: &Arc<Mutex<RunState>>,
        counters: &Arc<RunCounters>,
        account: AccountType,
        page: &Page,
        outcome: BatchOutcome,
    ) {
        let mut s = state.lock().await;
        s.pages_done += 1;

        if let Some(hint) = page.total_pages_hint {
            s.total_pages_hints.insert(account, hint);
        }
        if let Some(hint) = page.total_items_hint {
            s.total_items_hints.insert(account, hint);
        }

        s.log.processed_items += outcome.processed();
        s.log.created_items += outcome.created;
        s.log.updated_items += outcome.updated;
        s.log.unchanged_items += outcome.unchanged;
        s.log.conflicted_items += outcome.conflicted;
        s.log.failed_items += outcome.failed.len() as u64;
        for failure in &outcome.failed {
            s.log.errors.push(SyncErrorEntry::for_account(
                account,
                format!("record {}: {}", failure.record_id, failure.reason),
            ));
        }

        let items_hint: u64 = s.total_items_hints.values().sum();
        s.log.total_items = items_hint.max(s.log.processed_items);
        s.log.rate_limit_hits = counters.rate_limit_hits.load(Ordering::SeqCst);
        s.log.api_requests_made = counters.api_requests.load(Ordering::SeqCst);

        let progress = Self::progress_snapshot(&s);

        if let Err(err) = db.update_sync_log(&s.log).await {
            warn!(error = %err, "Failed to persist sync log counters");
        }
        if let Err(err) = db.upsert_sync_progress(&progress).await {
            warn!(error = %err, "Failed to persist sync progress");
        }
    }

    /// Build the progress row from the current run state
    fn progress_snapshot(s: &RunState) -> SyncProgress {
        let sync_log_id = s.log.id.unwrap_or_default();
        let elapsed = s.started.elapsed().as_secs_f64();
        let items_per_second = if elapsed > 0.0 {
            s.log.processed_items as f64 / elapsed
        } else {
            0.0
        };

        let total_pages: Option<u32> = if s.total_pages_hints.is_empty() {
            None
        } else {
            Some(s.total_pages_hints.values().sum())
        };
        let total_items: Option<u64> = if s.total_items_hints.is_empty() {
            None
        } else {
            Some(s.total_items_hints.values().sum())
        };

        // The remote's page counts are estimates; the percentage tops
        // out at 100 and falls back to an asymptotic guess without them
        let percentage_complete = match total_pages {
            Some(total) if total > 0 => {
                ((s.pages_done as f64 / total as f64) * 100.0).min(100.0)
            }
            _ => (s.pages_done as f64 / (s.pages_done as f64 + 1.0)) * 100.0,
        };

        let estimated_completion = total_items.and_then(|total| {
            if items_per_second > 0.0 && total > s.log.processed_items {
                let remaining = (total - s.log.processed_items) as f64 / items_per_second;
                Some(Utc::now() + chrono::Duration::seconds(remaining.ceil() as i64))
            } else {
                None
            }
        });

        SyncProgress {
            sync_log_id,
            current_page: s.pages_done,
            total_pages,
            current_item: s.log.processed_items,
            total_items,
            percentage_complete,
            items_per_second,
            estimated_completion,
            is_active: true,
            updated_at: Utc::now(),
        }
    }

    /// Set the terminal status and persist the finalized log
    async fn finalize(
        db: Arc<dyn Database>,
        state: Arc<Mutex<RunState>>,
        counters: Arc<RunCounters>,
        cancel: CancelToken,
        outcomes: Vec<AccountOutcome>,
    ) -> SyncLog {
        let mut s = state.lock().await;
        s.log.rate_limit_hits = counters.rate_limit_hits.load(Ordering::SeqCst);
        s.log.api_requests_made = counters.api_requests.load(Ordering::SeqCst);

        for outcome in &outcomes {
            debug!(
                account = %outcome.account,
                pages = outcome.pages,
                errored = outcome.errored,
                "Account sync finished"
            );
        }

        let errored_accounts = outcomes.iter().filter(|o| o.errored).count();

        let status = if cancel.is_cancelled() {
            s.log
                .errors
                .push(SyncErrorEntry::run_level("run cancelled before completion"));
            SyncRunStatus::Failed
        } else if !outcomes.is_empty() && errored_accounts == outcomes.len() {
            SyncRunStatus::Failed
        } else if errored_accounts > 0 || s.log.failed_items > 0 {
            SyncRunStatus::Partial
        } else {
            SyncRunStatus::Completed
        };

        s.log.status = status;
        s.log.completed_at = Some(Utc::now());

        let final_log = s.log.clone();
        let sync_log_id = final_log.id.unwrap_or_default();

        if let Err(err) = db.finalize_sync_log(&final_log).await {
            error!(sync_log_id = sync_log_id, error = %err, "Failed to finalize sync log");
        }
        if let Err(err) = db.deactivate_sync_progress(sync_log_id).await {
            warn!(sync_log_id = sync_log_id, error = %err, "Failed to deactivate sync progress");
        }

        info!(
            sync_log_id = sync_log_id,
            status = %status,
            processed = final_log.processed_items,
            created = final_log.created_items,
            updated = final_log.updated_items,
            failed = final_log.failed_items,
            conflicted = final_log.conflicted_items,
            api_requests = final_log.api_requests_made,
            rate_limit_hits = final_log.rate_limit_hits,
            "Sync run finished"
        );

        final_log
    }
}
