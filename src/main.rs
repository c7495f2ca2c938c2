//! marketplace-sync - Marketplace catalog and order synchronization engine
//!
//! This is the main entry point: one invocation performs one sync run
//! and exits with a status code reflecting the run's outcome.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use marketplace_sync::config::Config;
use marketplace_sync::database::SqliteDatabase;
use marketplace_sync::error::AppError;
use marketplace_sync::models::{AccountScope, SyncRunStatus, SyncType};
use marketplace_sync::sync::SyncService;

/// marketplace-sync - synchronize marketplace data into the local store
#[derive(Parser, Debug)]
#[command(name = "marketplace-sync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "MARKETPLACE_SYNC_CONFIG")]
    config: Option<String>,

    /// What to sync: products, offers, or orders
    #[arg(short = 't', long, default_value = "products")]
    sync_type: SyncType,

    /// Accounts to sync: main, fbe, or both
    #[arg(short, long, default_value = "both")]
    accounts: AccountScope,

    /// Safety cap on pages per account
    #[arg(short, long)]
    max_pages: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration
    let config = load_config(&args)?;

    // Initialize tracing/logging
    init_tracing(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting marketplace-sync"
    );

    // Initialize database
    let database = SqliteDatabase::new(&config.database.path).await?;
    let database = Arc::new(database);
    info!(path = %config.database.path, "Database initialized");

    // Restrict the requested scope to accounts that are actually configured
    let accounts: Vec<_> = args
        .accounts
        .accounts()
        .into_iter()
        .filter(|a| config.account(*a).is_some())
        .collect();
    if accounts.is_empty() {
        error!(scope = %args.accounts, "No configured account matches the requested scope");
        std::process::exit(2);
    }

    let service = SyncService::new(database, config);

    let log = service
        .run_sync(accounts, args.sync_type, args.max_pages)
        .await?;

    info!(
        sync_log_id = log.id.unwrap_or_default(),
        status = %log.status,
        processed = log.processed_items,
        created = log.created_items,
        updated = log.updated_items,
        unchanged = log.unchanged_items,
        conflicted = log.conflicted_items,
        failed = log.failed_items,
        api_requests = log.api_requests_made,
        rate_limit_hits = log.rate_limit_hits,
        "Sync run finished"
    );

    for entry in &log.errors {
        error!(
            account = entry.account.map(|a| a.to_string()).unwrap_or_default(),
            at = %entry.at,
            "{}",
            entry.message
        );
    }

    match log.status {
        SyncRunStatus::Completed => Ok(()),
        SyncRunStatus::Partial => std::process::exit(3),
        _ => std::process::exit(1),
    }
}

/// Load configuration from file or environment
fn load_config(args: &Args) -> Result<Config, AppError> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

/// Initialize the tracing subscriber from the logging configuration
fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.clone()));

    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
