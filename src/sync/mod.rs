//! Synchronization engine
//!
//! This module ties the client infrastructure to the local store: the
//! idempotent upsert engine, conflict recording, the run orchestrator,
//! and the service facade callers interact with.
//!
//! # Components
//!
//! - [`upsert`]: Idempotent insert-or-update with per-record failure isolation
//! - [`conflict`]: Divergence detection against locally modified rows
//! - [`orchestrator`]: Run-level state machine, progress tracking, per-account tasks
//! - [`service`]: Facade exposing start/cancel/progress/summary operations

pub mod conflict;
pub mod orchestrator;
pub mod service;
pub mod upsert;

pub use conflict::ConflictRecorder;
pub use orchestrator::{RunOptions, SyncOrchestrator};
pub use service::{SyncService, SyncSummary};
pub use upsert::{BatchOutcome, RecordFailure, UpsertEngine};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag for an in-flight sync run
///
/// The orchestrator and upsert engine poll this between pages and
/// between records; cancellation finalizes the run as failed instead of
/// leaving a running log row orphaned.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a fresh, uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
