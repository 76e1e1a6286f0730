//! Periodic removal of idle sessions and idle workspaces. See SPEC_FULL.md
//! section 4.7.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::session::{CleanupResult as SessionCleanupResult, SessionStore};
use crate::workspace::WorkspaceManager;

#[derive(Debug, Clone, Copy, Default)]
pub struct WorkspaceCleanupResult {
    pub removed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub duration_ms: i64,
}

pub struct SessionCleanupService {
    sessions: Arc<SessionStore>,
    interval: Duration,
    running: AtomicBool,
}

impl SessionCleanupService {
    pub fn new(sessions: Arc<SessionStore>, interval: Duration) -> Self {
        Self { sessions, interval, running: AtomicBool::new(false) }
    }

    /// Starts the periodic ticker, mirroring the reference router's
    /// `start_refresh_task` idiom: an initial run, then one sweep per tick.
    pub fn start(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.run_once();
            }
        });
    }

    /// Runs one sweep unless another is already in flight. Safe to call
    /// directly for manual invocation.
    pub fn run_once(&self) -> Option<SessionCleanupResult> {
        if self.running.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            debug!("session cleanup sweep already in progress, skipping this tick");
            return None;
        }
        let result = self.sessions.clean_expired();
        self.running.store(false, Ordering::SeqCst);
        info!(expired = result.expired, remaining = result.remaining, "session cleanup complete");
        Some(result)
    }
}

pub struct WorkspaceCleanupService {
    workspaces: Arc<WorkspaceManager>,
    db: Arc<crate::db::Database>,
    max_idle: chrono::Duration,
    interval: Duration,
    running: AtomicBool,
}

impl WorkspaceCleanupService {
    pub fn new(
        workspaces: Arc<WorkspaceManager>,
        db: Arc<crate::db::Database>,
        max_idle: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            workspaces,
            db,
            max_idle: chrono::Duration::from_std(max_idle).unwrap_or(chrono::Duration::zero()),
            interval,
            running: AtomicBool::new(false),
        }
    }

    pub fn start(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        });
    }

    /// Removes on-disk workspaces (and their metadata) idle past `max_idle`.
    /// A missing `work_dir` is not an error. Safe for manual invocation.
    pub async fn run_once(&self) -> Option<WorkspaceCleanupResult> {
        if self.running.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            debug!("workspace cleanup sweep already in progress, skipping this tick");
            return None;
        }
        let result = self.sweep().await;
        self.running.store(false, Ordering::SeqCst);
        info!(
            removed = result.removed,
            skipped = result.skipped,
            errors = result.errors,
            "workspace cleanup complete"
        );
        Some(result)
    }

    async fn sweep(&self) -> WorkspaceCleanupResult {
        let start = Utc::now();
        let cutoff = start - self.max_idle;

        let records = match self.db.find_workspaces_unused_since(cutoff) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "failed to list workspace metadata for cleanup");
                return WorkspaceCleanupResult { errors: 1, duration_ms: (Utc::now() - start).num_milliseconds(), ..Default::default() };
            }
        };

        let total_before = match self.db.list_all_workspaces() {
            Ok(all) => all.len(),
            Err(_) => records.len(),
        };

        let mut removed = 0;
        let errors = 0;
        for record in &records {
            self.workspaces.remove_workspace(&record.workspace_id, std::path::Path::new(&record.path)).await;
            removed += 1;
        }

        let skipped = total_before.saturating_sub(removed);

        WorkspaceCleanupResult {
            removed,
            skipped,
            errors,
            duration_ms: (Utc::now() - start).num_milliseconds(),
        }
    }
}
