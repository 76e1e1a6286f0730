//! Library surface for the webhook dispatcher binary. Split out of `main.rs`
//! so the receiver, processor, and stores can be driven from integration
//! tests in-process instead of against a live deployment.

pub mod adapters;
pub mod classifier;
pub mod cleanup;
pub mod config;
pub mod context;
pub mod crypto;
pub mod db;
pub mod executor;
pub mod locks;
pub mod platform;
pub mod processor;
pub mod session;
pub mod vault;
pub mod webhook;
pub mod workspace;

use std::sync::Arc;
use std::time::Instant;

use adapters::ProviderAdapter;
use adapters::claude::ClaudeAdapter;
use adapters::codex::CodexAdapter;
use cleanup::{SessionCleanupService, WorkspaceCleanupService};
use config::Config;
use db::Database;
use executor::StreamingExecutor;
use platform::PlatformClient;
use session::SessionStore;
use vault::SecretVault;
use webhook::AppState;
use workspace::WorkspaceManager;

/// Builds every component wired together by `main`, minus binding and
/// serving, so integration tests can drive the same `AppState` in-process.
pub fn build_app_state(config: Arc<Config>) -> Result<Arc<AppState>, Box<dyn std::error::Error>> {
    let db = Arc::new(Database::open(&config.database_path)?);
    let vault = Arc::new(SecretVault::new(config.encryption_key.as_bytes())?);

    let sessions = Arc::new(SessionStore::new(
        db.clone(),
        config.session_max_idle_time,
        config.session_max_sessions,
    ));
    sessions.load_from_snapshot()?;

    let workspaces = Arc::new(WorkspaceManager::new(config.work_dir.clone(), db.clone()));
    let platform = Arc::new(PlatformClient::new());
    let executor = Arc::new(StreamingExecutor);

    let claude: Arc<dyn ProviderAdapter> = Arc::new(ClaudeAdapter);
    let codex: Arc<dyn ProviderAdapter> = Arc::new(CodexAdapter);

    let processor = Arc::new(webhook::build_processor(
        db.clone(),
        sessions.clone(),
        workspaces.clone(),
        executor,
        platform,
        claude,
        codex,
    ));

    if config.session_enabled {
        Arc::new(SessionCleanupService::new(sessions.clone(), config.session_cleanup_interval)).start();
    }
    Arc::new(WorkspaceCleanupService::new(
        workspaces,
        db.clone(),
        config.workspace_max_idle_time,
        config.workspace_cleanup_interval,
    ))
    .start();

    Ok(Arc::new(AppState {
        db,
        vault,
        config: config.clone(),
        processor,
        start_time: Instant::now(),
        session_enabled: config.session_enabled,
    }))
}

/// Builds the axum router, wiring `/webhook/:token`, `/webhook`, and
/// `/health` onto one shared `AppState`.
pub fn build_router(state: Arc<AppState>) -> axum::Router {
    use axum::routing::{get, post};
    axum::Router::new()
        .route("/webhook/{token}", post(webhook::handle_webhook))
        .route("/webhook", post(webhook::handle_webhook))
        .route("/health", get(webhook::health_check))
        .with_state(state)
}
