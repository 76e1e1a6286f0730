use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use copilot_dispatcher::config::Config;
use copilot_dispatcher::{build_app_state, build_router};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "copilot_dispatcher=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match Config::from_env() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            eprintln!("Error: Failed to load configuration: {}", e);
            eprintln!("\nRequired environment variables:");
            eprintln!("  ENCRYPTION_KEY           - Passphrase for the tenant secret vault");
            eprintln!("\nOptional environment variables:");
            eprintln!("  PORT                     - Listen port (default: 3000)");
            eprintln!("  WORK_DIR                 - Git workspace root (default: /tmp/gitlab-copilot-work)");
            eprintln!("  DATABASE_PATH            - Path to SQLite database (default: ./data/dispatcher.db)");
            eprintln!("  AI_EXECUTOR              - Default provider: claude|codex (default: claude)");
            eprintln!("  GITLAB_BASE_URL/GITLAB_TOKEN/WEBHOOK_SECRET - legacy single-tenant fallback");
            eprintln!("  SESSION_MAX_IDLE_TIME, SESSION_CLEANUP_INTERVAL");
            eprintln!("  WORKSPACE_MAX_IDLE_TIME, WORKSPACE_CLEANUP_INTERVAL");
            std::process::exit(1);
        }
    };

    info!(
        port = config.port,
        work_dir = %config.work_dir,
        database_path = %config.database_path,
        ai_executor = ?config.ai_executor,
        "Starting webhook dispatcher"
    );

    let listen_addr = config.listen_addr();

    let state = match build_app_state(config) {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "Failed to initialize application state");
            eprintln!("Error: Failed to initialize application state: {}", e);
            std::process::exit(1);
        }
    };

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .expect("Failed to bind to address");

    info!(address = %listen_addr, "Server listening");
    info!("Webhook URL: http://<your-host>/webhook/:token");

    axum::serve(listener, app).await.expect("Server failed to start");
}
