//! SQLite-backed persistence for tenants, events, workspace metadata, and
//! session snapshots, following the reference router's pattern of a single
//! `Connection` behind a `parking_lot::Mutex`.

mod events;
mod sessions;
mod tenants;
mod workspaces;

pub use events::{EventRecord, EventStatus, ResponseType};
pub use sessions::SessionSnapshotRow;
pub use tenants::TenantRecord;
pub use workspaces::WorkspaceRecord;

use parking_lot::Mutex;
use rusqlite::Connection;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("record not found")]
    NotFound,
    #[error("secret vault error: {0}")]
    Vault(#[from] crate::vault::VaultError),
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Opens (or creates) the database at `path` and runs migrations.
    /// Use `":memory:"` for tests.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.create_schema()?;
        info!(path = %path, "database opened and schema verified");
        Ok(db)
    }

    fn create_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tenants (
                id TEXT PRIMARY KEY,
                opaque_token TEXT NOT NULL UNIQUE,
                user_token TEXT,
                is_default INTEGER NOT NULL DEFAULT 0,
                platform_base_url TEXT NOT NULL,
                platform_access_token TEXT NOT NULL,
                webhook_secret TEXT NOT NULL,
                display_name TEXT
            );

            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                tenant_id TEXT,
                config_id TEXT,
                project_id TEXT NOT NULL,
                project_name TEXT,
                event_kind TEXT NOT NULL,
                event_context TEXT,
                context_id TEXT,
                context_title TEXT,
                instruction_text TEXT,
                ai_provider TEXT,
                status TEXT NOT NULL,
                payload TEXT NOT NULL,
                received_at INTEGER NOT NULL,
                processed_at INTEGER,
                execution_time_ms INTEGER,
                response_type TEXT,
                is_progress_response INTEGER NOT NULL DEFAULT 0,
                source_branch TEXT,
                target_branch TEXT,
                webhook_action TEXT,
                author_username TEXT,
                error_message TEXT
            );

            CREATE TABLE IF NOT EXISTS workspaces (
                workspace_id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                project_name TEXT,
                base_branch TEXT,
                checkout_branch TEXT,
                path TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                last_used INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                session_key TEXT NOT NULL,
                provider TEXT NOT NULL,
                session_id TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                last_used INTEGER NOT NULL,
                base_branch TEXT,
                branch_name TEXT,
                merge_request_url TEXT,
                merge_request_iid INTEGER,
                discussion_id TEXT,
                PRIMARY KEY (session_key, provider)
            );
            ",
        )?;
        Ok(())
    }
}
