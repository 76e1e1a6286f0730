use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use super::{Database, StoreError};

/// Metadata for one on-disk git working copy, per SPEC_FULL.md section 3.
#[derive(Debug, Clone)]
pub struct WorkspaceRecord {
    pub workspace_id: String,
    pub project_id: String,
    pub project_name: Option<String>,
    pub base_branch: Option<String>,
    pub checkout_branch: Option<String>,
    pub path: String,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Database {
    /// Inserts a new workspace record, or if one already exists for this
    /// id, stamps `last_used`/`updated_at` while preserving `created_at`.
    pub fn upsert_workspace(
        &self,
        workspace_id: &str,
        project_id: &str,
        project_name: Option<&str>,
        base_branch: Option<&str>,
        checkout_branch: Option<&str>,
        path: &str,
    ) -> Result<(), StoreError> {
        let now = Utc::now().timestamp_millis();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO workspaces
                (workspace_id, project_id, project_name, base_branch, checkout_branch,
                 path, created_at, last_used, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?7,?7)
             ON CONFLICT(workspace_id) DO UPDATE SET
                project_name = excluded.project_name,
                base_branch = excluded.base_branch,
                checkout_branch = excluded.checkout_branch,
                path = excluded.path,
                last_used = excluded.last_used,
                updated_at = excluded.updated_at",
            params![
                workspace_id,
                project_id,
                project_name,
                base_branch,
                checkout_branch,
                path,
                now,
            ],
        )?;
        Ok(())
    }

    pub fn get_workspace(&self, id: &str) -> Result<Option<WorkspaceRecord>, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT workspace_id, project_id, project_name, base_branch, checkout_branch,
                    path, created_at, last_used, updated_at
             FROM workspaces WHERE workspace_id = ?1",
            params![id],
            row_to_workspace,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn remove_workspace(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM workspaces WHERE workspace_id = ?1", params![id])?;
        Ok(())
    }

    /// Workspaces whose `last_used` is older than `cutoff`.
    pub fn find_workspaces_unused_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<WorkspaceRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT workspace_id, project_id, project_name, base_branch, checkout_branch,
                    path, created_at, last_used, updated_at
             FROM workspaces WHERE last_used < ?1",
        )?;
        let rows = stmt
            .query_map(params![cutoff.timestamp_millis()], row_to_workspace)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_all_workspaces(&self) -> Result<Vec<WorkspaceRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT workspace_id, project_id, project_name, base_branch, checkout_branch,
                    path, created_at, last_used, updated_at
             FROM workspaces",
        )?;
        let rows = stmt
            .query_map([], row_to_workspace)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Backdates a workspace's `last_used`, for tests that need a real idle
    /// entry rather than one that merely looks idle under a zero max-idle.
    #[cfg(test)]
    pub fn set_last_used_for_test(&self, id: &str, when: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE workspaces SET last_used = ?1 WHERE workspace_id = ?2",
            params![when.timestamp_millis(), id],
        )?;
        Ok(())
    }
}

fn row_to_workspace(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkspaceRecord> {
    let created_at_ms: i64 = row.get(6)?;
    let last_used_ms: i64 = row.get(7)?;
    let updated_at_ms: i64 = row.get(8)?;
    Ok(WorkspaceRecord {
        workspace_id: row.get(0)?,
        project_id: row.get(1)?,
        project_name: row.get(2)?,
        base_branch: row.get(3)?,
        checkout_branch: row.get(4)?,
        path: row.get(5)?,
        created_at: DateTime::from_timestamp_millis(created_at_ms).unwrap_or_else(Utc::now),
        last_used: DateTime::from_timestamp_millis(last_used_ms).unwrap_or_else(Utc::now),
        updated_at: DateTime::from_timestamp_millis(updated_at_ms).unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn upsert_preserves_created_at_across_reuse() {
        let db = Database::open(":memory:").unwrap();
        db.upsert_workspace("ws1", "42", Some("demo"), Some("main"), Some("main"), "/tmp/ws1")
            .unwrap();
        let first = db.get_workspace("ws1").unwrap().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        db.upsert_workspace("ws1", "42", Some("demo"), Some("main"), Some("main"), "/tmp/ws1")
            .unwrap();
        let second = db.get_workspace("ws1").unwrap().unwrap();

        assert_eq!(first.created_at, second.created_at);
        assert!(second.last_used >= first.last_used);
    }

    #[test]
    fn finds_only_workspaces_older_than_cutoff() {
        let db = Database::open(":memory:").unwrap();
        db.upsert_workspace("old", "1", None, None, None, "/tmp/old").unwrap();
        db.upsert_workspace("new", "1", None, None, None, "/tmp/new").unwrap();

        let cutoff = Utc::now() + ChronoDuration::seconds(5);
        let stale = db.find_workspaces_unused_since(cutoff).unwrap();
        assert_eq!(stale.len(), 2);

        let cutoff_past = Utc::now() - ChronoDuration::seconds(5);
        let stale = db.find_workspaces_unused_since(cutoff_past).unwrap();
        assert!(stale.is_empty());
    }
}
