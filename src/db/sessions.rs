use rusqlite::params;

use super::{Database, StoreError};

/// One `(session_key, provider)` row as persisted for the optional durable
/// session snapshot (SPEC_FULL.md section 9: "optional file-backed snapshot
/// implemented through a two-method interface"). The in-memory session map
/// is the runtime source of truth; this is only a save/restore mechanism.
#[derive(Debug, Clone)]
pub struct SessionSnapshotRow {
    pub session_key: String,
    pub provider: String,
    pub session_id: String,
    pub created_at_ms: i64,
    pub last_used_ms: i64,
    pub base_branch: Option<String>,
    pub branch_name: Option<String>,
    pub merge_request_url: Option<String>,
    pub merge_request_iid: Option<i64>,
    pub discussion_id: Option<String>,
}

impl Database {
    pub fn save_session_snapshot(&self, row: &SessionSnapshotRow) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions
                (session_key, provider, session_id, created_at, last_used,
                 base_branch, branch_name, merge_request_url, merge_request_iid, discussion_id)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
             ON CONFLICT(session_key, provider) DO UPDATE SET
                session_id = excluded.session_id,
                last_used = excluded.last_used,
                base_branch = excluded.base_branch,
                branch_name = excluded.branch_name,
                merge_request_url = excluded.merge_request_url,
                merge_request_iid = excluded.merge_request_iid,
                discussion_id = excluded.discussion_id",
            params![
                row.session_key,
                row.provider,
                row.session_id,
                row.created_at_ms,
                row.last_used_ms,
                row.base_branch,
                row.branch_name,
                row.merge_request_url,
                row.merge_request_iid,
                row.discussion_id,
            ],
        )?;
        Ok(())
    }

    pub fn remove_session_snapshot(
        &self,
        session_key: &str,
        provider: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        match provider {
            Some(p) => conn.execute(
                "DELETE FROM sessions WHERE session_key = ?1 AND provider = ?2",
                params![session_key, p],
            )?,
            None => conn.execute(
                "DELETE FROM sessions WHERE session_key = ?1",
                params![session_key],
            )?,
        };
        Ok(())
    }

    pub fn load_all_session_snapshots(&self) -> Result<Vec<SessionSnapshotRow>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT session_key, provider, session_id, created_at, last_used,
                    base_branch, branch_name, merge_request_url, merge_request_iid, discussion_id
             FROM sessions",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SessionSnapshotRow {
                    session_key: row.get(0)?,
                    provider: row.get(1)?,
                    session_id: row.get(2)?,
                    created_at_ms: row.get(3)?,
                    last_used_ms: row.get(4)?,
                    base_branch: row.get(5)?,
                    branch_name: row.get(6)?,
                    merge_request_url: row.get(7)?,
                    merge_request_iid: row.get(8)?,
                    discussion_id: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
