//! In-memory thread-session map with an optional durable snapshot.
//!
//! A session associates a thread (`projectId:threadIid[:discussionId]`) with
//! the AI provider session ids that let follow-up events continue a prior
//! conversation. The map itself is the runtime source of truth; the SQLite
//! snapshot in `db::sessions` is only a save/restore mechanism so sessions
//! survive a restart.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::Provider;
use crate::db::{Database, SessionSnapshotRow, StoreError};

#[derive(Debug, Clone)]
pub struct ProviderSessionInfo {
    pub session_id: String,
    pub last_used: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ThreadSession {
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub last_provider: Provider,
    pub provider_sessions: HashMap<ProviderKey, ProviderSessionInfo>,
    pub base_branch: Option<String>,
    pub branch_name: Option<String>,
    pub merge_request_url: Option<String>,
    pub merge_request_iid: Option<i64>,
    pub discussion_id: Option<String>,
}

/// `Provider` isn't `Hash`/`Eq` by default since it only derives what config
/// deserialization needs; this newtype gives the session map a stable key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProviderKey(pub Provider);

impl ThreadSession {
    fn is_expired(&self, now: DateTime<Utc>, max_idle: chrono::Duration) -> bool {
        now - self.last_used > max_idle
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionStats {
    pub count: usize,
    pub max_sessions: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct CleanupResult {
    pub expired: usize,
    pub remaining: usize,
    pub duration_ms: i64,
}

pub struct SessionStore {
    sessions: Mutex<HashMap<String, ThreadSession>>,
    db: Arc<Database>,
    max_idle: chrono::Duration,
    max_sessions: usize,
}

impl SessionStore {
    pub fn new(db: Arc<Database>, max_idle: std::time::Duration, max_sessions: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            db,
            max_idle: chrono::Duration::from_std(max_idle).unwrap_or(chrono::Duration::zero()),
            max_sessions,
        }
    }

    /// Loads the durable snapshot at startup, reconstructing thread
    /// sessions from their persisted provider rows.
    pub fn load_from_snapshot(&self) -> Result<usize, StoreError> {
        let rows = self.db.load_all_session_snapshots()?;
        let mut sessions = self.sessions.lock();
        for row in rows {
            let provider = match row.provider.as_str() {
                "claude" => Provider::Claude,
                "codex" => Provider::Codex,
                _ => continue,
            };
            let last_used = DateTime::from_timestamp_millis(row.last_used_ms).unwrap_or_else(Utc::now);
            let entry = sessions.entry(row.session_key.clone()).or_insert_with(|| ThreadSession {
                created_at: DateTime::from_timestamp_millis(row.created_at_ms).unwrap_or_else(Utc::now),
                last_used,
                last_provider: provider,
                provider_sessions: HashMap::new(),
                base_branch: row.base_branch.clone(),
                branch_name: row.branch_name.clone(),
                merge_request_url: row.merge_request_url.clone(),
                merge_request_iid: row.merge_request_iid,
                discussion_id: row.discussion_id.clone(),
            });
            entry.provider_sessions.insert(
                ProviderKey(provider),
                ProviderSessionInfo {
                    session_id: row.session_id,
                    last_used,
                },
            );
            if last_used > entry.last_used {
                entry.last_used = last_used;
                entry.last_provider = provider;
            }
        }
        Ok(sessions.len())
    }

    /// Returns the session for `key` if present and not expired.
    pub fn get(&self, key: &str) -> Option<ThreadSession> {
        let now = Utc::now();
        let sessions = self.sessions.lock();
        sessions
            .get(key)
            .filter(|s| !s.is_expired(now, self.max_idle))
            .cloned()
    }

    /// Like `get` but never mutates or evicts; used for read-only checks.
    pub fn peek(&self, key: &str) -> Option<ThreadSession> {
        self.sessions.lock().get(key).cloned()
    }

    pub fn get_provider_session(&self, key: &str, provider: Provider) -> Option<ProviderSessionInfo> {
        self.get(key)
            .and_then(|s| s.provider_sessions.get(&ProviderKey(provider)).cloned())
    }

    /// Records a new or updated session id for `(key, provider)`, updating
    /// `last_provider`/`last_used` and writing through to the snapshot.
    pub fn set(
        &self,
        key: &str,
        provider: Provider,
        session_id: &str,
        branch_name: Option<&str>,
        base_branch: Option<&str>,
    ) {
        let now = Utc::now();
        let mut sessions = self.sessions.lock();
        let over_capacity = sessions.len() >= self.max_sessions && !sessions.contains_key(key);
        if over_capacity {
            warn!(
                max_sessions = self.max_sessions,
                "session store at capacity; accepting new session anyway (eviction is cleanup's job)"
            );
        }
        let entry = sessions.entry(key.to_string()).or_insert_with(|| ThreadSession {
            created_at: now,
            last_used: now,
            last_provider: provider,
            provider_sessions: HashMap::new(),
            base_branch: base_branch.map(str::to_string),
            branch_name: branch_name.map(str::to_string),
            merge_request_url: None,
            merge_request_iid: None,
            discussion_id: None,
        });
        entry.last_used = now;
        entry.last_provider = provider;
        if let Some(b) = branch_name {
            entry.branch_name = Some(b.to_string());
        }
        if let Some(b) = base_branch {
            entry.base_branch = Some(b.to_string());
        }
        entry.provider_sessions.insert(
            ProviderKey(provider),
            ProviderSessionInfo {
                session_id: session_id.to_string(),
                last_used: now,
            },
        );
        let created_at = entry.created_at;
        drop(sessions);

        if let Err(e) = self.db.save_session_snapshot(&SessionSnapshotRow {
            session_key: key.to_string(),
            provider: provider.binary_name().to_string(),
            session_id: session_id.to_string(),
            created_at_ms: created_at.timestamp_millis(),
            last_used_ms: now.timestamp_millis(),
            base_branch: base_branch.map(str::to_string),
            branch_name: branch_name.map(str::to_string),
            merge_request_url: None,
            merge_request_iid: None,
            discussion_id: None,
        }) {
            warn!(error = %e, session_key = key, "failed to persist session snapshot");
        }
    }

    /// Records the merge request opened for this thread, write-through to
    /// the durable snapshot under the session's last-used provider.
    pub fn set_merge_request(&self, key: &str, url: String, iid: i64) {
        let now = Utc::now();
        let mut sessions = self.sessions.lock();
        let Some(entry) = sessions.get_mut(key) else {
            return;
        };
        entry.merge_request_url = Some(url.clone());
        entry.merge_request_iid = Some(iid);
        entry.last_used = now;
        let created_at = entry.created_at;
        let base_branch = entry.base_branch.clone();
        let branch_name = entry.branch_name.clone();
        let last_provider = entry.last_provider;
        let provider_session = entry.provider_sessions.get(&ProviderKey(last_provider)).cloned();
        drop(sessions);

        let Some(provider_session) = provider_session else {
            return;
        };
        if let Err(e) = self.db.save_session_snapshot(&SessionSnapshotRow {
            session_key: key.to_string(),
            provider: last_provider.binary_name().to_string(),
            session_id: provider_session.session_id,
            created_at_ms: created_at.timestamp_millis(),
            last_used_ms: now.timestamp_millis(),
            base_branch,
            branch_name,
            merge_request_url: Some(url),
            merge_request_iid: Some(iid),
            discussion_id: None,
        }) {
            warn!(error = %e, session_key = key, "failed to persist merge request link");
        }
    }

    pub fn remove(&self, key: &str, provider: Option<Provider>) {
        let mut sessions = self.sessions.lock();
        match provider {
            Some(p) => {
                if let Some(s) = sessions.get_mut(key) {
                    s.provider_sessions.remove(&ProviderKey(p));
                    if s.provider_sessions.is_empty() {
                        sessions.remove(key);
                    }
                }
            }
            None => {
                sessions.remove(key);
            }
        }
        drop(sessions);
        let provider_name = provider.map(|p| p.binary_name());
        if let Err(e) = self.db.remove_session_snapshot(key, provider_name) {
            warn!(error = %e, session_key = key, "failed to remove session snapshot");
        }
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            count: self.sessions.lock().len(),
            max_sessions: self.max_sessions,
        }
    }

    pub fn clear_all(&self) {
        self.sessions.lock().clear();
    }

    /// Removes sessions whose `last_used` is older than `max_idle`. Warns if
    /// the sweep runs long or occupancy is high, per SPEC_FULL.md section 4.7.
    pub fn clean_expired(&self) -> CleanupResult {
        let start = Utc::now();
        let now = start;
        let mut expired_keys = Vec::new();
        {
            let sessions = self.sessions.lock();
            for (key, session) in sessions.iter() {
                if session.is_expired(now, self.max_idle) {
                    expired_keys.push(key.clone());
                }
            }
        }
        for key in &expired_keys {
            self.remove(key, None);
        }

        let remaining = self.sessions.lock().len();
        let duration_ms = (Utc::now() - start).num_milliseconds();
        if duration_ms > 5000 {
            warn!(duration_ms, "session cleanup sweep took longer than 5s");
        }
        let occupancy = remaining as f64 / self.max_sessions.max(1) as f64;
        if occupancy > 0.8 {
            warn!(occupancy, remaining, max_sessions = self.max_sessions, "session store occupancy above 80%");
        }
        debug!(expired = expired_keys.len(), remaining, "session cleanup complete");

        CleanupResult {
            expired: expired_keys.len(),
            remaining,
            duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn store() -> SessionStore {
        let db = Arc::new(Database::open(":memory:").unwrap());
        SessionStore::new(db, Duration::from_secs(3600), 100)
    }

    #[test]
    fn set_then_get_round_trips() {
        let s = store();
        s.set("42:7", Provider::Claude, "s1", Some("claude-branch"), Some("main"));
        let session = s.get("42:7").unwrap();
        assert_eq!(session.last_provider, Provider::Claude);
        assert_eq!(
            session.provider_sessions[&ProviderKey(Provider::Claude)].session_id,
            "s1"
        );
    }

    #[test]
    fn last_provider_tracks_most_recent_write() {
        let s = store();
        s.set("42:7", Provider::Claude, "s1", None, None);
        s.set("42:7", Provider::Codex, "s2", None, None);
        let session = s.get("42:7").unwrap();
        assert_eq!(session.last_provider, Provider::Codex);
        assert!(session.provider_sessions.contains_key(&ProviderKey(Provider::Claude)));
        assert!(session.provider_sessions.contains_key(&ProviderKey(Provider::Codex)));
    }

    #[test]
    fn expired_sessions_are_invisible_to_get_but_removable_by_cleanup() {
        let db = Arc::new(Database::open(":memory:").unwrap());
        let s = SessionStore::new(db, Duration::from_millis(1), 100);
        s.set("42:7", Provider::Claude, "s1", None, None);
        std::thread::sleep(Duration::from_millis(20));
        assert!(s.get("42:7").is_none());

        let result = s.clean_expired();
        assert_eq!(result.expired, 1);
        assert_eq!(result.remaining, 0);
    }

    #[test]
    fn cleanup_is_idempotent() {
        let s = store();
        s.set("42:7", Provider::Claude, "s1", None, None);
        let first = s.clean_expired();
        let second = s.clean_expired();
        assert_eq!(first.expired, 0);
        assert_eq!(second.expired, 0);
    }

    #[test]
    fn set_merge_request_updates_entry_and_persists() {
        let db = Arc::new(Database::open(":memory:").unwrap());
        let s = SessionStore::new(db.clone(), Duration::from_secs(3600), 100);
        s.set("42:7", Provider::Claude, "s1", Some("claude-branch"), Some("main"));
        s.set_merge_request("42:7", "https://gitlab.example.com/demo/-/merge_requests/9".into(), 9);

        let session = s.get("42:7").unwrap();
        assert_eq!(session.merge_request_iid, Some(9));
        assert_eq!(session.merge_request_url.as_deref(), Some("https://gitlab.example.com/demo/-/merge_requests/9"));

        let s2 = SessionStore::new(db, Duration::from_secs(3600), 100);
        s2.load_from_snapshot().unwrap();
        let reloaded = s2.get("42:7").unwrap();
        assert_eq!(reloaded.merge_request_iid, Some(9));
    }

    #[test]
    fn remove_one_provider_keeps_others() {
        let s = store();
        s.set("42:7", Provider::Claude, "s1", None, None);
        s.set("42:7", Provider::Codex, "s2", None, None);
        s.remove("42:7", Some(Provider::Claude));
        let session = s.peek("42:7").unwrap();
        assert!(!session.provider_sessions.contains_key(&ProviderKey(Provider::Claude)));
        assert!(session.provider_sessions.contains_key(&ProviderKey(Provider::Codex)));
    }

    #[test]
    fn snapshot_round_trips_across_a_new_store_instance() {
        let db = Arc::new(Database::open(":memory:").unwrap());
        {
            let s = SessionStore::new(db.clone(), Duration::from_secs(3600), 100);
            s.set("42:7", Provider::Claude, "s1", Some("branch"), Some("main"));
        }
        let s2 = SessionStore::new(db, Duration::from_secs(3600), 100);
        s2.load_from_snapshot().unwrap();
        let session = s2.get("42:7").unwrap();
        assert_eq!(
            session.provider_sessions[&ProviderKey(Provider::Claude)].session_id,
            "s1"
        );
    }
}
