use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use super::{Database, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Received,
    Processed,
    Error,
}

impl EventStatus {
    fn as_str(self) -> &'static str {
        match self {
            EventStatus::Received => "received",
            EventStatus::Processed => "processed",
            EventStatus::Error => "error",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "processed" => EventStatus::Processed,
            "error" => EventStatus::Error,
            _ => EventStatus::Received,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    Instruction,
    Progress,
    Final,
    Error,
}

impl ResponseType {
    fn as_str(self) -> &'static str {
        match self {
            ResponseType::Instruction => "instruction",
            ResponseType::Progress => "progress",
            ResponseType::Final => "final",
            ResponseType::Error => "error",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "instruction" => Some(ResponseType::Instruction),
            "progress" => Some(ResponseType::Progress),
            "final" => Some(ResponseType::Final),
            "error" => Some(ResponseType::Error),
            _ => None,
        }
    }
}

/// The append-only record of one inbound event, per SPEC_FULL.md section 3.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub id: String,
    pub tenant_id: Option<String>,
    pub config_id: Option<String>,
    pub project_id: String,
    pub project_name: Option<String>,
    pub event_kind: String,
    pub event_context: Option<String>,
    pub context_id: Option<String>,
    pub context_title: Option<String>,
    pub instruction_text: Option<String>,
    pub ai_provider: Option<String>,
    pub status: EventStatus,
    pub payload: String,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub execution_time_ms: Option<i64>,
    pub response_type: Option<ResponseType>,
    pub is_progress_response: bool,
    pub source_branch: Option<String>,
    pub target_branch: Option<String>,
    pub webhook_action: Option<String>,
    pub author_username: Option<String>,
    pub error_message: Option<String>,
}

impl EventRecord {
    /// A new, not-yet-processed event record stamped with `now`.
    pub fn received(id: String, project_id: String, event_kind: String, payload: String) -> Self {
        Self {
            id,
            tenant_id: None,
            config_id: None,
            project_id,
            project_name: None,
            event_kind,
            event_context: None,
            context_id: None,
            context_title: None,
            instruction_text: None,
            ai_provider: None,
            status: EventStatus::Received,
            payload,
            received_at: Utc::now(),
            processed_at: None,
            execution_time_ms: None,
            response_type: None,
            is_progress_response: false,
            source_branch: None,
            target_branch: None,
            webhook_action: None,
            author_username: None,
            error_message: None,
        }
    }
}

impl Database {
    pub fn insert_event(&self, rec: &EventRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO events
                (id, tenant_id, config_id, project_id, project_name, event_kind,
                 event_context, context_id, context_title, instruction_text, ai_provider,
                 status, payload, received_at, processed_at, execution_time_ms,
                 response_type, is_progress_response, source_branch, target_branch,
                 webhook_action, author_username, error_message)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23)",
            params![
                rec.id,
                rec.tenant_id,
                rec.config_id,
                rec.project_id,
                rec.project_name,
                rec.event_kind,
                rec.event_context,
                rec.context_id,
                rec.context_title,
                rec.instruction_text,
                rec.ai_provider,
                rec.status.as_str(),
                rec.payload,
                rec.received_at.timestamp_millis(),
                rec.processed_at.map(|t| t.timestamp_millis()),
                rec.execution_time_ms,
                rec.response_type.map(ResponseType::as_str),
                rec.is_progress_response,
                rec.source_branch,
                rec.target_branch,
                rec.webhook_action,
                rec.author_username,
                rec.error_message,
            ],
        )?;
        Ok(())
    }

    /// Marks an event terminal: `received -> {processed, error}`. Stamps
    /// `processed_at` and derives `execution_time_ms` from `received_at`.
    pub fn mark_processed(
        &self,
        id: &str,
        status: EventStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let received_at_ms: i64 = conn
            .query_row(
                "SELECT received_at FROM events WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StoreError::NotFound)?;

        let now = Utc::now().timestamp_millis();
        conn.execute(
            "UPDATE events SET status = ?1, processed_at = ?2, execution_time_ms = ?3,
                error_message = ?4 WHERE id = ?5",
            params![
                status.as_str(),
                now,
                now - received_at_ms,
                error_message,
                id,
            ],
        )?;
        Ok(())
    }

    pub fn get_event(&self, id: &str) -> Result<Option<EventRecord>, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, tenant_id, config_id, project_id, project_name, event_kind,
                    event_context, context_id, context_title, instruction_text, ai_provider,
                    status, payload, received_at, processed_at, execution_time_ms,
                    response_type, is_progress_response, source_branch, target_branch,
                    webhook_action, author_username, error_message
             FROM events WHERE id = ?1",
            params![id],
            row_to_event,
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// Most recently received events, newest first. Used by the dashboard
    /// and health diagnostics, not by the hot webhook path.
    pub fn list_recent_events(&self, limit: i64) -> Result<Vec<EventRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, config_id, project_id, project_name, event_kind,
                    event_context, context_id, context_title, instruction_text, ai_provider,
                    status, payload, received_at, processed_at, execution_time_ms,
                    response_type, is_progress_response, source_branch, target_branch,
                    webhook_action, author_username, error_message
             FROM events ORDER BY received_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], row_to_event)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRecord> {
    let received_at_ms: i64 = row.get(13)?;
    let processed_at_ms: Option<i64> = row.get(14)?;
    let status: String = row.get(11)?;
    let response_type: Option<String> = row.get(16)?;
    Ok(EventRecord {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        config_id: row.get(2)?,
        project_id: row.get(3)?,
        project_name: row.get(4)?,
        event_kind: row.get(5)?,
        event_context: row.get(6)?,
        context_id: row.get(7)?,
        context_title: row.get(8)?,
        instruction_text: row.get(9)?,
        ai_provider: row.get(10)?,
        status: EventStatus::from_str(&status),
        payload: row.get(12)?,
        received_at: DateTime::from_timestamp_millis(received_at_ms).unwrap_or_else(Utc::now),
        processed_at: processed_at_ms.and_then(DateTime::from_timestamp_millis),
        execution_time_ms: row.get(15)?,
        response_type: response_type.and_then(|s| ResponseType::from_str(&s)),
        is_progress_response: row.get(17)?,
        source_branch: row.get(18)?,
        target_branch: row.get(19)?,
        webhook_action: row.get(20)?,
        author_username: row.get(21)?,
        error_message: row.get(22)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_mark_processed_sets_execution_time() {
        let db = Database::open(":memory:").unwrap();
        let rec = EventRecord::received(
            "evt-1".into(),
            "42".into(),
            "issue".into(),
            "{}".into(),
        );
        db.insert_event(&rec).unwrap();

        db.mark_processed("evt-1", EventStatus::Processed, None).unwrap();

        let fetched = db.get_event("evt-1").unwrap().unwrap();
        assert_eq!(fetched.status, EventStatus::Processed);
        assert!(fetched.processed_at.is_some());
        assert!(fetched.execution_time_ms.unwrap() >= 0);
    }

    #[test]
    fn marking_unknown_event_is_not_found() {
        let db = Database::open(":memory:").unwrap();
        assert!(matches!(
            db.mark_processed("nope", EventStatus::Error, Some("boom")),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn list_recent_events_orders_newest_first() {
        let db = Database::open(":memory:").unwrap();
        db.insert_event(&EventRecord::received("evt-1".into(), "1".into(), "issue".into(), "{}".into()))
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        db.insert_event(&EventRecord::received("evt-2".into(), "1".into(), "issue".into(), "{}".into()))
            .unwrap();

        let rows = db.list_recent_events(10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "evt-2");
        assert_eq!(rows[1].id, "evt-1");
    }
}
