//! Inbound webhook receiver: tenant resolution, signature verification, and
//! handing the parsed event off to a background task. See SPEC_FULL.md
//! section 4.1.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapters::ProviderAdapter;
use crate::config::Config;
use crate::context::TenantContext;
use crate::crypto::verify_hmac_sha256;
use crate::db::{Database, StoreError};
use crate::executor::StreamingExecutor;
use crate::locks::KeyedLocks;
use crate::platform::PlatformClient;
use crate::processor::{EventKind, EventProcessor, ProcessorDeps, WebhookEvent};
use crate::session::SessionStore;
use crate::vault::SecretVault;
use crate::workspace::WorkspaceManager;

const TOKEN_HEADER: &str = "x-webhook-token";
const DIRECT_SECRET_HEADER: &str = "x-gitlab-token";
const HMAC_SIGNATURE_HEADER: &str = "x-hub-signature-256";

pub struct AppState {
    pub db: Arc<Database>,
    pub vault: Arc<SecretVault>,
    pub config: Arc<Config>,
    pub processor: Arc<EventProcessor>,
    pub start_time: Instant,
    pub session_enabled: bool,
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("no tenant token supplied and no legacy fallback configured")]
    MissingToken,
    #[error("tenant not found")]
    TenantNotFound,
    #[error("tenant lookup failed: {0}")]
    TenantLookupFailed(#[from] StoreError),
    #[error("invalid signature")]
    InvalidSignature,
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match self {
            WebhookError::MissingToken => StatusCode::BAD_REQUEST,
            WebhookError::TenantNotFound => StatusCode::NOT_FOUND,
            WebhookError::TenantLookupFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            WebhookError::InvalidSignature => StatusCode::UNAUTHORIZED,
        };
        warn!(error = %self, status = %status, "webhook request rejected");
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(serde::Deserialize, Default)]
pub struct TokenQuery {
    token: Option<String>,
}

pub async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    path_token: Option<Path<String>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let request_id = Uuid::new_v4().to_string();

    let ctx = match resolve_tenant(&state, &request_id, path_token.map(|p| p.0), query, &headers, body.as_bytes()) {
        Ok(ctx) => ctx,
        Err(e) => return e.into_response(),
    };

    let payload: Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, request_id, "failed to parse webhook payload as JSON");
            return (StatusCode::OK, Json(serde_json::json!({ "message": "Webhook received" }))).into_response();
        }
    };

    let event = parse_event(&payload, body.clone());

    info!(request_id, tenant_id = %ctx.tenant_id, event_kind = ?event.kind, "webhook accepted, dispatching");

    let processor = state.processor.clone();
    tokio::spawn(async move {
        processor.process(&ctx, event).await;
    });

    (StatusCode::OK, Json(serde_json::json!({ "message": "Webhook received" }))).into_response()
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "session_enabled": state.session_enabled,
    }))
}

fn resolve_tenant(
    state: &AppState,
    request_id: &str,
    path_token: Option<String>,
    query: TokenQuery,
    headers: &HeaderMap,
    raw_body: &[u8],
) -> Result<TenantContext, WebhookError> {
    let header_token = headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok()).map(str::to_string);
    let token_candidate = [path_token, header_token, query.token]
        .into_iter()
        .flatten()
        .find(|t| !t.is_empty());

    let resolved = match &token_candidate {
        Some(token) if token.starts_with("glconfig_") => state
            .db
            .find_tenant_by_opaque_token(&state.vault, token)?
            .ok_or(WebhookError::TenantNotFound)?,
        Some(token) => {
            let by_config = state.db.find_tenant_by_opaque_token(&state.vault, token)?;
            match by_config {
                Some(tenant) => tenant,
                None => state
                    .db
                    .find_config_for_user(&state.vault, token)?
                    .ok_or(WebhookError::TenantNotFound)?,
            }
        }
        None => legacy_tenant(&state.config).ok_or(WebhookError::MissingToken)?,
    };

    verify_signature(headers, raw_body, &resolved.webhook_secret)?;

    Ok(TenantContext {
        tenant_id: resolved.id,
        opaque_token: resolved.opaque_token,
        platform_base_url: resolved.platform_base_url,
        platform_access_token: resolved.platform_access_token,
        config_id: None,
        display_name: resolved.display_name,
        webhook_secret: resolved.webhook_secret,
        request_id: request_id.to_string(),
    })
}

fn legacy_tenant(config: &Config) -> Option<crate::db::TenantRecord> {
    Some(crate::db::TenantRecord {
        id: "legacy".to_string(),
        opaque_token: String::new(),
        platform_base_url: config.gitlab_base_url.clone()?,
        platform_access_token: config.gitlab_token.clone()?,
        webhook_secret: config.webhook_secret.clone()?,
        display_name: Some("legacy".to_string()),
    })
}

fn verify_signature(headers: &HeaderMap, raw_body: &[u8], secret: &str) -> Result<(), WebhookError> {
    if let Some(direct) = headers.get(DIRECT_SECRET_HEADER).and_then(|v| v.to_str().ok()) {
        if direct == secret {
            return Ok(());
        }
    }
    if let Some(sig) = headers.get(HMAC_SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) {
        if verify_hmac_sha256(secret, raw_body, sig) {
            return Ok(());
        }
    }
    Err(WebhookError::InvalidSignature)
}

/// Translates a GitLab-shaped webhook body into a `WebhookEvent`, per
/// SPEC_FULL.md section 4.2's content-source table.
fn parse_event(payload: &Value, raw_payload: String) -> WebhookEvent {
    let project = &payload["project"];
    let project_id = project["id"].as_i64().map(|n| n.to_string()).unwrap_or_default();
    let project_name = project["name"].as_str().map(str::to_string);
    let default_branch = project["default_branch"].as_str().unwrap_or("main").to_string();
    let http_url = project["http_url_to_repo"].as_str().unwrap_or_default().to_string();

    let kind = match payload["object_kind"].as_str().unwrap_or("") {
        "issue" => parse_issue_event(payload),
        "merge_request" => parse_merge_request_event(payload),
        "note" => parse_note_event(payload),
        _ => EventKind::Other,
    };

    WebhookEvent {
        event_id: Uuid::new_v4().to_string(),
        project_id,
        project_name,
        default_branch,
        http_url,
        kind,
        raw_payload,
    }
}

fn parse_issue_event(payload: &Value) -> EventKind {
    let attrs = &payload["object_attributes"];
    let action = attrs["action"].as_str().unwrap_or("");
    let iid = attrs["iid"].as_i64().unwrap_or_default();
    let title = attrs["title"].as_str().unwrap_or_default().to_string();
    let description = attrs["description"].as_str().unwrap_or_default().to_string();
    match action {
        "open" | "reopen" => EventKind::IssueOpened { iid, title, description },
        _ => EventKind::IssueUpdated { iid, title, description },
    }
}

fn parse_merge_request_event(payload: &Value) -> EventKind {
    let attrs = &payload["object_attributes"];
    let action = attrs["action"].as_str().unwrap_or("");
    let iid = attrs["iid"].as_i64().unwrap_or_default();
    let title = attrs["title"].as_str().unwrap_or_default().to_string();
    let description = attrs["description"].as_str().unwrap_or_default().to_string();
    let source_branch = attrs["source_branch"].as_str().unwrap_or_default().to_string();
    match action {
        "open" => EventKind::MergeRequestOpened { iid, title, description, source_branch },
        "reopen" => EventKind::MergeRequestReopened { iid, title, description, source_branch },
        _ => EventKind::MergeRequestUpdated { iid, description },
    }
}

fn parse_note_event(payload: &Value) -> EventKind {
    let attrs = &payload["object_attributes"];
    let body = attrs["note"].as_str().unwrap_or_default().to_string();
    let discussion_id = attrs["discussion_id"].as_str().map(str::to_string);
    let note_type = attrs["noteable_type"].as_str().unwrap_or("");
    match note_type {
        "Issue" => EventKind::NoteOnIssue {
            issue_iid: payload["issue"]["iid"].as_i64().unwrap_or_default(),
            body,
            discussion_id,
        },
        "MergeRequest" => EventKind::NoteOnMergeRequest {
            mr_iid: payload["merge_request"]["iid"].as_i64().unwrap_or_default(),
            source_branch: payload["merge_request"]["source_branch"].as_str().unwrap_or_default().to_string(),
            body,
            discussion_id,
        },
        _ => EventKind::Other,
    }
}

#[allow(clippy::too_many_arguments)]
pub fn build_processor(
    db: Arc<Database>,
    sessions: Arc<SessionStore>,
    workspaces: Arc<WorkspaceManager>,
    executor: Arc<StreamingExecutor>,
    platform: Arc<PlatformClient>,
    claude: Arc<dyn ProviderAdapter>,
    codex: Arc<dyn ProviderAdapter>,
) -> EventProcessor {
    EventProcessor::new(ProcessorDeps {
        db,
        sessions,
        workspaces,
        executor,
        platform,
        claude,
        codex,
        session_locks: Arc::new(KeyedLocks::new()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_issue_open_event() {
        let payload: Value = serde_json::from_str(
            r#"{
                "object_kind": "issue",
                "project": {"id": 42, "name": "demo", "default_branch": "main", "http_url_to_repo": "https://host/demo.git"},
                "object_attributes": {"action": "open", "iid": 7, "title": "Add login", "description": "@claude please add jwt login"}
            }"#,
        )
        .unwrap();
        let event = parse_event(&payload, "{}".to_string());
        assert_eq!(event.project_id, "42");
        assert!(matches!(event.kind, EventKind::IssueOpened { iid: 7, .. }));
    }

    #[test]
    fn parses_note_on_merge_request() {
        let payload: Value = serde_json::from_str(
            r#"{
                "object_kind": "note",
                "project": {"id": 1, "default_branch": "main", "http_url_to_repo": "https://host/x.git"},
                "object_attributes": {"note": "@claude fix", "noteable_type": "MergeRequest"},
                "merge_request": {"iid": 3, "source_branch": "feature-x"}
            }"#,
        )
        .unwrap();
        let event = parse_event(&payload, "{}".to_string());
        assert!(matches!(event.kind, EventKind::NoteOnMergeRequest { mr_iid: 3, .. }));
    }

    #[test]
    fn merge_request_update_never_triggers_review() {
        let payload: Value = serde_json::from_str(
            r#"{
                "object_kind": "merge_request",
                "project": {"id": 1, "default_branch": "main", "http_url_to_repo": "https://host/x.git"},
                "object_attributes": {"action": "update", "iid": 3, "description": "@claude review"}
            }"#,
        )
        .unwrap();
        let event = parse_event(&payload, "{}".to_string());
        assert!(matches!(event.kind, EventKind::MergeRequestUpdated { .. }));
    }

    #[test]
    fn verify_signature_accepts_direct_secret_header() {
        let mut headers = HeaderMap::new();
        headers.insert(DIRECT_SECRET_HEADER, "shh".parse().unwrap());
        assert!(verify_signature(&headers, b"body", "shh").is_ok());
    }

    #[test]
    fn verify_signature_rejects_missing_headers() {
        let headers = HeaderMap::new();
        assert!(matches!(
            verify_signature(&headers, b"body", "shh"),
            Err(WebhookError::InvalidSignature)
        ));
    }
}
