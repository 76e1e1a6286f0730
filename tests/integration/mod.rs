//! End-to-end tests against the webhook receiver, driven in-process over a
//! real TCP socket rather than a live deployment.

use std::sync::Arc;
use std::time::Duration;

use copilot_dispatcher::config::{Config, Provider};
use copilot_dispatcher::crypto::compute_hmac_sha256;
use copilot_dispatcher::db::Database;
use copilot_dispatcher::{build_app_state, build_router};

struct TestServer {
    base_url: String,
    db_path: String,
}

impl TestServer {
    async fn start(webhook_secret: Option<&str>) -> Self {
        let db_path = format!("{}/test-{}.db", std::env::temp_dir().display(), uuid::Uuid::new_v4());
        let work_dir = format!("{}/test-work-{}", std::env::temp_dir().display(), uuid::Uuid::new_v4());

        let config = Config {
            port: 0,
            work_dir,
            database_path: db_path.clone(),
            log_level: None,
            ai_executor: Provider::Claude,
            code_review_executor: Provider::Claude,
            anthropic_base_url: None,
            anthropic_auth_token: None,
            gitlab_base_url: webhook_secret.map(|_| "https://gitlab.example.com".to_string()),
            gitlab_token: webhook_secret.map(|_| "legacy-token".to_string()),
            webhook_secret: webhook_secret.map(str::to_string),
            mongodb_uri: None,
            mongodb_db: None,
            encryption_key: "test-encryption-key-32-bytes-lng".to_string(),
            session_enabled: true,
            session_max_idle_time: Duration::from_secs(86400),
            session_max_sessions: 1000,
            session_cleanup_interval: Duration::from_secs(3600),
            session_store_path: None,
            workspace_max_idle_time: Duration::from_secs(86400),
            workspace_cleanup_interval: Duration::from_secs(3600),
        };

        let state = build_app_state(Arc::new(config)).expect("failed to build app state");
        let app = build_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url: format!("http://{addr}"), db_path }
    }

    fn db(&self) -> Database {
        Database::open(&self.db_path).unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.db_path);
    }
}

fn issue_open_payload() -> serde_json::Value {
    serde_json::json!({
        "object_kind": "issue",
        "project": {
            "id": 42,
            "name": "demo",
            "default_branch": "main",
            "http_url_to_repo": "https://gitlab.example.com/demo.git"
        },
        "object_attributes": {
            "action": "open",
            "iid": 7,
            "title": "Add login",
            "description": "@claude please add jwt login"
        }
    })
}

#[tokio::test]
async fn health_check_reports_status() {
    let server = TestServer::start(Some("shh")).await;
    let resp = reqwest::get(format!("{}/health", server.base_url)).await.unwrap();
    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["session_enabled"], true);
}

#[tokio::test]
async fn accepts_valid_direct_secret_and_creates_event_record() {
    let server = TestServer::start(Some("shh")).await;
    let client = reqwest::Client::new();

    let body = issue_open_payload().to_string();
    let resp = client
        .post(format!("{}/webhook", server.base_url))
        .header("x-gitlab-token", "shh")
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    // The background task persists the event record asynchronously; the
    // AI binary itself is absent in this environment, so it eventually
    // lands on `error`, not `processed` -- what matters here is that
    // exactly one terminal transition happened per SPEC_FULL.md section 8.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let events = server.db().list_recent_events(10).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].project_id, "42");
}

#[tokio::test]
async fn rejects_wrong_direct_secret() {
    let server = TestServer::start(Some("shh")).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/webhook", server.base_url))
        .header("x-gitlab-token", "wrong")
        .body(issue_open_payload().to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn accepts_valid_hmac_signature() {
    let server = TestServer::start(Some("shh")).await;
    let client = reqwest::Client::new();
    let body = issue_open_payload().to_string();
    let sig = compute_hmac_sha256("shh", body.as_bytes());

    let resp = client
        .post(format!("{}/webhook", server.base_url))
        .header("x-hub-signature-256", format!("sha256={sig}"))
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
}

#[tokio::test]
async fn missing_token_without_legacy_fallback_is_bad_request() {
    let server = TestServer::start(None).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/webhook", server.base_url))
        .body(issue_open_payload().to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn merge_request_update_is_accepted_but_not_flagged_as_instruction() {
    let server = TestServer::start(Some("shh")).await;
    let client = reqwest::Client::new();

    let payload = serde_json::json!({
        "object_kind": "merge_request",
        "project": {"id": 1, "default_branch": "main", "http_url_to_repo": "https://gitlab.example.com/x.git"},
        "object_attributes": {"action": "update", "iid": 3, "description": "@claude review"}
    });

    let resp = client
        .post(format!("{}/webhook", server.base_url))
        .header("x-gitlab-token", "shh")
        .body(payload.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let events = server.db().list_recent_events(10).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, copilot_dispatcher::db::EventStatus::Processed);
}
