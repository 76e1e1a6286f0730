//! Thin request layer over the source-control platform's REST API: issue and
//! merge-request comments, discussion threads, branches, and diffs. See
//! SPEC_FULL.md section 6.

mod models;

pub use models::{DiscussionNote, InlinePosition, MergeRequestDetails};

use reqwest::Client;
use tracing::{debug, error, warn};

use crate::context::TenantContext;

pub struct PlatformClient {
    http: Client,
}

impl Default for PlatformClient {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformClient {
    pub fn new() -> Self {
        Self { http: Client::new() }
    }

    fn api_url(&self, ctx: &TenantContext, path: &str) -> String {
        format!("{}/api/v4{}", ctx.platform_base_url.trim_end_matches('/'), path)
    }

    fn authed(&self, ctx: &TenantContext, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("PRIVATE-TOKEN", &ctx.platform_access_token)
    }

    pub async fn create_issue_comment(
        &self,
        ctx: &TenantContext,
        project_id: &str,
        issue_iid: i64,
        body: &str,
    ) -> Result<DiscussionNote, PlatformClientError> {
        let url = self.api_url(ctx, &format!("/projects/{project_id}/issues/{issue_iid}/notes"));
        self.post_note(ctx, &url, body).await
    }

    pub async fn update_issue_comment(
        &self,
        ctx: &TenantContext,
        project_id: &str,
        issue_iid: i64,
        note_id: i64,
        body: &str,
    ) -> Result<(), PlatformClientError> {
        let url = self.api_url(
            ctx,
            &format!("/projects/{project_id}/issues/{issue_iid}/notes/{note_id}"),
        );
        self.put_body(ctx, &url, body).await
    }

    pub async fn create_merge_request_comment(
        &self,
        ctx: &TenantContext,
        project_id: &str,
        mr_iid: i64,
        body: &str,
    ) -> Result<DiscussionNote, PlatformClientError> {
        let url = self.api_url(ctx, &format!("/projects/{project_id}/merge_requests/{mr_iid}/notes"));
        self.post_note(ctx, &url, body).await
    }

    pub async fn update_merge_request_comment(
        &self,
        ctx: &TenantContext,
        project_id: &str,
        mr_iid: i64,
        note_id: i64,
        body: &str,
    ) -> Result<(), PlatformClientError> {
        let url = self.api_url(
            ctx,
            &format!("/projects/{project_id}/merge_requests/{mr_iid}/notes/{note_id}"),
        );
        self.put_body(ctx, &url, body).await
    }

    pub async fn reply_to_discussion(
        &self,
        ctx: &TenantContext,
        project_id: &str,
        mr_iid: i64,
        discussion_id: &str,
        body: &str,
    ) -> Result<DiscussionNote, PlatformClientError> {
        let url = self.api_url(
            ctx,
            &format!("/projects/{project_id}/merge_requests/{mr_iid}/discussions/{discussion_id}/notes"),
        );
        self.post_note(ctx, &url, body).await
    }

    pub async fn edit_discussion_note(
        &self,
        ctx: &TenantContext,
        project_id: &str,
        mr_iid: i64,
        discussion_id: &str,
        note_id: i64,
        body: &str,
    ) -> Result<(), PlatformClientError> {
        let url = self.api_url(
            ctx,
            &format!(
                "/projects/{project_id}/merge_requests/{mr_iid}/discussions/{discussion_id}/notes/{note_id}"
            ),
        );
        self.put_body(ctx, &url, body).await
    }

    pub async fn resolve_discussion(
        &self,
        ctx: &TenantContext,
        project_id: &str,
        mr_iid: i64,
        discussion_id: &str,
    ) -> Result<(), PlatformClientError> {
        let url = self.api_url(
            ctx,
            &format!("/projects/{project_id}/merge_requests/{mr_iid}/discussions/{discussion_id}"),
        );
        let response = self
            .authed(ctx, self.http.put(&url))
            .form(&[("resolved", "true")])
            .send()
            .await
            .map_err(PlatformClientError::RequestFailed)?;
        self.check_status(response).await.map(|_| ())
    }

    pub async fn edit_issue(
        &self,
        ctx: &TenantContext,
        project_id: &str,
        issue_iid: i64,
        title: Option<&str>,
        description: Option<&str>,
    ) -> Result<(), PlatformClientError> {
        let url = self.api_url(ctx, &format!("/projects/{project_id}/issues/{issue_iid}"));
        self.put_title_description(ctx, &url, title, description).await
    }

    pub async fn edit_merge_request(
        &self,
        ctx: &TenantContext,
        project_id: &str,
        mr_iid: i64,
        title: Option<&str>,
        description: Option<&str>,
    ) -> Result<(), PlatformClientError> {
        let url = self.api_url(ctx, &format!("/projects/{project_id}/merge_requests/{mr_iid}"));
        self.put_title_description(ctx, &url, title, description).await
    }

    pub async fn list_branches(
        &self,
        ctx: &TenantContext,
        project_id: &str,
    ) -> Result<Vec<String>, PlatformClientError> {
        let url = self.api_url(ctx, &format!("/projects/{project_id}/repository/branches"));
        let response = self
            .authed(ctx, self.http.get(&url))
            .send()
            .await
            .map_err(PlatformClientError::RequestFailed)?;
        let body = self.check_status(response).await?;
        let raw: Vec<models::BranchSummary> =
            serde_json::from_str(&body).map_err(PlatformClientError::ParseError)?;
        Ok(raw.into_iter().map(|b| b.name).collect())
    }

    pub async fn create_branch(
        &self,
        ctx: &TenantContext,
        project_id: &str,
        branch: &str,
        from: &str,
    ) -> Result<(), PlatformClientError> {
        let url = self.api_url(ctx, &format!("/projects/{project_id}/repository/branches"));
        let response = self
            .authed(ctx, self.http.post(&url))
            .query(&[("branch", branch), ("ref", from)])
            .send()
            .await
            .map_err(PlatformClientError::RequestFailed)?;
        self.check_status(response).await.map(|_| ())
    }

    /// Opens a merge request for `source_branch` against `target_branch`,
    /// per SPEC_FULL.md section 4.6's issue-to-MR decision table row.
    pub async fn create_merge_request(
        &self,
        ctx: &TenantContext,
        project_id: &str,
        source_branch: &str,
        target_branch: &str,
        title: &str,
        description: &str,
    ) -> Result<MergeRequestDetails, PlatformClientError> {
        let url = self.api_url(ctx, &format!("/projects/{project_id}/merge_requests"));
        let response = self
            .authed(ctx, self.http.post(&url))
            .form(&[
                ("source_branch", source_branch),
                ("target_branch", target_branch),
                ("title", title),
                ("description", description),
            ])
            .send()
            .await
            .map_err(PlatformClientError::RequestFailed)?;
        let body = self.check_status(response).await?;
        serde_json::from_str(&body).map_err(PlatformClientError::ParseError)
    }

    /// An issue's notes, newest first, used to assemble thread context for a
    /// continuation run.
    pub async fn list_issue_notes(
        &self,
        ctx: &TenantContext,
        project_id: &str,
        issue_iid: i64,
    ) -> Result<Vec<DiscussionNote>, PlatformClientError> {
        let url = self.api_url(ctx, &format!("/projects/{project_id}/issues/{issue_iid}/notes"));
        self.list_notes(ctx, &url).await
    }

    /// A merge request's notes, newest first, used to assemble thread context
    /// for a continuation run.
    pub async fn list_merge_request_notes(
        &self,
        ctx: &TenantContext,
        project_id: &str,
        mr_iid: i64,
    ) -> Result<Vec<DiscussionNote>, PlatformClientError> {
        let url = self.api_url(ctx, &format!("/projects/{project_id}/merge_requests/{mr_iid}/notes"));
        self.list_notes(ctx, &url).await
    }

    async fn list_notes(&self, ctx: &TenantContext, url: &str) -> Result<Vec<DiscussionNote>, PlatformClientError> {
        let response = self
            .authed(ctx, self.http.get(url))
            .query(&[("order_by", "created_at"), ("sort", "desc")])
            .send()
            .await
            .map_err(PlatformClientError::RequestFailed)?;
        let body = self.check_status(response).await?;
        serde_json::from_str(&body).map_err(PlatformClientError::ParseError)
    }

    pub async fn get_merge_request(
        &self,
        ctx: &TenantContext,
        project_id: &str,
        mr_iid: i64,
    ) -> Result<MergeRequestDetails, PlatformClientError> {
        let url = self.api_url(ctx, &format!("/projects/{project_id}/merge_requests/{mr_iid}"));
        let response = self
            .authed(ctx, self.http.get(&url))
            .send()
            .await
            .map_err(PlatformClientError::RequestFailed)?;
        let body = self.check_status(response).await?;
        serde_json::from_str(&body).map_err(PlatformClientError::ParseError)
    }

    pub async fn get_merge_request_diffs(
        &self,
        ctx: &TenantContext,
        project_id: &str,
        mr_iid: i64,
    ) -> Result<String, PlatformClientError> {
        let url = self.api_url(ctx, &format!("/projects/{project_id}/merge_requests/{mr_iid}/diffs"));
        let response = self
            .authed(ctx, self.http.get(&url))
            .send()
            .await
            .map_err(PlatformClientError::RequestFailed)?;
        self.check_status(response).await
    }

    pub async fn create_inline_comment(
        &self,
        ctx: &TenantContext,
        project_id: &str,
        mr_iid: i64,
        body: &str,
        position: &InlinePosition,
    ) -> Result<DiscussionNote, PlatformClientError> {
        let url = self.api_url(ctx, &format!("/projects/{project_id}/merge_requests/{mr_iid}/discussions"));
        let payload = serde_json::json!({
            "body": body,
            "position": position,
        });
        let response = self
            .authed(ctx, self.http.post(&url))
            .json(&payload)
            .send()
            .await
            .map_err(PlatformClientError::RequestFailed)?;
        let body = self.check_status(response).await?;
        serde_json::from_str(&body).map_err(PlatformClientError::ParseError)
    }

    async fn post_note(
        &self,
        ctx: &TenantContext,
        url: &str,
        body: &str,
    ) -> Result<DiscussionNote, PlatformClientError> {
        debug!(url, "posting platform comment");
        let response = self
            .authed(ctx, self.http.post(url))
            .form(&[("body", body)])
            .send()
            .await
            .map_err(PlatformClientError::RequestFailed)?;
        let raw = self.check_status(response).await?;
        serde_json::from_str(&raw).map_err(PlatformClientError::ParseError)
    }

    async fn put_body(&self, ctx: &TenantContext, url: &str, body: &str) -> Result<(), PlatformClientError> {
        let response = self
            .authed(ctx, self.http.put(url))
            .form(&[("body", body)])
            .send()
            .await
            .map_err(PlatformClientError::RequestFailed)?;
        self.check_status(response).await.map(|_| ())
    }

    async fn put_title_description(
        &self,
        ctx: &TenantContext,
        url: &str,
        title: Option<&str>,
        description: Option<&str>,
    ) -> Result<(), PlatformClientError> {
        let mut form = Vec::new();
        if let Some(t) = title {
            form.push(("title", t));
        }
        if let Some(d) = description {
            form.push(("description", d));
        }
        let response = self
            .authed(ctx, self.http.put(url))
            .form(&form)
            .send()
            .await
            .map_err(PlatformClientError::RequestFailed)?;
        self.check_status(response).await.map(|_| ())
    }

    /// Maps a non-2xx response to `ApiError`, else returns the raw body text.
    async fn check_status(&self, response: reqwest::Response) -> Result<String, PlatformClientError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "platform API returned error");
            return Err(PlatformClientError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        response.text().await.map_err(PlatformClientError::RequestFailed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlatformClientError {
    #[error("request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("API error (status {status}): {body}")]
    ApiError { status: u16, body: String },
    #[error("failed to parse response: {0}")]
    ParseError(#[from] serde_json::Error),
}

impl PlatformClientError {
    /// Progress-comment failures must never abort execution (SPEC_FULL.md
    /// section 7); callers that merely want to log-and-continue use this.
    pub fn log_and_continue(&self, context: &str) {
        warn!(error = %self, context, "platform API call failed, continuing");
    }
}
