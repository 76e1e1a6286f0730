//! Ties the classifier, workspace manager, streaming executor, and platform
//! client together for one inbound event. See SPEC_FULL.md section 4.6.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::adapters::{AdapterContext, ProviderAdapter, Scenario};
use crate::classifier::{self, Instruction};
use crate::context::TenantContext;
use crate::db::{Database, EventRecord, EventStatus};
use crate::executor::{ExecuteOptions, ExecutionOutcome, ExecutorError, StreamingExecutor};
use crate::locks::KeyedLocks;
use crate::platform::{PlatformClient, PlatformClientError};
use crate::session::SessionStore;
use crate::workspace::{ChangeKind, PrepareRequest, WorkspaceManager};

pub struct ProcessorDeps {
    pub db: Arc<Database>,
    pub sessions: Arc<SessionStore>,
    pub workspaces: Arc<WorkspaceManager>,
    pub executor: Arc<StreamingExecutor>,
    pub platform: Arc<PlatformClient>,
    pub claude: Arc<dyn ProviderAdapter>,
    pub codex: Arc<dyn ProviderAdapter>,
    pub session_locks: Arc<KeyedLocks>,
}

#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub event_id: String,
    pub project_id: String,
    pub project_name: Option<String>,
    pub default_branch: String,
    pub http_url: String,
    pub kind: EventKind,
    pub raw_payload: String,
}

#[derive(Debug, Clone)]
pub enum EventKind {
    IssueOpened { iid: i64, title: String, description: String },
    IssueUpdated { iid: i64, title: String, description: String },
    MergeRequestOpened { iid: i64, title: String, description: String, source_branch: String },
    MergeRequestReopened { iid: i64, title: String, description: String, source_branch: String },
    MergeRequestUpdated { iid: i64, description: String },
    NoteOnIssue { issue_iid: i64, body: String, discussion_id: Option<String> },
    NoteOnMergeRequest { mr_iid: i64, source_branch: String, body: String, discussion_id: Option<String> },
    Other,
}

/// Where the progress/result comment for one execution is posted.
#[derive(Debug, Clone, Copy)]
enum CommentTarget<'a> {
    Issue { iid: i64 },
    MergeRequest { iid: i64 },
    #[allow(dead_code)]
    Discussion { mr_iid: i64, discussion_id: &'a str },
}

struct CommentUpdate {
    body: String,
    is_final: bool,
}

/// Which thread's notes to pull for continuation context, newest first.
#[derive(Debug, Clone, Copy)]
enum ThreadRef {
    Issue(i64),
    MergeRequest(i64),
}

pub struct EventProcessor {
    deps: ProcessorDeps,
}

impl EventProcessor {
    pub fn new(deps: ProcessorDeps) -> Self {
        Self { deps }
    }

    /// Processes one event end-to-end. Errors are logged and folded into the
    /// event record, never propagated to the webhook handler (SPEC_FULL.md
    /// section 7).
    pub async fn process(&self, ctx: &TenantContext, event: WebhookEvent) {
        let record = EventRecord::received(
            event.event_id.clone(),
            event.project_id.clone(),
            event_kind_label(&event.kind).to_string(),
            event.raw_payload.clone(),
        );
        if let Err(e) = self.deps.db.insert_event(&record) {
            error!(error = %e, event_id = %event.event_id, "failed to persist event record");
        }

        match self.decide_and_run(ctx, &event).await {
            Ok(ran) => {
                if let Err(e) = self.deps.db.mark_processed(&event.event_id, EventStatus::Processed, None) {
                    warn!(error = %e, "failed to mark event processed");
                }
                if !ran {
                    info!(event_id = %event.event_id, "event recorded, no execution triggered");
                }
            }
            Err(e) => {
                error!(error = %e, event_id = %event.event_id, "event processing failed");
                if let Err(store_err) =
                    self.deps.db.mark_processed(&event.event_id, EventStatus::Error, Some(&e.to_string()))
                {
                    warn!(error = %store_err, "failed to mark event errored");
                }
            }
        }
    }

    async fn decide_and_run(&self, ctx: &TenantContext, event: &WebhookEvent) -> Result<bool, ProcessorError> {
        match &event.kind {
            EventKind::IssueOpened { iid, title, description }
            | EventKind::IssueUpdated { iid, title, description } => {
                let Some(instruction) = classifier::classify(description, None) else {
                    return Ok(false);
                };
                self.run_new_session(ctx, event, *iid, title, &instruction).await?;
                Ok(true)
            }
            EventKind::MergeRequestOpened { iid, title, description, source_branch }
            | EventKind::MergeRequestReopened { iid, title, description, source_branch } => {
                let Some(instruction) = classifier::classify(description, None) else {
                    return Ok(false);
                };
                self.run_on_mr_branch(ctx, event, *iid, title, source_branch, &instruction, true)
                    .await?;
                Ok(true)
            }
            EventKind::MergeRequestUpdated { .. } => {
                // Policy: MR update never triggers code review or execution.
                Ok(false)
            }
            EventKind::NoteOnIssue { issue_iid, body, discussion_id } => {
                let key = classifier::session_key(&event.project_id, *issue_iid, discussion_id.as_deref());
                let implicit_provider = self.deps.sessions.peek(&key).map(|s| s.last_provider);
                let Some(instruction) = classifier::classify(body, implicit_provider) else {
                    return Ok(false);
                };
                self.continue_issue_session(ctx, event, &key, *issue_iid, &instruction).await?;
                Ok(true)
            }
            EventKind::NoteOnMergeRequest { mr_iid, source_branch, body, discussion_id } => {
                // Notes on merge requests never continue implicitly.
                let Some(instruction) = classifier::classify(body, None) else {
                    return Ok(false);
                };
                let key = classifier::session_key(&event.project_id, *mr_iid, discussion_id.as_deref());
                self.continue_mr_session(ctx, event, &key, *mr_iid, source_branch, &instruction)
                    .await?;
                Ok(true)
            }
            EventKind::Other => Ok(false),
        }
    }

    async fn run_new_session(
        &self,
        ctx: &TenantContext,
        event: &WebhookEvent,
        thread_iid: i64,
        title: &str,
        instruction: &Instruction,
    ) -> Result<(), ProcessorError> {
        let key = classifier::session_key(&event.project_id, thread_iid, None);
        let _guard = self.deps.session_locks.acquire(&key).await;

        let branch_name = format!(
            "{}-{}-{}",
            instruction.provider.binary_name(),
            timestamp_slug(),
            &Uuid::new_v4().to_string()[..6]
        );

        let req = PrepareRequest {
            workspace_id: Some(&key),
            project_id: &event.project_id,
            project_name: event.project_name.as_deref(),
            base_branch: &event.default_branch,
            checkout_branch: &branch_name,
            http_url: &event.http_url,
        };
        let workspace = self.deps.workspaces.prepare(ctx, &req).await?;

        let target = CommentTarget::Issue { iid: thread_iid };
        let outcome = self
            .run_ai(ctx, event, &key, instruction, title, None, None, target, &workspace.path, None, None)
            .await;

        self.finish_and_push(
            ctx, event, &key, &workspace.workspace_id, &workspace.path, &branch_name, instruction, outcome,
            Some(thread_iid),
        )
        .await
    }

    async fn run_on_mr_branch(
        &self,
        ctx: &TenantContext,
        event: &WebhookEvent,
        mr_iid: i64,
        title: &str,
        source_branch: &str,
        instruction: &Instruction,
        code_review: bool,
    ) -> Result<(), ProcessorError> {
        let key = classifier::session_key(&event.project_id, mr_iid, None);
        let _guard = self.deps.session_locks.acquire(&key).await;

        let req = PrepareRequest {
            workspace_id: Some(&key),
            project_id: &event.project_id,
            project_name: event.project_name.as_deref(),
            base_branch: source_branch,
            checkout_branch: source_branch,
            http_url: &event.http_url,
        };
        let workspace = self.deps.workspaces.prepare(ctx, &req).await?;

        let scenario = code_review.then_some(Scenario::CodeReview);
        let target = CommentTarget::MergeRequest { iid: mr_iid };
        let outcome = self
            .run_ai(ctx, event, &key, instruction, title, scenario, None, target, &workspace.path, Some(mr_iid), None)
            .await;

        self.finish_and_push(
            ctx, event, &key, &workspace.workspace_id, &workspace.path, source_branch, instruction, outcome, None,
        )
        .await
    }

    async fn continue_issue_session(
        &self,
        ctx: &TenantContext,
        event: &WebhookEvent,
        key: &str,
        issue_iid: i64,
        instruction: &Instruction,
    ) -> Result<(), ProcessorError> {
        let _guard = self.deps.session_locks.acquire(key).await;
        let session = self.deps.sessions.get(key);
        let base_branch = session.as_ref().and_then(|s| s.base_branch.clone()).unwrap_or_else(|| event.default_branch.clone());
        let branch = session.as_ref().and_then(|s| s.branch_name.clone()).unwrap_or_else(|| base_branch.clone());
        let resume_id = session
            .as_ref()
            .and_then(|s| s.provider_sessions.get(&crate::session::ProviderKey(instruction.provider)))
            .map(|p| p.session_id.clone());

        let req = PrepareRequest {
            workspace_id: Some(key),
            project_id: &event.project_id,
            project_name: event.project_name.as_deref(),
            base_branch: &base_branch,
            checkout_branch: &branch,
            http_url: &event.http_url,
        };
        let workspace = self.deps.workspaces.prepare(ctx, &req).await?;

        let target = CommentTarget::Issue { iid: issue_iid };
        let outcome = self
            .run_ai(
                ctx, event, key, instruction, "", None, resume_id, target, &workspace.path, None,
                Some(ThreadRef::Issue(issue_iid)),
            )
            .await;

        self.finish_and_push(
            ctx, event, key, &workspace.workspace_id, &workspace.path, &branch, instruction, outcome,
            Some(issue_iid),
        )
        .await
    }

    async fn continue_mr_session(
        &self,
        ctx: &TenantContext,
        event: &WebhookEvent,
        key: &str,
        mr_iid: i64,
        source_branch: &str,
        instruction: &Instruction,
    ) -> Result<(), ProcessorError> {
        let _guard = self.deps.session_locks.acquire(key).await;
        let resume_id = self
            .deps
            .sessions
            .get_provider_session(key, instruction.provider)
            .map(|p| p.session_id);

        let req = PrepareRequest {
            workspace_id: Some(key),
            project_id: &event.project_id,
            project_name: event.project_name.as_deref(),
            base_branch: source_branch,
            checkout_branch: source_branch,
            http_url: &event.http_url,
        };
        let workspace = self.deps.workspaces.prepare(ctx, &req).await?;

        let target = CommentTarget::MergeRequest { iid: mr_iid };
        let outcome = self
            .run_ai(
                ctx, event, key, instruction, "", None, resume_id, target, &workspace.path, Some(mr_iid),
                Some(ThreadRef::MergeRequest(mr_iid)),
            )
            .await;

        self.finish_and_push(
            ctx, event, key, &workspace.workspace_id, &workspace.path, source_branch, instruction, outcome, None,
        )
        .await
    }

    /// Posts the initial progress comment, runs the executor with a
    /// streaming callback that only ever sends into the per-execution
    /// ordering channel (SPEC_FULL.md section 4.6.1), and returns the raw
    /// executor result (or error) for the caller to push and persist.
    #[allow(clippy::too_many_arguments)]
    async fn run_ai(
        &self,
        ctx: &TenantContext,
        event: &WebhookEvent,
        session_key: &str,
        instruction: &Instruction,
        title: &str,
        scenario: Option<Scenario>,
        resume_session_id: Option<String>,
        target: CommentTarget<'_>,
        workdir: &std::path::Path,
        mr_context_iid: Option<i64>,
        thread_notes_of: Option<ThreadRef>,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        let adapter = match instruction.provider {
            crate::config::Provider::Claude => self.deps.claude.clone(),
            crate::config::Provider::Codex => self.deps.codex.clone(),
        };
        tracing::debug!(session_key, provider = adapter.display_name(), "running AI execution");

        let comment_id = match self
            .post_initial_comment(ctx, event, target, "🚀 Starting…")
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                e.log_and_continue("post initial progress comment");
                None
            }
        };

        let (tx, rx) = mpsc::unbounded_channel::<CommentUpdate>();
        let writer_handle = comment_id.map(|id| {
            let platform = self.deps.platform.clone();
            let ctx = ctx.clone();
            let project_id = event.project_id.clone();
            let target = owned_target(target);
            tokio::spawn(drain_comment_updates(platform, ctx, project_id, target, id, rx))
        });

        let tx_progress = tx.clone();
        let on_progress: crate::executor::ProgressCallback = Box::new(move |body, is_final| {
            // The executor's own "final" emission is raw text (success
            // output or error message), not yet templated; forward it as an
            // ordinary progress tick and let the authoritative, templated
            // closing comment be sent below once the outcome is known.
            if !is_final {
                let _ = tx_progress.send(CommentUpdate { body, is_final: false });
            }
        });

        let prompt = self
            .assemble_prompt(ctx, event, instruction, title, mr_context_iid, thread_notes_of)
            .await;

        let adapter_ctx = AdapterContext {
            prompt,
            scenario: scenario.unwrap_or(Scenario::IssueSession),
            resume_session_id: resume_session_id.clone(),
            structured_output: matches!(instruction.provider, crate::config::Provider::Codex),
            anthropic_base_url: None,
            anthropic_auth_token: None,
        };

        let options = ExecuteOptions {
            session_id: resume_session_id.clone(),
            is_new_session: resume_session_id.is_none(),
            ..Default::default()
        };

        let outcome = self.deps.executor.execute(&adapter, workdir, &adapter_ctx, on_progress, options).await;

        let final_body = match &outcome {
            Ok(result) => {
                let table = render_change_table(&result.changes);
                render_final_template(&result.output, &table)
            }
            Err(e) => render_failure_template(&instruction.command, &error_reason(e), &e.to_string()),
        };
        let _ = tx.send(CommentUpdate { body: final_body, is_final: true });
        drop(tx);

        if let Some(handle) = writer_handle {
            let _ = handle.await;
        }

        outcome
    }

    /// Builds the prompt sent to the AI CLI: the triggering message in full
    /// (SPEC_FULL.md section 4.6 "Prompt assembly"), the thread title, an
    /// MR snapshot for merge-request-scoped runs, and prior thread comments
    /// newest-first for continuation runs. Platform lookups are best-effort;
    /// a failed one is dropped from the prompt rather than aborting the run.
    async fn assemble_prompt(
        &self,
        ctx: &TenantContext,
        event: &WebhookEvent,
        instruction: &Instruction,
        title: &str,
        mr_context_iid: Option<i64>,
        thread_notes_of: Option<ThreadRef>,
    ) -> String {
        let mut sections = vec![instruction.full_context.clone()];
        if !title.is_empty() {
            sections.push(format!("Context: {title}"));
        }

        if let Some(mr_iid) = mr_context_iid {
            match self.deps.platform.get_merge_request(ctx, &event.project_id, mr_iid).await {
                Ok(mr) => {
                    let mut snippet = format!(
                        "Merge request !{} ({} -> {}): {}",
                        mr.iid, mr.source_branch, mr.target_branch, mr.title
                    );
                    if let Some(description) = &mr.description {
                        if !description.is_empty() {
                            snippet.push('\n');
                            snippet.push_str(description);
                        }
                    }
                    sections.push(snippet);
                }
                Err(e) => e.log_and_continue("fetch merge request snapshot"),
            }
            match self.deps.platform.get_merge_request_diffs(ctx, &event.project_id, mr_iid).await {
                Ok(diffs) if !diffs.trim().is_empty() => sections.push(format!("Diff:\n{diffs}")),
                Ok(_) => {}
                Err(e) => e.log_and_continue("fetch merge request diffs"),
            }
        }

        if let Some(thread_ref) = thread_notes_of {
            let notes = match thread_ref {
                ThreadRef::Issue(iid) => self.deps.platform.list_issue_notes(ctx, &event.project_id, iid).await,
                ThreadRef::MergeRequest(iid) => {
                    self.deps.platform.list_merge_request_notes(ctx, &event.project_id, iid).await
                }
            };
            match notes {
                Ok(notes) => {
                    let thread = notes
                        .iter()
                        .take(10)
                        .map(|n| format!("- {}", n.body))
                        .collect::<Vec<_>>()
                        .join("\n");
                    if !thread.is_empty() {
                        sections.push(format!("Prior thread comments (newest first):\n{thread}"));
                    }
                }
                Err(e) => e.log_and_continue("fetch thread notes"),
            }
        }

        sections.join("\n\n")
    }

    async fn post_initial_comment(
        &self,
        ctx: &TenantContext,
        event: &WebhookEvent,
        target: CommentTarget<'_>,
        body: &str,
    ) -> Result<i64, PlatformClientError> {
        let note = match target {
            CommentTarget::Issue { iid } => {
                self.deps.platform.create_issue_comment(ctx, &event.project_id, iid, body).await?
            }
            CommentTarget::MergeRequest { iid } => {
                self.deps.platform.create_merge_request_comment(ctx, &event.project_id, iid, body).await?
            }
            CommentTarget::Discussion { mr_iid, discussion_id } => {
                self.deps.platform.reply_to_discussion(ctx, &event.project_id, mr_iid, discussion_id, body).await?
            }
        };
        Ok(note.id)
    }

    /// Commits and pushes the AI's changes, then, for issue-origin runs that
    /// don't already have one, opens the merge request per SPEC_FULL.md
    /// section 4.6's issue-to-MR decision table row. `origin_issue_iid` is
    /// `None` for runs that already operate on an existing merge request.
    #[allow(clippy::too_many_arguments)]
    async fn finish_and_push(
        &self,
        ctx: &TenantContext,
        event: &WebhookEvent,
        session_key: &str,
        workspace_id: &str,
        workspace_path: &std::path::Path,
        branch: &str,
        instruction: &Instruction,
        outcome: Result<ExecutionOutcome, ExecutorError>,
        origin_issue_iid: Option<i64>,
    ) -> Result<(), ProcessorError> {
        match outcome {
            Ok(result) => {
                let push = self
                    .deps
                    .workspaces
                    .commit_and_push_changes(workspace_id, workspace_path, branch, &instruction.command)
                    .await?;
                if !push.success {
                    return Err(ProcessorError::PushFailed {
                        conflicts: push.conflicts,
                        reason: push.error.unwrap_or_default(),
                    });
                }

                let mut opened_mr = None;
                if let Some(issue_iid) = origin_issue_iid {
                    let already_open =
                        self.deps.sessions.peek(session_key).and_then(|s| s.merge_request_iid).is_some();
                    if !already_open {
                        opened_mr = self.open_merge_request_for_issue(ctx, event, branch, issue_iid, instruction).await;
                    }
                }

                if let Some(session_id) = &result.session_id {
                    self.deps.sessions.set(session_key, instruction.provider, session_id, Some(branch), None);
                }
                if let Some((url, iid)) = opened_mr {
                    self.deps.sessions.set_merge_request(session_key, url, iid);
                }
                Ok(())
            }
            Err(e) => Err(ProcessorError::Executor(e)),
        }
    }

    async fn open_merge_request_for_issue(
        &self,
        ctx: &TenantContext,
        event: &WebhookEvent,
        branch: &str,
        issue_iid: i64,
        instruction: &Instruction,
    ) -> Option<(String, i64)> {
        let title = instruction.command.lines().next().unwrap_or(&instruction.command).to_string();
        let description = format!("Closes #{issue_iid}\n\n{}", instruction.full_context);
        match self
            .deps
            .platform
            .create_merge_request(ctx, &event.project_id, branch, &event.default_branch, &title, &description)
            .await
        {
            Ok(mr) => {
                if let Err(e) = self
                    .deps
                    .platform
                    .create_issue_comment(ctx, &event.project_id, issue_iid, &format!("Opened merge request: {}", mr.web_url))
                    .await
                {
                    e.log_and_continue("post merge request link to issue");
                }
                Some((mr.web_url, mr.iid))
            }
            Err(e) => {
                e.log_and_continue("create merge request");
                None
            }
        }
    }
}

fn owned_target(target: CommentTarget<'_>) -> OwnedCommentTarget {
    match target {
        CommentTarget::Issue { iid } => OwnedCommentTarget::Issue { iid },
        CommentTarget::MergeRequest { iid } => OwnedCommentTarget::MergeRequest { iid },
        CommentTarget::Discussion { mr_iid, discussion_id } => {
            OwnedCommentTarget::Discussion { mr_iid, discussion_id: discussion_id.to_string() }
        }
    }
}

enum OwnedCommentTarget {
    Issue { iid: i64 },
    MergeRequest { iid: i64 },
    Discussion { mr_iid: i64, discussion_id: String },
}

/// Single dedicated task that drains one execution's comment-update channel
/// in submission order, so the platform API's own async completion order
/// never reorders edits to the same comment (SPEC_FULL.md section 4.6.1).
async fn drain_comment_updates(
    platform: Arc<PlatformClient>,
    ctx: TenantContext,
    project_id: String,
    target: OwnedCommentTarget,
    comment_id: i64,
    mut rx: mpsc::UnboundedReceiver<CommentUpdate>,
) {
    while let Some(update) = rx.recv().await {
        let body = update.body;
        let result = match &target {
            OwnedCommentTarget::Issue { iid } => {
                platform.update_issue_comment(&ctx, &project_id, *iid, comment_id, &body).await
            }
            OwnedCommentTarget::MergeRequest { iid } => {
                platform.update_merge_request_comment(&ctx, &project_id, *iid, comment_id, &body).await
            }
            OwnedCommentTarget::Discussion { mr_iid, discussion_id } => {
                platform.edit_discussion_note(&ctx, &project_id, *mr_iid, discussion_id, comment_id, &body).await
            }
        };
        if let Err(e) = result {
            e.log_and_continue("update progress comment");
        }
    }
}

/// Renders the success template per SPEC_FULL.md section 4.6: a flattened
/// one-paragraph summary, the file-change table, and the verbatim AI reply.
fn render_final_template(raw_output: &str, change_table: &str) -> String {
    let summary: String = raw_output.lines().map(str::trim).collect::<Vec<_>>().join(" ");
    let table_block = if change_table.is_empty() {
        String::new()
    } else {
        format!("\n{change_table}\n")
    };
    format!(
        "### ✅ 工作完成\n\n{summary}\n{table_block}\n<details>\n<summary>AI 原始回复</summary>\n\n```\n{raw_output}\n```\n</details>"
    )
}

fn error_reason(e: &ExecutorError) -> String {
    match e {
        ExecutorError::BinaryNotFound { .. } => "AI CLI is not installed".to_string(),
        ExecutorError::SpawnFailed(_) => "failed to start the AI CLI".to_string(),
        ExecutorError::Timeout(_) => "execution timed out".to_string(),
        ExecutorError::NonZeroExit { .. } => "AI CLI exited with an error".to_string(),
    }
}

pub fn render_failure_template(instruction_summary: &str, reason: &str, raw_error: &str) -> String {
    format!(
        "### ❌ 工作失败\n\n**指令**: {instruction_summary}\n**原因**: {reason}\n\n```\n{raw_error}\n```"
    )
}

/// Renders the file-change table used inside the success template, per
/// SPEC_FULL.md section 4.6 (`Modified|Created|Deleted` with backtick paths).
pub fn render_change_table(changes: &[crate::workspace::FileChange]) -> String {
    if changes.is_empty() {
        return String::new();
    }
    let mut table = String::from("| Change | Path |\n|---|---|\n");
    for change in changes {
        let kind = match change.kind {
            ChangeKind::Created => "Created",
            ChangeKind::Modified => "Modified",
            ChangeKind::Deleted => "Deleted",
        };
        table.push_str(&format!("| {kind} | `{}` |\n", change.path));
    }
    table
}

fn event_kind_label(kind: &EventKind) -> &'static str {
    match kind {
        EventKind::IssueOpened { .. } | EventKind::IssueUpdated { .. } => "issue",
        EventKind::MergeRequestOpened { .. }
        | EventKind::MergeRequestReopened { .. }
        | EventKind::MergeRequestUpdated { .. } => "merge_request",
        EventKind::NoteOnIssue { .. } | EventKind::NoteOnMergeRequest { .. } => "note",
        EventKind::Other => "other",
    }
}

fn timestamp_slug() -> String {
    chrono::Utc::now().format("%Y%m%dT%H%M%S").to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error(transparent)]
    Workspace(#[from] crate::workspace::WorkspaceError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error(transparent)]
    Store(#[from] crate::db::StoreError),
    #[error("push failed: {reason} (conflicts: {})", conflicts.join(", "))]
    PushFailed { conflicts: Vec<String>, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_template_contains_success_markers_and_raw_block() {
        let body = render_final_template("line one\nline two", "| Change | Path |\n|---|---|\n| Modified | `a.rs` |\n");
        assert!(body.contains("### ✅ 工作完成"));
        assert!(body.contains("AI 原始回复"));
        assert!(body.contains("line one\nline two"));
        assert!(body.contains("`a.rs`"));
    }

    #[test]
    fn failure_template_contains_failure_markers() {
        let body = render_failure_template("add login", "timeout", "process exceeded 20m");
        assert!(body.contains("### ❌ 工作失败"));
        assert!(body.contains("add login"));
        assert!(body.contains("process exceeded 20m"));
    }

    #[test]
    fn change_table_lists_each_change_with_backtick_paths() {
        let changes = vec![
            crate::workspace::FileChange { path: "src/main.rs".into(), kind: ChangeKind::Modified },
            crate::workspace::FileChange { path: "src/new.rs".into(), kind: ChangeKind::Created },
        ];
        let table = render_change_table(&changes);
        assert!(table.contains("`src/main.rs`"));
        assert!(table.contains("Created"));
    }

    #[test]
    fn empty_changes_render_empty_table() {
        assert_eq!(render_change_table(&[]), "");
    }
}
