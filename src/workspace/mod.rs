//! Clones, reuses, and refreshes per-thread git working copies, and commits
//! and pushes resulting changes with rebase recovery on non-fast-forward
//! rejections. See SPEC_FULL.md section 4.3.

mod git;

pub use git::{
    ChangeKind, FileChange, WorkspaceError, classify_file_changes, is_non_fast_forward_error,
    sanitize_workspace_id,
};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::context::TenantContext;
use crate::db::Database;
use crate::locks::KeyedLocks;
use git::{parse_conflicted_paths, run_git, run_git_allow_failure};

pub struct PrepareRequest<'a> {
    pub workspace_id: Option<&'a str>,
    pub project_id: &'a str,
    pub project_name: Option<&'a str>,
    pub base_branch: &'a str,
    pub checkout_branch: &'a str,
    pub http_url: &'a str,
}

pub struct PreparedWorkspace {
    pub workspace_id: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct PushResult {
    pub success: bool,
    pub rebased: bool,
    pub conflicts: Vec<String>,
    pub error: Option<String>,
}

pub struct WorkspaceManager {
    work_dir: PathBuf,
    locks: KeyedLocks,
    db: Arc<Database>,
}

impl WorkspaceManager {
    pub fn new(work_dir: impl Into<PathBuf>, db: Arc<Database>) -> Self {
        Self {
            work_dir: work_dir.into(),
            locks: KeyedLocks::new(),
            db,
        }
    }

    /// Produces a ready-to-use working directory for `req`, serialized per
    /// workspace id via the keyed lock.
    pub async fn prepare(
        &self,
        ctx: &TenantContext,
        req: &PrepareRequest<'_>,
    ) -> Result<PreparedWorkspace, WorkspaceError> {
        let (workspace_id, persist) = match req.workspace_id {
            Some(id) => (sanitize_workspace_id(id), true),
            None => (format!("new-{}", Uuid::new_v4()), false),
        };
        let path = self.work_dir.join(&workspace_id);

        let _guard = self.locks.acquire(&workspace_id).await;

        if req.http_url.is_empty() {
            return Err(WorkspaceError::NoRemoteUrl);
        }
        let auth_url = ctx
            .authenticated_clone_url(req.http_url)
            .map_err(|_| WorkspaceError::NoRemoteUrl)?;

        if !path.exists() {
            self.clone_fresh(&auth_url, &path, req).await?;
        } else {
            self.refresh_existing(&path, req).await?;
        }

        if persist {
            self.db
                .upsert_workspace(
                    &workspace_id,
                    req.project_id,
                    req.project_name,
                    Some(req.base_branch),
                    Some(req.checkout_branch),
                    &path.to_string_lossy(),
                )
                .map_err(|e| WorkspaceError::GitFailed {
                    args: vec!["<metadata upsert>".into()],
                    stderr: e.to_string(),
                })?;
        }

        Ok(PreparedWorkspace { workspace_id, path })
    }

    async fn clone_fresh(
        &self,
        auth_url: &str,
        path: &Path,
        req: &PrepareRequest<'_>,
    ) -> Result<(), WorkspaceError> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        info!(path = %path.display(), base_branch = req.base_branch, "cloning fresh workspace");

        let clone_result = run_git(
            &self.work_dir,
            &[
                "clone",
                "--depth",
                "1",
                "--branch",
                req.base_branch,
                auth_url,
                &path.to_string_lossy(),
            ],
        )
        .await;

        if clone_result.is_err() {
            // The requested base branch doesn't exist on the remote: clone
            // the default branch instead, then create/checkout base_branch.
            warn!(base_branch = req.base_branch, "branch missing on remote, cloning default branch");
            run_git(&self.work_dir, &["clone", "--depth", "1", auth_url, &path.to_string_lossy()]).await?;
            run_git(path, &["checkout", "-B", req.base_branch]).await?;
        }

        run_git(path, &["config", "user.name", "copilot-dispatcher"]).await?;
        run_git(path, &["config", "user.email", "copilot-dispatcher@localhost"]).await?;

        if req.checkout_branch != req.base_branch {
            run_git(path, &["checkout", "-b", req.checkout_branch]).await?;
        }

        Ok(())
    }

    async fn refresh_existing(
        &self,
        path: &Path,
        req: &PrepareRequest<'_>,
    ) -> Result<(), WorkspaceError> {
        run_git(path, &["fetch"]).await?;

        if req.checkout_branch == req.base_branch {
            self.checkout_and_pull(path, req.base_branch).await?;
        } else {
            self.checkout_and_pull(path, req.base_branch).await?;
            self.checkout_branch_from_base_or_origin(path, req.checkout_branch, req.base_branch)
                .await?;
            run_git(path, &["pull"]).await.ok();
        }
        Ok(())
    }

    async fn checkout_and_pull(&self, path: &Path, branch: &str) -> Result<(), WorkspaceError> {
        if run_git(path, &["checkout", branch]).await.is_err() {
            run_git(path, &["checkout", "-b", branch, &format!("origin/{branch}")]).await?;
        }
        run_git(path, &["pull"]).await?;
        Ok(())
    }

    async fn checkout_branch_from_base_or_origin(
        &self,
        path: &Path,
        branch: &str,
        base_branch: &str,
    ) -> Result<(), WorkspaceError> {
        if run_git(path, &["checkout", branch]).await.is_ok() {
            return Ok(());
        }
        if run_git(path, &["checkout", "-b", branch, &format!("origin/{branch}")]).await.is_ok() {
            return Ok(());
        }
        run_git(path, &["checkout", "-b", branch, base_branch]).await?;
        Ok(())
    }

    /// `git add . && git commit && git push`, with rebase recovery on a
    /// non-fast-forward rejection. See SPEC_FULL.md section 4.3.
    pub async fn commit_and_push_changes(
        &self,
        workspace_id: &str,
        path: &Path,
        branch: &str,
        message: &str,
    ) -> Result<PushResult, WorkspaceError> {
        let _guard = self.locks.acquire(workspace_id).await;

        run_git(path, &["add", "."]).await?;
        let status = run_git(path, &["status", "--porcelain"]).await?;
        if status.stdout.trim().is_empty() {
            return Ok(PushResult {
                success: true,
                rebased: false,
                ..Default::default()
            });
        }

        run_git(path, &["commit", "-m", message]).await?;

        let (ok, push_out) = run_git_allow_failure(path, &["push", "-u", "origin", branch]).await?;
        if ok {
            return Ok(PushResult {
                success: true,
                rebased: false,
                ..Default::default()
            });
        }

        if !is_non_fast_forward_error(&push_out.stderr) {
            return Ok(PushResult {
                success: false,
                rebased: false,
                error: Some(push_out.stderr),
                ..Default::default()
            });
        }

        let (rebase_ok, rebase_out) =
            run_git_allow_failure(path, &["pull", "--rebase", "origin", branch]).await?;
        let status_after = run_git(path, &["status", "--porcelain"]).await?;
        let conflicts = parse_conflicted_paths(&status_after.stdout);
        if !conflicts.is_empty() {
            return Ok(PushResult {
                success: false,
                rebased: true,
                conflicts,
                error: Some(rebase_out.stderr),
            });
        }
        if !rebase_ok {
            return Ok(PushResult {
                success: false,
                rebased: true,
                error: Some(rebase_out.stderr),
                ..Default::default()
            });
        }

        let (retry_ok, retry_out) = run_git_allow_failure(path, &["push", "-u", "origin", branch]).await?;
        Ok(PushResult {
            success: retry_ok,
            rebased: true,
            error: (!retry_ok).then_some(retry_out.stderr),
            conflicts: Vec::new(),
        })
    }

    /// Entry point the orchestrator calls after the AI has resolved a
    /// previously reported conflict set.
    pub async fn push_after_conflict_resolution(
        &self,
        workspace_id: &str,
        path: &Path,
        branch: &str,
    ) -> Result<PushResult, WorkspaceError> {
        let _guard = self.locks.acquire(workspace_id).await;

        let status = run_git(path, &["status", "--porcelain"]).await?;
        let remaining_conflicts = parse_conflicted_paths(&status.stdout);
        if !remaining_conflicts.is_empty() {
            return Err(WorkspaceError::Conflicts(remaining_conflicts));
        }

        let rebase_in_progress =
            path.join(".git").join("rebase-merge").exists() || path.join(".git").join("rebase-apply").exists();
        if rebase_in_progress {
            run_git(path, &["rebase", "--continue"]).await?;
        }

        if !status.stdout.trim().is_empty() {
            // Untracked/modified paths outside the resolved conflict set.
            let still_dirty = run_git(path, &["status", "--porcelain"]).await?;
            if !still_dirty.stdout.trim().is_empty() {
                return Err(WorkspaceError::UncommittedChanges);
            }
        }

        let (ok, out) = run_git_allow_failure(path, &["push", "-u", "origin", branch]).await?;
        Ok(PushResult {
            success: ok,
            rebased: true,
            error: (!ok).then_some(out.stderr),
            conflicts: Vec::new(),
        })
    }

    /// File changes detected by `git status --porcelain`, returned even when
    /// no push has happened yet so the orchestrator can decide to commit.
    pub async fn detect_file_changes(&self, path: &Path) -> Result<Vec<FileChange>, WorkspaceError> {
        let status = run_git(path, &["status", "--porcelain"]).await?;
        Ok(git::classify_file_changes(&status.stdout))
    }

    /// Best-effort removal of a workspace's directory and metadata. Failure
    /// is logged, never propagated (SPEC_FULL.md section 4.3).
    pub async fn remove_workspace(&self, workspace_id: &str, path: &Path) {
        if let Err(e) = tokio::fs::remove_dir_all(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, path = %path.display(), "failed to remove workspace directory");
            }
        }
        if let Err(e) = self.db.remove_workspace(workspace_id) {
            warn!(error = %e, workspace_id, "failed to remove workspace metadata");
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }
}
