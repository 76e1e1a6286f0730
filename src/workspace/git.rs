//! Low-level git subprocess helper and pure parsing functions, kept separate
//! from `WorkspaceManager` so the parsing logic is unit-testable without
//! spawning a real `git` process.

use std::path::Path;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("git {args:?} failed: {stderr}")]
    GitFailed { args: Vec<String>, stderr: String },
    #[error("event payload has no http(s) repository URL")]
    NoRemoteUrl,
    #[error("rebase left conflicted paths: {0:?}")]
    Conflicts(Vec<String>),
    #[error("uncommitted changes remain; cannot push")]
    UncommittedChanges,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs `git <args>` in `path`, pinning the message locale so the
/// string-based non-fast-forward match in `is_non_fast_forward_error` stays
/// reliable regardless of the host's locale configuration.
pub async fn run_git(path: &Path, args: &[&str]) -> Result<GitOutput, WorkspaceError> {
    debug!(?args, path = %path.display(), "running git");
    let output = Command::new("git")
        .current_dir(path)
        .env("LC_ALL", "C")
        .args(args)
        .output()
        .await?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        return Err(WorkspaceError::GitFailed {
            args: args.iter().map(|s| s.to_string()).collect(),
            stderr,
        });
    }

    Ok(GitOutput { stdout, stderr })
}

/// Same as `run_git` but does not treat a non-zero exit as an error; the
/// caller inspects `GitOutput` plus the exit success flag itself. Used by
/// push, where failure is expected and handled rather than propagated.
pub async fn run_git_allow_failure(
    path: &Path,
    args: &[&str],
) -> Result<(bool, GitOutput), WorkspaceError> {
    let output = Command::new("git")
        .current_dir(path)
        .env("LC_ALL", "C")
        .args(args)
        .output()
        .await?;
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    Ok((output.status.success(), GitOutput { stdout, stderr }))
}

const NON_FAST_FORWARD_MARKERS: &[&str] = &[
    "non-fast-forward",
    "fetch first",
    "fetch the latest changes",
    "failed to push some refs",
    "tip of your current branch",
];

/// Case-insensitive substring match against the known non-fast-forward push
/// rejection phrasings used by git's CLI output.
pub fn is_non_fast_forward_error(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    NON_FAST_FORWARD_MARKERS.iter().any(|m| lower.contains(m))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    pub kind: ChangeKind,
}

/// Classifies `git status --porcelain` lines into created/modified/deleted.
pub fn classify_file_changes(porcelain: &str) -> Vec<FileChange> {
    porcelain
        .lines()
        .filter(|l| !l.is_empty())
        .filter_map(|line| {
            if line.len() < 3 {
                return None;
            }
            let (status, rest) = line.split_at(2);
            let path = rest.trim_start().to_string();
            let kind = if status.contains("??") {
                ChangeKind::Created
            } else if status.contains('D') {
                ChangeKind::Deleted
            } else {
                ChangeKind::Modified
            };
            Some(FileChange { path, kind })
        })
        .collect()
}

/// Paths still marked conflicted (`UU`, `AA`, `DD`, or any status containing
/// `U`) in a `git status --porcelain` listing.
pub fn parse_conflicted_paths(porcelain: &str) -> Vec<String> {
    porcelain
        .lines()
        .filter(|l| !l.is_empty())
        .filter_map(|line| {
            if line.len() < 3 {
                return None;
            }
            let (status, rest) = line.split_at(2);
            let is_conflicted =
                matches!(status, "UU" | "AA" | "DD") || status.contains('U');
            is_conflicted.then(|| rest.trim_start().to_string())
        })
        .collect()
}

/// Replaces any character outside `[A-Za-z0-9._/-]` with `_`. Idempotent.
pub fn sanitize_workspace_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_all_documented_non_fast_forward_phrasings() {
        for marker in NON_FAST_FORWARD_MARKERS {
            let msg = format!("! [rejected] main -> main ({marker})");
            assert!(is_non_fast_forward_error(&msg), "should match {marker:?}");
        }
        assert!(!is_non_fast_forward_error("fatal: repository not found"));
    }

    #[test]
    fn classifies_status_porcelain_lines() {
        let porcelain = "?? new_file.rs\n D deleted_file.rs\nM  modified_file.rs\n";
        let changes = classify_file_changes(porcelain);
        assert_eq!(changes.len(), 3);
        assert_eq!(changes[0].kind, ChangeKind::Created);
        assert_eq!(changes[1].kind, ChangeKind::Deleted);
        assert_eq!(changes[2].kind, ChangeKind::Modified);
    }

    #[test]
    fn parses_conflicted_paths() {
        let porcelain = "UU conflict.rs\nM  clean.rs\nAA both_added.rs\n";
        let conflicts = parse_conflicted_paths(porcelain);
        assert_eq!(conflicts, vec!["conflict.rs".to_string(), "both_added.rs".to_string()]);
    }

    #[test]
    fn sanitize_replaces_disallowed_characters_and_is_idempotent() {
        let sanitized = sanitize_workspace_id("feature branch#42!");
        assert_eq!(sanitized, "feature_branch_42_");
        assert_eq!(sanitize_workspace_id(&sanitized), sanitized);
    }

    #[test]
    fn sanitize_keeps_allowed_characters() {
        let id = "group/repo.name-v2_final";
        assert_eq!(sanitize_workspace_id(id), id);
    }
}
