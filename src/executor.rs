//! Spawns an AI CLI as a streaming subprocess, drives progress callbacks,
//! enforces a wall-clock timeout, and reports file changes. See SPEC_FULL.md
//! section 4.5.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use crate::adapters::{AdapterContext, ProviderAdapter};
use crate::workspace::{FileChange, classify_file_changes};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20 * 60);
const TICK_INTERVAL: Duration = Duration::from_secs(2);
const PROGRESS_FLUSH_BYTES: usize = 500;
const ERROR_TAIL_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("{binary} is not available: {reason}")]
    BinaryNotFound { binary: String, reason: String },
    #[error("failed to spawn child process: {0}")]
    SpawnFailed(#[from] std::io::Error),
    #[error("execution timed out after {0:?}")]
    Timeout(Duration),
    #[error("process exited with code {code:?}: {message}")]
    NonZeroExit { code: Option<i32>, message: String },
}

pub struct ExecuteOptions {
    pub session_id: Option<String>,
    pub is_new_session: bool,
    pub timeout: Duration,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            session_id: None,
            is_new_session: true,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

pub struct ExecutionOutcome {
    pub success: bool,
    pub output: String,
    pub session_id: Option<String>,
    pub changes: Vec<FileChange>,
    pub error: Option<String>,
}

/// Invoked on every progress tick and on the terminal state; never touches
/// the platform API directly (see SPEC_FULL.md section 4.6.1 for why comment
/// writes are ordered through a separate channel).
pub type ProgressCallback = Box<dyn FnMut(String, bool) + Send>;

pub struct StreamingExecutor;

impl StreamingExecutor {
    pub async fn execute(
        &self,
        adapter: &Arc<dyn ProviderAdapter>,
        workdir: &Path,
        ctx: &AdapterContext,
        mut on_progress: ProgressCallback,
        options: ExecuteOptions,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        self.assert_binary_available(adapter.binary_name()).await?;
        on_progress("🚀 Starting up… analyzing request".to_string(), false);

        let args = adapter.build_args(ctx);
        let env = adapter.build_env(ctx);

        let mut command = Command::new(adapter.binary_name());
        command
            .current_dir(workdir)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &env {
            command.env(key, value);
        }

        let mut child = command.spawn()?;
        let mut stdout = BufReader::new(child.stdout.take().expect("stdout piped"));
        let mut stderr = BufReader::new(child.stderr.take().expect("stderr piped"));

        let mut progress_state = adapter.new_progress_state();
        let mut stdout_buf = Vec::new();
        let mut progress_chunk = String::new();
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.tick().await;
        let deadline = tokio::time::sleep(options.timeout);
        tokio::pin!(deadline);

        let mut stdout_line = String::new();
        let mut stderr_line = String::new();
        let mut stdout_done = false;
        let mut stderr_done = false;

        let exit_status = loop {
            if stdout_done && stderr_done {
                break child.wait().await?;
            }
            tokio::select! {
                _ = &mut deadline => {
                    warn!(binary = adapter.binary_name(), "execution timed out, sending SIGTERM");
                    terminate(&mut child);
                    return Err(ExecutorError::Timeout(options.timeout));
                }
                _ = ticker.tick(), if !progress_chunk.is_empty() => {
                    flush_progress(adapter.as_ref(), &progress_chunk, &mut progress_state, &mut on_progress);
                    progress_chunk.clear();
                }
                n = stdout.read_line(&mut stdout_line), if !stdout_done => {
                    match n? {
                        0 => stdout_done = true,
                        _ => {
                            stdout_buf.extend_from_slice(stdout_line.as_bytes());
                            progress_chunk.push_str(&stdout_line);
                            stdout_line.clear();
                            if progress_chunk.len() >= PROGRESS_FLUSH_BYTES {
                                flush_progress(adapter.as_ref(), &progress_chunk, &mut progress_state, &mut on_progress);
                                progress_chunk.clear();
                            }
                        }
                    }
                }
                n = stderr.read_line(&mut stderr_line), if !stderr_done => {
                    match n? {
                        0 => stderr_done = true,
                        _ => {
                            let line = stderr_line.trim_end();
                            if !line.is_empty() {
                                on_progress(format!("⚠️ {line}"), false);
                            }
                            stderr_line.clear();
                        }
                    }
                }
            }
        };

        if !progress_chunk.is_empty() {
            flush_progress(adapter.as_ref(), &progress_chunk, &mut progress_state, &mut on_progress);
        }

        let changes = detect_file_changes(workdir).await.unwrap_or_default();

        if exit_status.success() {
            let parsed = adapter.parse_result(&stdout_buf);
            let session_id = parsed.session_id.or_else(|| options.session_id.clone());
            on_progress(parsed.text.clone(), true);
            Ok(ExecutionOutcome {
                success: true,
                output: parsed.text,
                session_id,
                changes,
                error: None,
            })
        } else {
            let mut stderr_tail = String::new();
            // stderr already forwarded line by line; reconstruct what we can
            // from the last progress chunk as a best-effort error summary.
            stderr_tail.push_str(stderr_line.trim());
            let message = derive_error_message(&stderr_tail, &stdout_buf);
            on_progress(format!("❌ {message}"), true);
            Err(ExecutorError::NonZeroExit {
                code: exit_status.code(),
                message,
            })
        }
    }

    async fn assert_binary_available(&self, binary: &str) -> Result<(), ExecutorError> {
        let result = Command::new(binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match result {
            Ok(status) if status.success() => {
                info!(binary, "CLI binary available");
                Ok(())
            }
            Ok(status) => Err(ExecutorError::BinaryNotFound {
                binary: binary.to_string(),
                reason: format!("exited with {status}"),
            }),
            Err(e) => Err(ExecutorError::BinaryNotFound {
                binary: binary.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

fn flush_progress(
    adapter: &dyn ProviderAdapter,
    chunk: &str,
    state: &mut crate::adapters::ProgressState,
    on_progress: &mut ProgressCallback,
) {
    if let Some(msg) = adapter.extract_progress(chunk, state) {
        on_progress(msg, false);
    }
}

fn derive_error_message(stderr_tail: &str, stdout: &[u8]) -> String {
    if !stderr_tail.trim().is_empty() {
        return stderr_tail.trim().to_string();
    }
    let stdout_text = String::from_utf8_lossy(stdout);
    if let Some(line) = stdout_text.lines().rev().find(|l| l.to_ascii_lowercase().contains("error")) {
        return line.trim().to_string();
    }
    let tail: String = stdout_text.chars().rev().take(ERROR_TAIL_CHARS).collect();
    tail.chars().rev().collect()
}

fn terminate(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let pid = nix::unistd::Pid::from_raw(pid as i32);
            if nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM).is_ok() {
                return;
            }
        }
    }
    warn!("falling back to SIGKILL via start_kill");
    let _ = child.start_kill();
}

async fn detect_file_changes(workdir: &Path) -> Result<Vec<FileChange>, std::io::Error> {
    let output = Command::new("git")
        .current_dir(workdir)
        .args(["status", "--porcelain"])
        .output()
        .await?;
    let mut stdout = String::new();
    let mut reader = BufReader::new(output.stdout.as_slice());
    reader.read_to_string(&mut stdout).await?;
    Ok(classify_file_changes(&stdout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_error_message_prefers_stderr() {
        assert_eq!(derive_error_message("boom", b"irrelevant"), "boom");
    }

    #[test]
    fn derive_error_message_falls_back_to_error_keyword_line() {
        let stdout = b"ok\nError: something broke\nmore ok";
        assert_eq!(derive_error_message("", stdout), "Error: something broke");
    }

    #[test]
    fn derive_error_message_falls_back_to_tail() {
        let stdout = "x".repeat(600);
        let message = derive_error_message("", stdout.as_bytes());
        assert_eq!(message.len(), ERROR_TAIL_CHARS);
    }
}
