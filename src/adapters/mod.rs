//! Per-CLI argument construction, env assembly, stdout parsing, and progress
//! extraction for the two supported AI providers. See SPEC_FULL.md section
//! 4.4.

pub mod claude;
pub mod codex;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("malformed adapter output")]
    MalformedOutput,
    #[error("no session id in adapter output")]
    NoSessionId,
}

/// Processing mode selected by the classifier and honored by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    CodeReview,
    IssueSession,
    SpecDoc,
}

/// Everything a provider needs to build its argv/env for one execution.
pub struct AdapterContext {
    pub prompt: String,
    pub scenario: Scenario,
    pub resume_session_id: Option<String>,
    pub structured_output: bool,
    pub anthropic_base_url: Option<String>,
    pub anthropic_auth_token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AdapterResult {
    pub text: String,
    pub session_id: Option<String>,
}

/// Adapter-private mutable scratch created fresh per execution so the trait
/// stays `&self`-only and is trivially shareable across concurrent runs.
#[derive(Debug, Default)]
pub enum ProgressState {
    #[default]
    Empty,
    Claude {
        last_line: String,
    },
    Codex {
        delta_buffer: String,
        session_id: Option<String>,
    },
}

pub trait ProviderAdapter: Send + Sync {
    fn binary_name(&self) -> &'static str;
    fn display_name(&self) -> &'static str;
    fn build_env(&self, ctx: &AdapterContext) -> Vec<(String, String)>;
    fn build_args(&self, ctx: &AdapterContext) -> Vec<String>;
    fn parse_result(&self, stdout: &[u8]) -> AdapterResult;
    fn new_progress_state(&self) -> ProgressState;
    fn extract_progress(&self, chunk: &str, state: &mut ProgressState) -> Option<String>;
}
