use serde_json::Value;

use super::{AdapterContext, AdapterResult, ProgressState, ProviderAdapter, Scenario};

const CODE_EDIT_TOOLS: &str = "Edit,Write,Read,Bash,Glob,Grep";
const SPEC_DOC_TOOLS: &str = "SlashCommand:/speckit.*,Read,Bash,Git";

pub struct ClaudeAdapter;

impl ProviderAdapter for ClaudeAdapter {
    fn binary_name(&self) -> &'static str {
        "claude"
    }

    fn display_name(&self) -> &'static str {
        "Claude"
    }

    fn build_env(&self, ctx: &AdapterContext) -> Vec<(String, String)> {
        let mut env = Vec::new();
        if let Some(url) = &ctx.anthropic_base_url {
            env.push(("ANTHROPIC_BASE_URL".to_string(), url.clone()));
        }
        if let Some(token) = &ctx.anthropic_auth_token {
            env.push(("ANTHROPIC_AUTH_TOKEN".to_string(), token.clone()));
        }
        env
    }

    fn build_args(&self, ctx: &AdapterContext) -> Vec<String> {
        let mut args = vec!["--print".to_string(), "--model".to_string(), "sonnet".to_string()];
        args.push("--output-format".to_string());
        args.push(if ctx.structured_output { "json" } else { "text" }.to_string());

        if ctx.scenario == Scenario::SpecDoc {
            args.push("--permission-mode".to_string());
            args.push("acceptEdits".to_string());
            args.push("--allowed-tools".to_string());
            args.push(SPEC_DOC_TOOLS.to_string());
        } else {
            args.push("--dangerously-skip-permissions".to_string());
            args.push("--allowed-tools".to_string());
            args.push(CODE_EDIT_TOOLS.to_string());
        }

        if let Some(session_id) = &ctx.resume_session_id {
            args.push("--resume".to_string());
            args.push(session_id.clone());
        }

        args.push(ctx.prompt.clone());
        args
    }

    fn parse_result(&self, stdout: &[u8]) -> AdapterResult {
        let text = String::from_utf8_lossy(stdout);
        for line in text.lines().rev() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Ok(value) = serde_json::from_str::<Value>(line) {
                if let Some(result) = value.get("result").and_then(Value::as_str) {
                    let session_id = value
                        .get("session_id")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    return AdapterResult {
                        text: result.to_string(),
                        session_id,
                    };
                }
            }
        }
        AdapterResult {
            text: text.trim().to_string(),
            session_id: None,
        }
    }

    fn new_progress_state(&self) -> ProgressState {
        ProgressState::Claude { last_line: String::new() }
    }

    /// Last non-debug, non-error-word line, tagged with the robot emoji.
    fn extract_progress(&self, chunk: &str, state: &mut ProgressState) -> Option<String> {
        let ProgressState::Claude { last_line } = state else {
            return None;
        };
        let candidate = chunk
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty() && !is_debug_or_error_line(l))?
            .trim()
            .to_string();
        if candidate == *last_line {
            return None;
        }
        *last_line = candidate.clone();
        Some(format!("🤖 {candidate}"))
    }
}

fn is_debug_or_error_line(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.starts_with("debug") || lower.contains("error:") || lower.starts_with('[')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(scenario: Scenario, resume: Option<&str>) -> AdapterContext {
        AdapterContext {
            prompt: "do the thing".to_string(),
            scenario,
            resume_session_id: resume.map(str::to_string),
            structured_output: false,
            anthropic_base_url: None,
            anthropic_auth_token: None,
        }
    }

    #[test]
    fn spec_doc_scenario_uses_accept_edits_and_speckit_tools() {
        let args = ClaudeAdapter.build_args(&ctx(Scenario::SpecDoc, None));
        assert!(args.contains(&"acceptEdits".to_string()));
        assert!(args.iter().any(|a| a.contains("speckit")));
        assert!(!args.contains(&"--dangerously-skip-permissions".to_string()));
    }

    #[test]
    fn code_edit_scenario_skips_permissions() {
        let args = ClaudeAdapter.build_args(&ctx(Scenario::IssueSession, None));
        assert!(args.contains(&"--dangerously-skip-permissions".to_string()));
    }

    #[test]
    fn resume_appends_session_flag() {
        let args = ClaudeAdapter.build_args(&ctx(Scenario::IssueSession, Some("sess-1")));
        let idx = args.iter().position(|a| a == "--resume").unwrap();
        assert_eq!(args[idx + 1], "sess-1");
    }

    #[test]
    fn parse_result_prefers_last_json_line_with_result_field() {
        let stdout = b"{\"type\":\"system\"}\n{\"type\":\"result\",\"result\":\"done\",\"session_id\":\"s1\"}\n";
        let result = ClaudeAdapter.parse_result(stdout);
        assert_eq!(result.text, "done");
        assert_eq!(result.session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn parse_result_falls_back_to_plain_text() {
        let result = ClaudeAdapter.parse_result(b"plain output\nmore output");
        assert_eq!(result.text, "plain output\nmore output");
        assert!(result.session_id.is_none());
    }

    #[test]
    fn extract_progress_skips_debug_lines() {
        let mut state = ClaudeAdapter.new_progress_state();
        let msg = ClaudeAdapter
            .extract_progress("[debug] internal\nEditing src/main.rs", &mut state)
            .unwrap();
        assert_eq!(msg, "🤖 Editing src/main.rs");
    }
}
