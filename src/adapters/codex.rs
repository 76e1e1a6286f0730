use serde_json::Value;

use super::{AdapterContext, AdapterResult, ProgressState, ProviderAdapter};

const PROGRESS_ONLY_KINDS: &[&str] = &["reasoning", "analysis", "plan", "tool", "command", "execution"];

pub struct CodexAdapter;

impl ProviderAdapter for CodexAdapter {
    fn binary_name(&self) -> &'static str {
        "codex"
    }

    fn display_name(&self) -> &'static str {
        "Codex"
    }

    fn build_env(&self, _ctx: &AdapterContext) -> Vec<(String, String)> {
        Vec::new()
    }

    fn build_args(&self, ctx: &AdapterContext) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        if ctx.structured_output {
            args.push("--experimental-json".to_string());
        }
        args.push("--dangerously-bypass-approvals-and-sandbox".to_string());
        args.push("--color".to_string());
        args.push("never".to_string());

        if let Some(session_id) = &ctx.resume_session_id {
            args.push("resume".to_string());
            args.push(session_id.clone());
            args.push(ctx.prompt.clone());
        } else {
            args.push(ctx.prompt.clone());
        }
        args
    }

    /// Walks every NDJSON line, concatenating `response.output_text.delta`
    /// fragments and remembering the authoritative text on
    /// `response.output_text.done` / `response.completed`.
    fn parse_result(&self, stdout: &[u8]) -> AdapterResult {
        let text = String::from_utf8_lossy(stdout);
        let mut delta_buffer = String::new();
        let mut final_text: Option<String> = None;
        let mut session_id: Option<String> = None;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Ok(event) = serde_json::from_str::<Value>(line) else {
                continue;
            };
            let kind = event.get("type").and_then(Value::as_str).unwrap_or("");

            if session_id.is_none() {
                session_id = extract_session_id(&event);
            }

            match kind {
                "response.output_text.delta" => {
                    if let Some(delta) = event.get("delta").and_then(Value::as_str) {
                        delta_buffer.push_str(delta);
                    }
                }
                "response.output_text.done" => {
                    final_text = event
                        .get("output_text")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .or_else(|| Some(delta_buffer.clone()));
                }
                "response.completed" => {
                    if final_text.is_none() {
                        final_text = Some(delta_buffer.clone());
                    }
                }
                _ => {}
            }
        }

        AdapterResult {
            text: final_text.unwrap_or(delta_buffer),
            session_id,
        }
    }

    fn new_progress_state(&self) -> ProgressState {
        ProgressState::Codex {
            delta_buffer: String::new(),
            session_id: None,
        }
    }

    fn extract_progress(&self, chunk: &str, state: &mut ProgressState) -> Option<String> {
        let ProgressState::Codex { session_id, .. } = state else {
            return None;
        };
        let mut last_message = None;
        for line in chunk.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Ok(event) = serde_json::from_str::<Value>(line) else {
                continue;
            };
            if session_id.is_none() {
                *session_id = extract_session_id(&event);
            }
            if let Some(msg) = format_progress_event(&event) {
                last_message = Some(msg);
            }
        }
        last_message
    }
}

fn extract_session_id(event: &Value) -> Option<String> {
    for path in [
        &["session_id"][..],
        &["session", "id"][..],
        &["response", "session_id"][..],
        &["metadata", "session_id"][..],
    ] {
        if let Some(id) = dig(event, path).and_then(Value::as_str) {
            if !id.is_empty() {
                return Some(id.to_string());
            }
        }
    }
    if event.get("type").and_then(Value::as_str) == Some("session.created") {
        return event.get("session_id").and_then(Value::as_str).map(str::to_string);
    }
    None
}

fn dig<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |v, key| v.get(key))
}

const MAX_PROGRESS_OUTPUT: usize = 400;

fn format_progress_event(event: &Value) -> Option<String> {
    let kind = event.get("type").and_then(Value::as_str)?;

    if kind == "session.created" {
        let id = event.get("session_id").and_then(Value::as_str).unwrap_or("?");
        return Some(format!("🔄 Session: {id}"));
    }

    if kind == "error" {
        let message = event.get("message").and_then(Value::as_str).unwrap_or("unknown error");
        return Some(format!("❌ {message}"));
    }

    if kind.starts_with("item.") {
        let item_type = event
            .pointer("/item/type")
            .and_then(Value::as_str)
            .unwrap_or("");

        if item_type == "command_execution" {
            let icon = match kind {
                "item.started" => "🔄",
                "item.completed" if event.pointer("/item/exit_code").and_then(Value::as_i64) == Some(0) => "✅",
                "item.completed" => "❌",
                _ => "📄",
            };
            let command = event.pointer("/item/command").and_then(Value::as_str).unwrap_or("");
            let output = event
                .pointer("/item/aggregated_output")
                .and_then(Value::as_str)
                .unwrap_or("");
            let truncated: String = output.chars().take(MAX_PROGRESS_OUTPUT).collect();
            return Some(format!("{icon} `{command}`\n{truncated}"));
        }
        if matches!(item_type, "reasoning" | "plan") {
            let icon = if item_type == "reasoning" { "🧠" } else { "🗺️" };
            let text = event.pointer("/item/text").and_then(Value::as_str).unwrap_or("");
            return Some(format!("{icon} {text}"));
        }
    }

    if PROGRESS_ONLY_KINDS.iter().any(|k| kind.contains(k)) {
        return None;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_delta_stream_into_final_text_with_session_id() {
        let stdout = concat!(
            "{\"type\":\"session.created\",\"session_id\":\"codex-abc\"}\n",
            "{\"type\":\"response.output_text.delta\",\"delta\":\"Hello \"}\n",
            "{\"type\":\"response.output_text.delta\",\"delta\":\"world\"}\n",
            "{\"type\":\"response.output_text.done\",\"output_text\":\"Hello world\"}\n",
        );
        let result = CodexAdapter.parse_result(stdout.as_bytes());
        assert_eq!(result.text, "Hello world");
        assert_eq!(result.session_id.as_deref(), Some("codex-abc"));
    }

    #[test]
    fn falls_back_to_delta_buffer_when_no_done_event() {
        let stdout = "{\"type\":\"response.output_text.delta\",\"delta\":\"partial\"}\n";
        let result = CodexAdapter.parse_result(stdout.as_bytes());
        assert_eq!(result.text, "partial");
    }

    #[test]
    fn ignores_malformed_lines() {
        let stdout = "not json\n{\"type\":\"response.output_text.delta\",\"delta\":\"ok\"}\n";
        let result = CodexAdapter.parse_result(stdout.as_bytes());
        assert_eq!(result.text, "ok");
    }

    #[test]
    fn progress_formats_session_created_event() {
        let mut state = CodexAdapter.new_progress_state();
        let msg = CodexAdapter
            .extract_progress("{\"type\":\"session.created\",\"session_id\":\"abc\"}", &mut state)
            .unwrap();
        assert_eq!(msg, "🔄 Session: abc");
    }

    #[test]
    fn progress_formats_command_execution_completion() {
        let mut state = CodexAdapter.new_progress_state();
        let event = "{\"type\":\"item.completed\",\"item\":{\"type\":\"command_execution\",\"command\":\"ls\",\"exit_code\":0,\"aggregated_output\":\"a.txt\"}}";
        let msg = CodexAdapter.extract_progress(event, &mut state).unwrap();
        assert!(msg.starts_with("✅ `ls`"));
    }
}
