//! Inspects an inbound webhook body and decides whether, and how, to run the
//! AI. See SPEC_FULL.md section 4.2.

use regex::Regex;
use std::sync::LazyLock;

use crate::adapters::Scenario;
use crate::config::Provider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    MentionClaude,
    MentionCodex,
    MentionAi,
    SlashSpec,
    SlashPlan,
    SlashTasks,
}

impl Trigger {
    fn provider(self) -> Provider {
        match self {
            Trigger::MentionCodex => Provider::Codex,
            _ => Provider::Claude,
        }
    }

    fn spec_kit_command(self) -> Option<&'static str> {
        match self {
            Trigger::SlashSpec => Some("/speckit.specify"),
            Trigger::SlashPlan => Some("/speckit.plan"),
            Trigger::SlashTasks => Some("/speckit.tasks"),
            _ => None,
        }
    }

    fn scenario(self) -> Option<Scenario> {
        self.spec_kit_command().map(|_| Scenario::SpecDoc)
    }
}

static MENTION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"@(claude|codex|ai)\b").unwrap());
static SLASH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*/(spec|plan|tasks)\b").unwrap());

/// Finds the first recognized trigger in `text`, if any.
pub fn find_trigger(text: &str) -> Option<Trigger> {
    if let Some(caps) = SLASH_RE.captures(text) {
        return match &caps[1] {
            "spec" => Some(Trigger::SlashSpec),
            "plan" => Some(Trigger::SlashPlan),
            "tasks" => Some(Trigger::SlashTasks),
            _ => None,
        };
    }
    let caps = MENTION_RE.captures(text)?;
    match &caps[1] {
        "claude" => Some(Trigger::MentionClaude),
        "codex" => Some(Trigger::MentionCodex),
        "ai" => Some(Trigger::MentionAi),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub command: String,
    pub provider: Provider,
    pub full_context: String,
    pub scenario: Option<Scenario>,
    pub trigger: Trigger,
    pub spec_kit_command: Option<&'static str>,
}

/// Builds an `Instruction` from the triggering text, using the session's
/// last provider when the trigger is implicit (a mention-less follow-up note
/// on an issue with an existing session).
pub fn classify(text: &str, implicit_provider: Option<Provider>) -> Option<Instruction> {
    match find_trigger(text) {
        Some(trigger) => Some(Instruction {
            command: strip_trigger_prefix(text, trigger),
            provider: trigger.provider(),
            full_context: text.to_string(),
            scenario: trigger.scenario(),
            trigger,
            spec_kit_command: trigger.spec_kit_command(),
        }),
        None => {
            let provider = implicit_provider?;
            if text.trim().is_empty() {
                return None;
            }
            Some(Instruction {
                command: text.trim().to_string(),
                provider,
                full_context: text.to_string(),
                scenario: None,
                trigger: match provider {
                    Provider::Claude => Trigger::MentionClaude,
                    Provider::Codex => Trigger::MentionCodex,
                },
                spec_kit_command: None,
            })
        }
    }
}

fn strip_trigger_prefix(text: &str, trigger: Trigger) -> String {
    match trigger {
        Trigger::SlashSpec | Trigger::SlashPlan | Trigger::SlashTasks => {
            SLASH_RE.replace(text, "").trim().to_string()
        }
        _ => MENTION_RE.replace(text, "").trim().to_string(),
    }
}

/// `"<projectId>:<threadIid>[:<discussionId>]"`, per SPEC_FULL.md section 4.2.
pub fn session_key(project_id: &str, thread_iid: i64, discussion_id: Option<&str>) -> String {
    match discussion_id {
        Some(id) => format!("{project_id}:{thread_iid}:{id}"),
        None => format!("{project_id}:{thread_iid}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_claude_mention() {
        let trigger = find_trigger("@claude please add jwt login").unwrap();
        assert_eq!(trigger, Trigger::MentionClaude);
    }

    #[test]
    fn finds_codex_mention() {
        assert_eq!(find_trigger("hey @codex fix this").unwrap(), Trigger::MentionCodex);
    }

    #[test]
    fn finds_leading_slash_command() {
        assert_eq!(find_trigger("  /plan build the thing").unwrap(), Trigger::SlashPlan);
    }

    #[test]
    fn slash_command_mid_sentence_is_not_a_trigger() {
        assert!(find_trigger("see the /plan doc for details").is_none());
    }

    #[test]
    fn classify_strips_mention_from_command() {
        let instruction = classify("@claude please add jwt login", None).unwrap();
        assert_eq!(instruction.command, "please add jwt login");
        assert_eq!(instruction.provider, Provider::Claude);
    }

    #[test]
    fn classify_slash_command_maps_to_speckit_and_claude() {
        let instruction = classify("/spec a login page", None).unwrap();
        assert_eq!(instruction.spec_kit_command, Some("/speckit.specify"));
        assert_eq!(instruction.provider, Provider::Claude);
        assert_eq!(instruction.scenario, Some(Scenario::SpecDoc));
    }

    #[test]
    fn mention_less_text_with_existing_session_continues_implicitly() {
        let instruction = classify("请继续完善测试", Some(Provider::Claude)).unwrap();
        assert_eq!(instruction.provider, Provider::Claude);
        assert_eq!(instruction.command, "请继续完善测试");
    }

    #[test]
    fn mention_less_text_without_session_is_ignored() {
        assert!(classify("just a regular comment", None).is_none());
    }

    #[test]
    fn session_key_includes_discussion_id_when_present() {
        assert_eq!(session_key("42", 7, Some("d1")), "42:7:d1");
        assert_eq!(session_key("42", 7, None), "42:7");
    }
}
