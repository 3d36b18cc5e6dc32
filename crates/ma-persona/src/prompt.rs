//! System prompt resolution and user-text assembly (spec §4.6 steps 1-3).

use once_cell_regex::PLACEHOLDER;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// Everything the prompt assembler needs about the task the persona is
/// working on. Kept small and owned so callers don't have to share
/// `ma-core::types::Task` across a crate boundary this module doesn't
/// otherwise need.
#[derive(Debug, Clone, Default)]
pub struct TaskSummary {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct PromptInputs<'a> {
    pub persona: &'a str,
    pub intent: &'a str,
    pub payload: &'a Value,
    pub repo_root: Option<&'a Path>,
    pub task: Option<&'a TaskSummary>,
    pub variables: &'a HashMap<String, Value>,
}

const GENERIC_ROLE_LINE: &str = "You are a member of an automated software delivery pipeline.";

const INFORMATION_REQUEST_CONTRACT: &str = "\n\nIf you need more context before answering, respond with \
a JSON object containing an `information_request` array describing repo_file or http_get requests; \
otherwise answer the request directly.";

/// Resolve the system prompt for a persona from a name->prompt table,
/// falling back to a generic role line for personas without a dedicated
/// entry (§4.6 step 1).
pub fn resolve_system_prompt(persona: &str, prompts: &HashMap<String, String>) -> String {
    prompts
        .get(persona)
        .cloned()
        .unwrap_or_else(|| GENERIC_ROLE_LINE.to_string())
}

/// Substitute `${var.path}` placeholders in an artifact path template
/// against the resolved variable map. Unresolved paths are left literal
/// (§4.6 step 2).
pub fn resolve_placeholder_path(template: &str, variables: &HashMap<String, Value>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures| {
            let path = &caps[1];
            resolve_dotted(path, variables)
                .map(|v| stringify(&v))
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn resolve_dotted(path: &str, variables: &HashMap<String, Value>) -> Option<Value> {
    let mut parts = path.split('.');
    let root = parts.next()?;
    let mut current = variables.get(root)?.clone();
    for part in parts {
        current = current.as_object()?.get(part)?.clone();
    }
    Some(current)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Assemble the user-facing text by priority (§4.6 step 2): explicit
/// `payload.user_text` > `plan_artifact` contents > `qa_result_artifact`
/// > `context_artifact` > `task.description` block > `payload.description`
/// > `task.title` > raw `intent`.
///
/// Artifact contents are supplied by the caller (already read from the
/// repo working tree) rather than read here, keeping this function free
/// of filesystem access.
pub fn assemble_user_text(
    inputs: &PromptInputs<'_>,
    artifact_contents: &HashMap<&'static str, String>,
) -> String {
    if let Some(text) = inputs.payload.get("user_text").and_then(Value::as_str) {
        return text.to_string();
    }
    for key in ["plan_artifact", "qa_result_artifact", "context_artifact"] {
        if let Some(content) = artifact_contents.get(key) {
            return content.clone();
        }
    }
    if let Some(task) = inputs.task {
        if !task.description.is_empty() {
            return format!("Task: {}\n\n{}", task.title, task.description);
        }
    }
    if let Some(description) = inputs.payload.get("description").and_then(Value::as_str) {
        return description.to_string();
    }
    if let Some(task) = inputs.task {
        if !task.title.is_empty() {
            return task.title.clone();
        }
    }
    inputs.intent.to_string()
}

pub fn append_information_request_contract(user_text: &str) -> String {
    format!("{user_text}{INFORMATION_REQUEST_CONTRACT}")
}

/// Tiny module hiding the `once_cell`-style lazily-compiled regex behind a
/// name that doesn't collide with the `regex` crate itself.
mod once_cell_regex {
    use regex::Regex;
    use std::sync::LazyLock;

    pub static PLACEHOLDER: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\$\{([A-Za-z0-9_.]+)\}").expect("static placeholder regex"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn falls_back_to_generic_role_for_unknown_persona() {
        let prompts = HashMap::new();
        assert_eq!(resolve_system_prompt("mystery-persona", &prompts), GENERIC_ROLE_LINE);
    }

    #[test]
    fn uses_configured_prompt_when_present() {
        let mut prompts = HashMap::new();
        prompts.insert("planner".to_string(), "You are the planner.".to_string());
        assert_eq!(resolve_system_prompt("planner", &prompts), "You are the planner.");
    }

    #[test]
    fn placeholder_resolves_against_variables() {
        let mut variables = HashMap::new();
        variables.insert("task".to_string(), json!({"path": "src/lib.rs"}));
        assert_eq!(
            resolve_placeholder_path("${task.path}", &variables),
            "src/lib.rs"
        );
    }

    #[test]
    fn unresolved_placeholder_left_literal() {
        let variables = HashMap::new();
        assert_eq!(resolve_placeholder_path("${missing.path}", &variables), "${missing.path}");
    }

    #[test]
    fn user_text_priority_prefers_explicit_field() {
        let payload = json!({"user_text": "explicit", "description": "fallback"});
        let inputs = PromptInputs {
            persona: "implementer",
            intent: "do work",
            payload: &payload,
            repo_root: None,
            task: None,
            variables: &HashMap::new(),
        };
        assert_eq!(assemble_user_text(&inputs, &HashMap::new()), "explicit");
    }

    #[test]
    fn user_text_falls_back_to_intent_when_nothing_else_present() {
        let payload = json!({});
        let inputs = PromptInputs {
            persona: "implementer",
            intent: "raw intent text",
            payload: &payload,
            repo_root: None,
            task: None,
            variables: &HashMap::new(),
        };
        assert_eq!(assemble_user_text(&inputs, &HashMap::new()), "raw intent text");
    }
}
