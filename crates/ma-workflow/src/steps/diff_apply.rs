//! DiffApplyStep (spec §4.10): applies a unified diff to the repo working
//! tree, subject to path/extension/size validation.
//!
//! The patch algorithm is a small hand-rolled unified-diff applier (no
//! hunk-fuzzing, exact line offsets only) since none of the pack's
//! examples carry a diff-apply dependency already in the teacher's stack;
//! pulling in a crate for this single mechanical transform would widen
//! the dependency surface for no real benefit.

use std::collections::HashMap;
use std::path::{Component, Path};

use async_trait::async_trait;
use ma_core::AppError;
use regex::Regex;
use serde_json::{json, Value};

use super::{Step, StepOutcome};
use crate::context::EngineContext;

pub struct DiffApplyStep;

const DEFAULT_MAX_FILE_BYTES: u64 = 2 * 1024 * 1024;

#[async_trait]
impl Step for DiffApplyStep {
    async fn execute(
        &self,
        ctx: &EngineContext,
        step_name: &str,
        config: &Value,
    ) -> Result<StepOutcome, AppError> {
        let diff_text = config
            .get("diff")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::ConfigError(format!("step '{step_name}': missing 'diff'")))?;
        let allowed_extensions: Option<Vec<String>> = config.get("allowed_extensions").and_then(|v| {
            v.as_array()
                .map(|arr| arr.iter().filter_map(|e| e.as_str().map(str::to_string)).collect())
        });
        let max_file_bytes = config
            .get("max_file_bytes")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_MAX_FILE_BYTES);
        let commit_message = config.get("commit_message").and_then(Value::as_str);

        let files = parse_unified_diff(diff_text)
            .map_err(|e| AppError::StepError(format!("parsing diff: {e}")))?;

        let mut applied_paths = Vec::new();
        for file in &files {
            let rel_path = file
                .new_path
                .as_ref()
                .or(file.old_path.as_ref())
                .ok_or_else(|| AppError::StepError("diff hunk names no file".to_string()))?;
            validate_target_path(rel_path, allowed_extensions.as_deref())?;

            let full_path = ctx.workflow.repo_root.join(rel_path);
            let old_content = if file.old_path.is_some() {
                tokio::fs::read_to_string(&full_path).await.unwrap_or_default()
            } else {
                String::new()
            };

            let new_content = apply_hunks(&old_content, &file.hunks);
            if new_content.len() as u64 > max_file_bytes {
                return Err(AppError::StepError(format!(
                    "'{rel_path}' would exceed max_file_bytes ({max_file_bytes})"
                )));
            }

            if let Some(parent) = full_path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| AppError::StepError(format!("create_dir_all '{}': {e}", parent.display())))?;
            }
            tokio::fs::write(&full_path, &new_content)
                .await
                .map_err(|e| AppError::StepError(format!("write '{}': {e}", full_path.display())))?;
            applied_paths.push(rel_path.clone());
        }

        let commit_sha = if let Some(message) = commit_message {
            if applied_paths.is_empty() {
                None
            } else {
                Some(
                    ctx.vcs
                        .commit_paths(&ctx.workflow.repo_root, message, &applied_paths)
                        .await?,
                )
            }
        } else {
            None
        };

        let apply_result = json!({"applied_files": applied_paths, "commit_sha": commit_sha});
        let mut outputs = HashMap::new();
        outputs.insert(
            "applied_files".to_string(),
            Value::Array(applied_paths.iter().cloned().map(Value::String).collect()),
        );
        outputs.insert("apply_result".to_string(), apply_result.clone());
        if let Some(sha) = &commit_sha {
            outputs.insert("commit_sha".to_string(), Value::String(sha.clone()));
        }
        Ok(StepOutcome::new(
            json!({"applied_files": applied_paths, "apply_result": apply_result}),
            outputs,
        ))
    }
}

fn validate_target_path(rel_path: &str, allowed_extensions: Option<&[String]>) -> Result<(), AppError> {
    let path = Path::new(rel_path);
    if path.is_absolute() || path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(AppError::StepError(format!(
            "diff target '{rel_path}' escapes the repository root"
        )));
    }
    if let Some(allowed) = allowed_extensions {
        let ext = path.extension().and_then(|e| e.to_str()).map(|e| format!(".{e}"));
        let matches = ext.as_deref().is_some_and(|e| allowed.iter().any(|a| a == e));
        if !matches {
            return Err(AppError::StepError(format!(
                "diff target '{rel_path}' has a disallowed extension"
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
enum DiffLine {
    Context(String),
    Remove(String),
    Add(String),
}

#[derive(Debug, Clone)]
struct Hunk {
    old_start: usize,
    lines: Vec<DiffLine>,
}

#[derive(Debug, Clone, Default)]
struct FileDiff {
    old_path: Option<String>,
    new_path: Option<String>,
    hunks: Vec<Hunk>,
}

fn hunk_header_re() -> Regex {
    Regex::new(r"^@@ -(\d+)(?:,\d+)? \+\d+(?:,\d+)? @@").expect("static regex")
}

fn strip_diff_prefix(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed == "/dev/null" {
        return None;
    }
    Some(
        trimmed
            .strip_prefix("a/")
            .or_else(|| trimmed.strip_prefix("b/"))
            .unwrap_or(trimmed)
            .to_string(),
    )
}

fn parse_unified_diff(raw: &str) -> Result<Vec<FileDiff>, String> {
    let header_re = hunk_header_re();
    let mut files = Vec::new();
    let mut current: Option<FileDiff> = None;
    let mut current_hunk: Option<Hunk> = None;

    for line in raw.lines() {
        if let Some(rest) = line.strip_prefix("--- ") {
            if let Some(hunk) = current_hunk.take() {
                if let Some(f) = current.as_mut() {
                    f.hunks.push(hunk);
                }
            }
            if let Some(f) = current.take() {
                files.push(f);
            }
            current = Some(FileDiff {
                old_path: strip_diff_prefix(rest),
                ..Default::default()
            });
            continue;
        }
        if let Some(rest) = line.strip_prefix("+++ ") {
            let f = current.as_mut().ok_or("'+++' header with no preceding '---'")?;
            f.new_path = strip_diff_prefix(rest);
            continue;
        }
        if let Some(caps) = header_re.captures(line) {
            if let Some(hunk) = current_hunk.take() {
                if let Some(f) = current.as_mut() {
                    f.hunks.push(hunk);
                }
            }
            let old_start: usize = caps[1].parse().map_err(|_| "invalid hunk header".to_string())?;
            current_hunk = Some(Hunk {
                old_start: old_start.saturating_sub(1),
                lines: Vec::new(),
            });
            continue;
        }
        if let Some(hunk) = current_hunk.as_mut() {
            if let Some(content) = line.strip_prefix('+') {
                hunk.lines.push(DiffLine::Add(content.to_string()));
            } else if let Some(content) = line.strip_prefix('-') {
                hunk.lines.push(DiffLine::Remove(content.to_string()));
            } else if let Some(content) = line.strip_prefix(' ') {
                hunk.lines.push(DiffLine::Context(content.to_string()));
            }
            // Lines matching none of the above (e.g. "\ No newline at end of
            // file") are ignored.
        }
    }
    if let Some(hunk) = current_hunk.take() {
        if let Some(f) = current.as_mut() {
            f.hunks.push(hunk);
        }
    }
    if let Some(f) = current.take() {
        files.push(f);
    }
    Ok(files)
}

fn apply_hunks(old_content: &str, hunks: &[Hunk]) -> String {
    let old_lines: Vec<&str> = if old_content.is_empty() {
        Vec::new()
    } else {
        old_content.lines().collect()
    };
    let mut new_lines: Vec<String> = Vec::new();
    let mut old_idx = 0usize;

    for hunk in hunks {
        while old_idx < hunk.old_start && old_idx < old_lines.len() {
            new_lines.push(old_lines[old_idx].to_string());
            old_idx += 1;
        }
        for line in &hunk.lines {
            match line {
                DiffLine::Context(s) => {
                    new_lines.push(s.clone());
                    old_idx += 1;
                }
                DiffLine::Remove(_) => {
                    old_idx += 1;
                }
                DiffLine::Add(s) => {
                    new_lines.push(s.clone());
                }
            }
        }
    }
    while old_idx < old_lines.len() {
        new_lines.push(old_lines[old_idx].to_string());
        old_idx += 1;
    }

    let mut result = new_lines.join("\n");
    if !result.is_empty() {
        result.push('\n');
    }
    result
}
