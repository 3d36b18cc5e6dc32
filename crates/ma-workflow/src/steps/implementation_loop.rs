//! ImplementationLoopStep (spec §4.10): fuses
//! `PersonaRequest(implementer) -> DiffApply -> PlanKeyFileGuard` into one
//! bounded retry loop, since the persona's diff and the plan's key-file
//! guard are jointly "did this attempt land" rather than independent
//! steps a workflow author would want to wire up separately.

use std::collections::HashMap;

use async_trait::async_trait;
use ma_core::AppError;
use serde_json::{json, Value};
use tracing::info;

use super::diff_apply::DiffApplyStep;
use super::persona_request::PersonaRequestStep;
use super::plan_key_file_guard::PlanKeyFileGuardStep;
use super::{Step, StepOutcome};
use crate::context::EngineContext;

pub struct ImplementationLoopStep;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[async_trait]
impl Step for ImplementationLoopStep {
    async fn execute(
        &self,
        ctx: &EngineContext,
        step_name: &str,
        config: &Value,
    ) -> Result<StepOutcome, AppError> {
        let persona = config
            .get("persona")
            .and_then(Value::as_str)
            .unwrap_or("implementer")
            .to_string();
        let task_name = config
            .get("task_name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| ctx.workflow.task.as_ref().map(|t| t.title.clone()))
            .unwrap_or_else(|| step_name.to_string());
        let max_attempts = config
            .get("max_attempts")
            .and_then(Value::as_u64)
            .map(|n| n as u32)
            .unwrap_or(DEFAULT_MAX_ATTEMPTS);
        let plan_variable = config
            .get("plan_variable")
            .and_then(Value::as_str)
            .unwrap_or("plan")
            .to_string();
        let allowed_extensions = config.get("allowed_extensions").cloned();
        let config_files: Vec<String> = config
            .get("config_files")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let mut last_missing_files: Vec<String> = Vec::new();
        let mut last_config_errors: Vec<String> = Vec::new();

        for attempt in 1..=max_attempts {
            info!(step = step_name, attempt, max_attempts, "implementation loop attempt");

            let persona_payload = json!({
                "task_name": task_name,
                "attempt": attempt,
                "previous_missing_files": last_missing_files,
                "previous_config_errors": last_config_errors,
            });
            let persona_outcome = PersonaRequestStep
                .execute(
                    ctx,
                    step_name,
                    &json!({"persona": persona, "intent": "implement", "payload": persona_payload}),
                )
                .await?;
            let diff_text = persona_outcome
                .outputs
                .get("payload")
                .and_then(|v| v.get("diff"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| {
                    persona_outcome
                        .outputs
                        .get("output")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .ok_or_else(|| AppError::StepError("implementer response carried no diff".to_string()))?;

            let message = if attempt == 1 {
                format!("feat: implement {task_name}")
            } else {
                format!("feat: implement {task_name} (attempt {attempt})")
            };
            let mut diff_config = json!({"diff": diff_text, "commit_message": message});
            if let Some(ext) = &allowed_extensions {
                diff_config["allowed_extensions"] = ext.clone();
            }
            let diff_outcome = DiffApplyStep.execute(ctx, step_name, &diff_config).await?;
            let touched: Vec<String> = diff_outcome
                .outputs
                .get("applied_files")
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default();

            let guard_outcome = PlanKeyFileGuardStep
                .execute(
                    ctx,
                    step_name,
                    &json!({"plan_variable": plan_variable, "fail_on_missing": false}),
                )
                .await?;
            let missing: Vec<String> = guard_outcome
                .outputs
                .get("missing_key_files")
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default();

            let config_errors = validate_config_files(ctx, &touched, &config_files).await?;

            if missing.is_empty() && config_errors.is_empty() {
                let mut outputs = HashMap::new();
                outputs.insert("attempts".to_string(), Value::Number(attempt.into()));
                outputs.insert(
                    "applied_files".to_string(),
                    Value::Array(touched.iter().cloned().map(Value::String).collect()),
                );
                if let Some(sha) = diff_outcome.outputs.get("commit_sha") {
                    outputs.insert("commit_sha".to_string(), sha.clone());
                }
                return Ok(StepOutcome::new(
                    json!({"attempts": attempt, "applied_files": touched}),
                    outputs,
                ));
            }

            last_missing_files = missing;
            last_config_errors = config_errors;
        }

        Err(AppError::StepError(format!(
            "implementation loop exhausted {max_attempts} attempts; unresolved: missing key files [{}], config errors [{}]",
            last_missing_files.join(", "),
            last_config_errors.join(", ")
        )))
    }
}

/// Parses each touched file that matches `config_files` as JSON or TOML
/// depending on extension, returning a human-readable error per failure.
async fn validate_config_files(
    ctx: &EngineContext,
    touched: &[String],
    config_files: &[String],
) -> Result<Vec<String>, AppError> {
    let mut errors = Vec::new();
    for rel_path in touched {
        if !config_files.iter().any(|c| c == rel_path) {
            continue;
        }
        let full_path = ctx.workflow.repo_root.join(rel_path);
        let contents = tokio::fs::read_to_string(&full_path)
            .await
            .map_err(|e| AppError::StepError(format!("reading '{}': {e}", full_path.display())))?;
        let parse_result = if rel_path.ends_with(".toml") {
            contents.parse::<toml::Value>().map(|_| ()).map_err(|e| e.to_string())
        } else {
            serde_json::from_str::<Value>(&contents).map(|_| ()).map_err(|e| e.to_string())
        };
        if let Err(msg) = parse_result {
            errors.push(format!("{rel_path}: {msg}"));
        }
    }
    Ok(errors)
}
