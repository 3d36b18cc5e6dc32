//! RegisterBlockedDependenciesStep (spec §4.10): pushes a dependency-task-id
//! list onto the parent task's `blocked_dependencies` via the Task-Service
//! client, honoring `allow_clear` so an empty list only clears existing
//! blockers when explicitly asked to.

use std::collections::HashMap;

use async_trait::async_trait;
use ma_core::AppError;
use serde_json::{json, Value};

use super::{Step, StepOutcome};
use crate::context::EngineContext;

pub struct RegisterBlockedDependenciesStep;

#[async_trait]
impl Step for RegisterBlockedDependenciesStep {
    async fn execute(
        &self,
        ctx: &EngineContext,
        step_name: &str,
        config: &Value,
    ) -> Result<StepOutcome, AppError> {
        let dependency_ids: Vec<String> = config
            .get("dependency_ids")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let allow_clear = config.get("allow_clear").and_then(Value::as_bool).unwrap_or(false);

        let task = ctx
            .workflow
            .task
            .as_ref()
            .ok_or_else(|| AppError::ConfigError(format!("step '{step_name}': no active task in context")))?;
        let client = ctx
            .task_client
            .as_ref()
            .ok_or_else(|| AppError::ConfigError(format!("step '{step_name}': no task-service client configured")))?;

        let response = client
            .update_blocked_dependencies(&task.project_id, &task.id, &dependency_ids, allow_clear)
            .await;
        if !response.ok {
            return Err(AppError::TaskServiceError {
                status: response.status,
                body: response.error.unwrap_or_else(|| response.body.to_string()),
            });
        }

        let mut outputs = HashMap::new();
        outputs.insert(
            "blocked_dependencies".to_string(),
            Value::Array(dependency_ids.iter().cloned().map(Value::String).collect()),
        );
        Ok(StepOutcome::new(
            json!({"blocked_dependencies": dependency_ids, "skipped": response.body.get("skipped").cloned().unwrap_or(Value::Bool(false))}),
            outputs,
        ))
    }
}
