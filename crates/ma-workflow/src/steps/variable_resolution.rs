//! VariableResolutionStep (spec §4.10): evaluates a map of named
//! expressions against context variables (same grammar as step
//! `condition`s, `ma_core::expr::evaluate`) and sets the results as
//! variables.

use std::collections::HashMap;

use async_trait::async_trait;
use ma_core::AppError;
use serde_json::{json, Value};

use super::{Step, StepOutcome};
use crate::context::EngineContext;

pub struct VariableResolutionStep;

#[async_trait]
impl Step for VariableResolutionStep {
    async fn execute(
        &self,
        ctx: &EngineContext,
        step_name: &str,
        config: &Value,
    ) -> Result<StepOutcome, AppError> {
        let expressions = config
            .get("expressions")
            .and_then(Value::as_object)
            .ok_or_else(|| AppError::ConfigError(format!("step '{step_name}': missing 'expressions'")))?;

        let mut outputs = HashMap::new();
        let mut errors = HashMap::new();
        for (name, expr_value) in expressions {
            let Some(expr) = expr_value.as_str() else {
                errors.insert(name.clone(), "expression must be a string".to_string());
                continue;
            };
            match ma_core::expr::evaluate(expr, &ctx.workflow.variables) {
                Ok(value) => {
                    ctx.workflow.variables.set(name.clone(), value.clone());
                    outputs.insert(name.clone(), value);
                }
                Err(e) => {
                    errors.insert(name.clone(), e);
                }
            }
        }

        if !errors.is_empty() {
            return Err(AppError::StepError(format!(
                "variable resolution failed for: {}",
                errors
                    .iter()
                    .map(|(k, v)| format!("{k} ({v})"))
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        let data = Value::Object(outputs.iter().map(|(k, v)| (k.clone(), v.clone())).collect());
        Ok(StepOutcome::new(json!({"resolved": data}), outputs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ma_core::context::WorkflowContext;
    use ma_task_client::TaskServiceClient;
    use ma_transport::LocalStreamTransport;
    use ma_vcs::VcsDriver;
    use std::sync::Arc;

    fn test_ctx() -> EngineContext {
        let workflow = WorkflowContext::new("wf1", "proj1", std::env::temp_dir(), "main");
        let transport: Arc<dyn ma_transport::StreamTransport> = Arc::new(LocalStreamTransport::new());
        let vcs = Arc::new(VcsDriver::default());
        let task_client: Option<Arc<TaskServiceClient>> = None;
        EngineContext::new(workflow, transport, vcs, task_client)
    }

    #[tokio::test]
    async fn resolves_every_expression_and_sets_variables() {
        let ctx = test_ctx();
        ctx.workflow.variables.set("count", json!(3));
        let outcome = VariableResolutionStep
            .execute(
                &ctx,
                "vars",
                &json!({"expressions": {"doubled_ready": "count == 3"}}),
            )
            .await
            .unwrap();
        assert_eq!(outcome.outputs["doubled_ready"], Value::Bool(true));
        assert_eq!(ctx.workflow.variables.get("doubled_ready"), Some(Value::Bool(true)));
    }

    #[tokio::test]
    async fn unresolvable_expression_fails_the_step() {
        let ctx = test_ctx();
        let err = VariableResolutionStep
            .execute(&ctx, "vars", &json!({"expressions": {"bad": "(("}}))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StepError(_)));
    }
}
