//! Workflow Engine (spec §4.9): topologically walks a `WorkflowDefinition`,
//! evaluating each step's `condition`, resolving its `config` through the
//! variable resolver, dispatching to the step-kind implementation, and
//! merging results back into context variables.

use ma_core::context::StepResultSummary;
use ma_core::AppError;
use tracing::{info, warn};

use crate::context::EngineContext;
use crate::definition::WorkflowDefinition;
use crate::resolver::resolve_value;
use crate::steps::build_step;

#[derive(Debug, Clone)]
pub struct StepRunRecord {
    pub name: String,
    pub status: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EngineRunSummary {
    pub workflow_name: String,
    pub steps: Vec<StepRunRecord>,
    pub aborted: bool,
}

pub struct WorkflowEngine {
    definition: WorkflowDefinition,
}

impl WorkflowEngine {
    pub fn new(definition: WorkflowDefinition) -> Result<Self, AppError> {
        definition.validate()?;
        Ok(Self { definition })
    }

    /// Walks the DAG in dependency order (spec §4.9 steps 1-5). Returns as
    /// soon as a non-`continue_on_failure` step fails; the caller (the
    /// coordinator) decides whether that triggers the abort path.
    pub async fn run(&self, ctx: &EngineContext) -> Result<EngineRunSummary, AppError> {
        let order = crate::dag::topological_order(&self.definition.steps)?;
        let mut records = Vec::with_capacity(order.len());

        for idx in order {
            let step_def = &self.definition.steps[idx];

            if let Some(condition) = &step_def.condition {
                let passes = ma_core::expr::evaluate_condition(condition, &ctx.workflow.variables).map_err(|e| {
                    AppError::ConfigError(format!("step '{}': bad condition: {e}", step_def.name))
                })?;
                if !passes {
                    info!(step = step_def.name.as_str(), "condition false, skipping step");
                    ctx.workflow.record_step_outputs(
                        &step_def.name,
                        StepResultSummary {
                            status: "skipped".to_string(),
                            data: None,
                            outputs: Default::default(),
                            error: None,
                        },
                    );
                    records.push(StepRunRecord {
                        name: step_def.name.clone(),
                        status: "skipped".to_string(),
                        error: None,
                    });
                    continue;
                }
            }

            let resolved_config = resolve_value(&step_def.config, &ctx.workflow.variables);
            let step = build_step(&step_def.step_type)?;
            match step.execute(ctx, &step_def.name, &resolved_config).await {
                Ok(outcome) => {
                    let mut outputs = outcome.outputs.clone();
                    for name in &step_def.outputs {
                        if !outputs.contains_key(name) {
                            if let Some(value) = outcome.data.as_ref().and_then(|d| d.get(name)).cloned() {
                                outputs.insert(name.clone(), value);
                            }
                        }
                    }
                    ctx.workflow.record_step_outputs(
                        &step_def.name,
                        StepResultSummary {
                            status: "success".to_string(),
                            data: outcome.data.clone(),
                            outputs,
                            error: None,
                        },
                    );
                    records.push(StepRunRecord {
                        name: step_def.name.clone(),
                        status: "success".to_string(),
                        error: None,
                    });
                }
                Err(e) => {
                    ctx.workflow.record_step_outputs(
                        &step_def.name,
                        StepResultSummary {
                            status: "failure".to_string(),
                            data: None,
                            outputs: Default::default(),
                            error: Some(e.to_string()),
                        },
                    );
                    records.push(StepRunRecord {
                        name: step_def.name.clone(),
                        status: "failure".to_string(),
                        error: Some(e.to_string()),
                    });
                    if step_def.continue_on_failure {
                        warn!(step = step_def.name.as_str(), error = %e, "step failed, continuing (continue_on_failure)");
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Ok(EngineRunSummary {
            workflow_name: self.definition.name.clone(),
            steps: records,
            aborted: ctx.workflow.is_aborted(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::WorkflowDefinition;
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
        let mut ctx = EngineContext::new(workflow, transport, vcs, task_client);
        ctx.skip_persona_operations = true;
        ctx
    }

    #[tokio::test]
    async fn runs_steps_in_dependency_order_and_mirrors_outputs() {
        let raw = r#"
name: task-flow
steps:
  - name: plan
    type: persona_request
    config:
      persona: planner
      intent: draft_plan
    outputs: [output]
  - name: review
    type: persona_request
    depends_on: [plan]
    config:
      persona: evaluator
      intent: review
      payload:
        previous: ${plan_output}
"#;
        let def = WorkflowDefinition::from_yaml_str(raw).unwrap();
        let engine = WorkflowEngine::new(def).unwrap();
        let ctx = test_ctx();

        let summary = engine.run(&ctx).await.unwrap();
        assert_eq!(summary.steps.len(), 2);
        assert_eq!(summary.steps[0].name, "plan");
        assert_eq!(summary.steps[1].name, "review");
        assert!(summary.steps.iter().all(|s| s.status == "success"));
        assert!(ctx.workflow.variables.get("plan_output").is_some());
    }

    #[tokio::test]
    async fn a_false_condition_skips_the_step_without_dispatching_it() {
        let raw = r#"
name: conditional
steps:
  - name: gated
    type: persona_request
    condition: "feature_enabled == true"
    config:
      persona: planner
"#;
        let def = WorkflowDefinition::from_yaml_str(raw).unwrap();
        let engine = WorkflowEngine::new(def).unwrap();
        let ctx = test_ctx();
        ctx.workflow.variables.set("feature_enabled", serde_json::json!(false));

        let summary = engine.run(&ctx).await.unwrap();
        assert_eq!(summary.steps[0].status, "skipped");
    }

    #[tokio::test]
    async fn continue_on_failure_keeps_walking_the_graph() {
        let raw = r#"
name: resilient
steps:
  - name: bad
    type: register_blocked_dependencies
    continue_on_failure: true
  - name: after
    type: variable_resolution
    config:
      expressions:
        ok: "true"
"#;
        let def = WorkflowDefinition::from_yaml_str(raw).unwrap();
        let engine = WorkflowEngine::new(def).unwrap();
        let ctx = test_ctx();

        let summary = engine.run(&ctx).await.unwrap();
        assert_eq!(summary.steps[0].status, "failure");
        assert_eq!(summary.steps[1].status, "success");
    }

    #[tokio::test]
    async fn a_failing_step_without_continue_on_failure_aborts_the_run() {
        let raw = r#"
name: strict
steps:
  - name: bad
    type: register_blocked_dependencies
  - name: never_runs
    type: variable_resolution
    depends_on: [bad]
    config:
      expressions:
        ok: "true"
"#;
        let def = WorkflowDefinition::from_yaml_str(raw).unwrap();
        let engine = WorkflowEngine::new(def).unwrap();
        let ctx = test_ctx();

        let err = engine.run(&ctx).await.unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
        assert!(ctx.workflow.step_output("never_runs").is_none());
    }
}
