//! PlanApprovalStep (spec §4.10, driving §4.8's state machine): exposes
//! `ma_plan::PlanApprovalLoop` as a workflow step, dispatching each
//! planner/evaluator round over the same request/response stream
//! plumbing `PersonaRequestStep` uses.

use std::collections::HashMap;

use async_trait::async_trait;
use ma_core::config::PlanApprovalConfig;
use ma_core::context::persona::{PLANNER, PLAN_EVALUATOR};
use ma_core::envelope::{PersonaRequestEnvelope, PersonaResultBody, TerminalResultBody};
use ma_core::AppError;
use ma_persona::dispatcher::request_to_fields;
use ma_persona::executor::synthetic_pass;
use ma_plan::{PersonaCaller, PlanApprovalLoop, PlanRequestContext};
use serde_json::{json, Value};

use super::persona_request::wait_for_response;
use super::{Step, StepOutcome};
use crate::context::EngineContext;

pub struct PlanApprovalStep;

struct StreamCaller<'a> {
    ctx: &'a EngineContext,
    step_name: &'a str,
    deadline_s: u64,
}

#[async_trait]
impl<'a> PersonaCaller for StreamCaller<'a> {
    async fn call(&self, persona: &str, intent: &str, payload: Value) -> Result<TerminalResultBody, AppError> {
        if self.ctx.skip_persona_operations {
            return Ok(synthetic_pass(persona));
        }

        let corr_id = ulid::Ulid::new().to_string();
        let envelope = PersonaRequestEnvelope {
            workflow_id: self.ctx.workflow.workflow_id.clone(),
            step: self.step_name.to_string(),
            from: self.ctx.engine_persona_name.clone(),
            to_persona: Some(persona.to_string()),
            intent: intent.to_string(),
            corr_id: corr_id.clone(),
            payload: serde_json::to_string(&payload)
                .map_err(|e| AppError::StepError(format!("encoding request payload: {e}")))?,
            repo: Some(self.ctx.workflow.repo_root.to_string_lossy().to_string()),
            branch: Some(self.ctx.workflow.branch.clone()),
            project_id: Some(self.ctx.workflow.project_id.clone()),
            task_id: self.ctx.workflow.task.as_ref().map(|t| t.id.clone()),
            deadline_s: self.deadline_s,
        };

        self.ctx
            .transport
            .append(&self.ctx.request_stream, request_to_fields(&envelope))
            .await
            .map_err(|e| AppError::TransportError(e.to_string()))?;

        let response = wait_for_response(self.ctx, &self.ctx.workflow.workflow_id, &corr_id, self.deadline_s).await?;
        if let Some(error) = response.error {
            return Err(AppError::PersonaFail {
                persona: persona.to_string(),
                reason: error,
            });
        }
        match PersonaResultBody::parse(&response.result)
            .map_err(|e| AppError::StepError(format!("decoding persona response: {e}")))?
        {
            PersonaResultBody::Terminal(terminal) => Ok(terminal),
            PersonaResultBody::InformationRequest(_) => Err(AppError::StepError(
                "engine received an information_request envelope directly on the event stream".to_string(),
            )),
        }
    }
}

fn plan_approval_config(config: &Value) -> PlanApprovalConfig {
    PlanApprovalConfig {
        plan_max_iterations_per_stage: config
            .get("plan_max_iterations_per_stage")
            .and_then(Value::as_u64)
            .map(|n| n as u32)
            .unwrap_or(5),
        require_citations: config.get("require_citations").and_then(Value::as_bool).unwrap_or(false),
        citation_fields: config
            .get("citation_fields")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default(),
        uncited_budget: config.get("uncited_budget").and_then(Value::as_u64).map(|n| n as u32).unwrap_or(0),
        treat_uncited_as_invalid: config.get("treat_uncited_as_invalid").and_then(Value::as_bool).unwrap_or(false),
    }
}

#[async_trait]
impl Step for PlanApprovalStep {
    async fn execute(&self, ctx: &EngineContext, step_name: &str, config: &Value) -> Result<StepOutcome, AppError> {
        let planner_persona = config
            .get("planner_persona")
            .and_then(Value::as_str)
            .unwrap_or(PLANNER)
            .to_string();
        let evaluator_persona = config
            .get("evaluator_persona")
            .and_then(Value::as_str)
            .unwrap_or(PLAN_EVALUATOR)
            .to_string();
        let qa_feedback = config
            .get("qa_feedback")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| ctx.workflow.variables.get("qa_feedback").and_then(|v| v.as_str().map(str::to_string)));
        let deadline_s = config.get("deadline_s").and_then(Value::as_u64).unwrap_or(ctx.default_deadline_s);

        if ctx.skip_persona_operations {
            let plan = ma_core::envelope::PlanPayload {
                plan: vec![ma_core::envelope::PlanStep {
                    goal: "synthetic goal (SKIP_PERSONA_OPERATIONS)".to_string(),
                    key_files: Vec::new(),
                    owners: None,
                    dependencies: None,
                }],
                meta: ma_core::envelope::PlanMeta {
                    plan_approved: Some(true),
                    reason: None,
                },
            };
            let mut outputs = HashMap::new();
            outputs.insert("plan".to_string(), serde_json::to_value(&plan).unwrap_or(Value::Null));
            outputs.insert("approved".to_string(), json!(true));
            outputs.insert("attempts".to_string(), json!(1));
            return Ok(StepOutcome::new(
                json!({"plan": plan, "approved": true, "history": Value::Array(Vec::new())}),
                outputs,
            ));
        }

        let caller = StreamCaller {
            ctx,
            step_name,
            deadline_s,
        };
        let loop_ = PlanApprovalLoop::new(
            &caller,
            plan_approval_config(config),
            PlanRequestContext {
                qa_feedback,
                planner_persona,
                evaluator_persona,
            },
        );
        let outcome = loop_.run().await?;

        let mut outputs = HashMap::new();
        outputs.insert(
            "plan".to_string(),
            serde_json::to_value(&outcome.plan).unwrap_or(Value::Null),
        );
        outputs.insert("approved".to_string(), json!(outcome.approved));
        outputs.insert("attempts".to_string(), json!(outcome.history.len()));

        Ok(StepOutcome::new(
            json!({"plan": outcome.plan, "approved": outcome.approved, "history": outcome.history}),
            outputs,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ma_core::context::WorkflowContext;
    use ma_core::envelope::{EventStatus, PersonaResponseEnvelope, PersonaStatus};
    use ma_persona::dispatcher::response_from_fields;
    use ma_task_client::TaskServiceClient;
    use ma_transport::LocalStreamTransport;
    use ma_vcs::VcsDriver;
    use std::sync::Arc;
    use std::time::Duration;

    fn test_ctx() -> EngineContext {
        let workflow = WorkflowContext::new("wf1", "proj1", std::env::temp_dir(), "main");
        let transport: Arc<dyn ma_transport::StreamTransport> = Arc::new(LocalStreamTransport::new());
        let vcs = Arc::new(VcsDriver::default());
        let task_client: Option<Arc<TaskServiceClient>> = None;
        EngineContext::new(workflow, transport, vcs, task_client)
    }

    fn response_fields(response: &PersonaResponseEnvelope) -> HashMap<String, String> {
        let mut fields = HashMap::new();
        fields.insert("workflow_id".to_string(), response.workflow_id.clone());
        fields.insert("from_persona".to_string(), response.from_persona.clone());
        fields.insert("status".to_string(), "done".to_string());
        fields.insert("corr_id".to_string(), response.corr_id.clone());
        fields.insert("step".to_string(), response.step.clone());
        fields.insert("result".to_string(), response.result.clone());
        fields.insert("duration_ms".to_string(), response.duration_ms.to_string());
        fields
    }

    /// Drains one request-stream entry addressed to `persona` and answers
    /// it with a scripted terminal result, mimicking a persona dispatcher.
    async fn answer_one(ctx: &EngineContext, persona: &str, terminal: TerminalResultBody) {
        loop {
            let entries = ctx.transport.range(&ctx.request_stream, 1, u64::MAX).await.unwrap_or_default();
            if let Some(entry) = entries.iter().find(|e| e.fields.get("to_persona").map(String::as_str) == Some(persona)) {
                let corr_id = entry.fields.get("corr_id").cloned().unwrap();
                let workflow_id = entry.fields.get("workflow_id").cloned().unwrap();
                let response = PersonaResponseEnvelope {
                    workflow_id,
                    from_persona: persona.to_string(),
                    status: EventStatus::Done,
                    corr_id,
                    step: entry.fields.get("step").cloned().unwrap_or_default(),
                    result: serde_json::to_string(&PersonaResultBody::Terminal(terminal)).unwrap(),
                    duration_ms: 5,
                    ts: None,
                    error: None,
                };
                ctx.transport.append(&ctx.event_stream, response_fields(&response)).await.unwrap();
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn approves_on_the_first_evaluator_pass() {
        let ctx = test_ctx();
        let driver_ctx = ctx.clone();
        let driver = tokio::spawn(async move {
            answer_one(
                &driver_ctx,
                PLANNER,
                TerminalResultBody {
                    output: "plan v1".to_string(),
                    status: PersonaStatus::Pass,
                    payload: Some(json!({"plan": [{"goal": "x", "key_files": ["src/x.ts"]}]})),
                    duration_ms: 5,
                    extra: HashMap::new(),
                },
            )
            .await;
            answer_one(
                &driver_ctx,
                PLAN_EVALUATOR,
                TerminalResultBody {
                    output: "looks good".to_string(),
                    status: PersonaStatus::Pass,
                    payload: None,
                    duration_ms: 5,
                    extra: HashMap::new(),
                },
            )
            .await;
        });

        let outcome = PlanApprovalStep
            .execute(&ctx, "plan_approval", &json!({"deadline_s": 5}))
            .await
            .unwrap();

        assert_eq!(outcome.outputs["approved"], json!(true));
        assert_eq!(outcome.outputs["attempts"], json!(1));
        driver.await.unwrap();
    }

    #[tokio::test]
    async fn skip_persona_operations_synthesizes_an_approved_plan() {
        let mut ctx = test_ctx();
        ctx.skip_persona_operations = true;
        let outcome = PlanApprovalStep.execute(&ctx, "plan_approval", &json!({})).await.unwrap();
        assert_eq!(outcome.outputs["approved"], json!(true));
    }
}
