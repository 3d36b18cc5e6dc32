//! PersonaRequestStep (spec §4.10): publishes a request-stream entry
//! addressed to one persona and blocks for the matching event-stream
//! response, distinct from the in-process retry/information-request loop
//! already owned by `ma_persona::executor::PersonaRequestExecutor` (that
//! loop runs *inside* the dispatcher that answers this request). The
//! engine and the dispatcher loops are decoupled purely via the stream
//! transport, even though in this single-binary workspace they run as
//! concurrent tasks sharing one transport instance.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use ma_core::context::persona::STATUS_REQUIRED;
use ma_core::envelope::{PersonaRequestEnvelope, PersonaResultBody, PersonaStatus};
use ma_core::AppError;
use ma_persona::dispatcher::{request_to_fields, response_from_fields};
use ma_persona::executor::synthetic_pass;
use ma_transport::{StreamId, TransportError};
use serde_json::{json, Value};

use super::{Step, StepOutcome};
use crate::context::EngineContext;

pub struct PersonaRequestStep;

const POLL_INTERVAL_MS: u64 = 50;

#[async_trait]
impl Step for PersonaRequestStep {
    async fn execute(
        &self,
        ctx: &EngineContext,
        step_name: &str,
        config: &Value,
    ) -> Result<StepOutcome, AppError> {
        let persona = config
            .get("persona")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::ConfigError(format!("step '{step_name}': missing 'persona'")))?
            .to_string();
        let intent = config
            .get("intent")
            .and_then(Value::as_str)
            .unwrap_or(step_name)
            .to_string();
        let payload = config.get("payload").cloned().unwrap_or_else(|| json!({}));
        let deadline_s = config
            .get("deadline_s")
            .and_then(Value::as_u64)
            .unwrap_or(ctx.default_deadline_s);

        if ctx.skip_persona_operations {
            let result = synthetic_pass(&persona);
            let payload = result.payload.clone().unwrap_or(Value::Null);
            return Ok(outcome_from_terminal(&result.output, "pass", &payload));
        }

        let corr_id = ulid::Ulid::new().to_string();
        let envelope = PersonaRequestEnvelope {
            workflow_id: ctx.workflow.workflow_id.clone(),
            step: step_name.to_string(),
            from: ctx.engine_persona_name.clone(),
            to_persona: Some(persona.clone()),
            intent,
            corr_id: corr_id.clone(),
            payload: serde_json::to_string(&payload)
                .map_err(|e| AppError::StepError(format!("encoding request payload: {e}")))?,
            repo: Some(ctx.workflow.repo_root.to_string_lossy().to_string()),
            branch: Some(ctx.workflow.branch.clone()),
            project_id: Some(ctx.workflow.project_id.clone()),
            task_id: ctx.workflow.task.as_ref().map(|t| t.id.clone()),
            deadline_s,
        };

        ctx.transport
            .append(&ctx.request_stream, request_to_fields(&envelope))
            .await
            .map_err(|e| AppError::TransportError(e.to_string()))?;

        let response = wait_for_response(ctx, &ctx.workflow.workflow_id, &corr_id, deadline_s).await?;

        if let Some(error) = response.error {
            return Err(AppError::PersonaFail { persona, reason: error });
        }

        let body = PersonaResultBody::parse(&response.result)
            .map_err(|e| AppError::StepError(format!("decoding persona response: {e}")))?;
        match body {
            PersonaResultBody::Terminal(terminal) => match terminal.status {
                PersonaStatus::Fail => Err(AppError::PersonaFail {
                    persona,
                    reason: terminal.output,
                }),
                PersonaStatus::Unknown if STATUS_REQUIRED.contains(&persona.as_str()) => {
                    Err(AppError::PersonaUnknown { persona })
                }
                _ => {
                    let status = status_str(terminal.status);
                    let payload = terminal.payload.clone().unwrap_or(Value::Null);
                    Ok(outcome_from_terminal(&terminal.output, status, &payload))
                }
            },
            PersonaResultBody::InformationRequest(_) => Err(AppError::StepError(
                "engine received an information_request envelope directly on the event stream".to_string(),
            )),
        }
    }
}

fn status_str(status: PersonaStatus) -> &'static str {
    match status {
        PersonaStatus::Pass => "pass",
        PersonaStatus::Fail => "fail",
        PersonaStatus::Unknown => "unknown",
    }
}

fn outcome_from_terminal(output: &str, status: &str, payload: &Value) -> StepOutcome {
    let mut outputs = HashMap::new();
    outputs.insert("output".to_string(), Value::String(output.to_string()));
    outputs.insert("status".to_string(), Value::String(status.to_string()));
    outputs.insert("payload".to_string(), payload.clone());
    StepOutcome::new(
        json!({"output": output, "status": status, "payload": payload}),
        outputs,
    )
}

pub(crate) async fn wait_for_response(
    ctx: &EngineContext,
    workflow_id: &str,
    corr_id: &str,
    deadline_s: u64,
) -> Result<ma_core::envelope::PersonaResponseEnvelope, AppError> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(deadline_s.max(1));
    let mut last_checked: StreamId = 0;

    loop {
        match ctx.transport.range(&ctx.event_stream, last_checked + 1, StreamId::MAX).await {
            Ok(entries) => {
                for entry in &entries {
                    last_checked = last_checked.max(entry.id);
                    let Ok(response) = response_from_fields(&entry.fields) else { continue };
                    if response.workflow_id == workflow_id && response.corr_id == corr_id {
                        return Ok(response);
                    }
                }
            }
            Err(TransportError::UnknownStream(_)) => {}
            Err(e) => return Err(AppError::TransportError(e.to_string())),
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(AppError::TransportTimeout(deadline_s * 1000));
        }
        tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
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

    fn test_ctx(skip: bool) -> EngineContext {
        let workflow = WorkflowContext::new("wf1", "proj1", std::env::temp_dir(), "main");
        let transport: Arc<dyn ma_transport::StreamTransport> = Arc::new(LocalStreamTransport::new());
        let vcs = Arc::new(VcsDriver::default());
        let task_client: Option<Arc<TaskServiceClient>> = None;
        let mut ctx = EngineContext::new(workflow, transport, vcs, task_client);
        ctx.skip_persona_operations = skip;
        ctx
    }

    #[tokio::test]
    async fn skip_persona_operations_synthesizes_a_pass_without_publishing() {
        let ctx = test_ctx(true);
        let outcome = PersonaRequestStep
            .execute(&ctx, "plan", &json!({"persona": "planner", "intent": "draft_plan"}))
            .await
            .unwrap();
        assert_eq!(outcome.outputs["status"], Value::String("pass".to_string()));
    }

    #[tokio::test]
    async fn times_out_when_no_response_is_published() {
        let ctx = test_ctx(false);
        let err = PersonaRequestStep
            .execute(
                &ctx,
                "plan",
                &json!({"persona": "planner", "intent": "draft_plan", "deadline_s": 1}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TransportTimeout(_)));
    }

    #[tokio::test]
    async fn matching_response_on_event_stream_resolves_the_step() {
        let ctx = test_ctx(false);

        let publisher_ctx = ctx.clone();
        let publish = tokio::spawn(async move {
            // Poll the request stream for the corr_id the step assigns, then
            // answer it, mimicking a persona dispatcher loop.
            loop {
                let entries = publisher_ctx
                    .transport
                    .range(&publisher_ctx.request_stream, 1, u64::MAX)
                    .await
                    .unwrap_or_default();
                if let Some(entry) = entries.first() {
                    let corr_id = entry.fields.get("corr_id").cloned().unwrap();
                    let workflow_id = entry.fields.get("workflow_id").cloned().unwrap();
                    let response = ma_core::envelope::PersonaResponseEnvelope {
                        workflow_id,
                        from_persona: "planner".to_string(),
                        status: ma_core::envelope::EventStatus::Done,
                        corr_id,
                        step: "plan".to_string(),
                        result: serde_json::to_string(&ma_core::envelope::PersonaResultBody::Terminal(
                            ma_core::envelope::TerminalResultBody {
                                output: "done".to_string(),
                                status: PersonaStatus::Pass,
                                payload: Some(json!({"plan": []})),
                                duration_ms: 5,
                                extra: HashMap::new(),
                            },
                        ))
                        .unwrap(),
                        duration_ms: 5,
                        ts: None,
                        error: None,
                    };
                    let response_fields = response_fields_for_test(&response);
                    publisher_ctx
                        .transport
                        .append(&publisher_ctx.event_stream, response_fields)
                        .await
                        .unwrap();
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let outcome = PersonaRequestStep
            .execute(
                &ctx,
                "plan",
                &json!({"persona": "planner", "intent": "draft_plan", "deadline_s": 5}),
            )
            .await
            .unwrap();
        assert_eq!(outcome.outputs["status"], Value::String("pass".to_string()));
        publish.await.unwrap();
    }

    fn response_fields_for_test(
        response: &ma_core::envelope::PersonaResponseEnvelope,
    ) -> HashMap<String, String> {
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
}
