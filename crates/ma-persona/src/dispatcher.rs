//! Persona Dispatcher (spec §4.5): one long-lived consumer-group loop per
//! configured persona.
//!
//! Grounded on the long-lived accept loop shape in `csa-mcp-hub/src/serve.rs`
//! (blocking read, dispatch, loop), generalized from a socket accept loop to
//! a stream consumer-group read loop.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use ma_core::config::OrchestratorConfig;
use ma_core::envelope::{EventStatus, PersonaRequestEnvelope, PersonaResponseEnvelope, PersonaResultBody, TerminalResultBody};
use ma_core::AppError;
use ma_transport::{GroupStart, ReadOptions, StreamEntry, StreamTransport};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::executor::{ExecutorInput, PersonaRequestExecutor};
use crate::prompt::TaskSummary;
use crate::retry::RetrySchedule;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub persona: String,
    pub group_prefix: String,
    pub request_stream: String,
    pub event_stream: String,
    pub consumer_name: String,
    pub batch_size: usize,
    pub block_ms: u64,
    pub default_model: String,
}

impl DispatcherConfig {
    /// The consumer group name this persona's loop reads under: spec §4.5
    /// step 1, `"{group_prefix}:{P}"`.
    pub fn group_name(&self) -> String {
        format!("{}:{}", self.group_prefix, self.persona)
    }
}

/// One persona's consumer loop over the request stream. Multiple processes
/// may host the same persona's group concurrently (spec §4.5); this type
/// models a single such consumer.
pub struct PersonaDispatcherLoop<T: StreamTransport> {
    transport: Arc<T>,
    executor: Arc<PersonaRequestExecutor>,
    config: Arc<OrchestratorConfig>,
    dispatcher: DispatcherConfig,
}

impl<T: StreamTransport> PersonaDispatcherLoop<T> {
    pub fn new(
        transport: Arc<T>,
        executor: Arc<PersonaRequestExecutor>,
        config: Arc<OrchestratorConfig>,
        dispatcher: DispatcherConfig,
    ) -> Self {
        Self {
            transport,
            executor,
            config,
            dispatcher,
        }
    }

    /// Ensure this persona's consumer group exists. `AlreadyExists` is
    /// benign (spec §4.5 step 1).
    pub async fn ensure_group(&self) {
        let group = self.dispatcher.group_name();
        match self
            .transport
            .group_create(&self.dispatcher.request_stream, &group, GroupStart::Zero)
            .await
        {
            Ok(()) | Err(ma_transport::TransportError::AlreadyExists(_, _)) => {}
            Err(e) => warn!(persona = %self.dispatcher.persona, error = %e, "failed to create consumer group"),
        }
    }

    /// Run the loop until `cancel` is triggered. Each iteration blocks for
    /// up to `block_ms` on the transport read (spec §5 blocking points).
    pub async fn run(&self, cancel: CancellationToken) {
        self.ensure_group().await;
        loop {
            if cancel.is_cancelled() {
                return;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.read_and_process_batch() => {
                    if let Err(e) = result {
                        warn!(persona = %self.dispatcher.persona, error = %e, "dispatcher batch failed");
                    }
                }
            }
        }
    }

    async fn read_and_process_batch(&self) -> Result<(), ma_transport::TransportError> {
        let group = self.dispatcher.group_name();
        let entries = self
            .transport
            .read_group(
                &self.dispatcher.request_stream,
                &group,
                &self.dispatcher.consumer_name,
                ReadOptions {
                    block_ms: self.dispatcher.block_ms,
                    count: self.dispatcher.batch_size.max(1),
                },
            )
            .await?;

        for entry in entries {
            self.process_entry(&group, entry).await;
        }
        Ok(())
    }

    /// Process one request-stream entry: filter by `to_persona`, execute,
    /// publish a response, ack (spec §4.5 steps 3-4).
    async fn process_entry(&self, group: &str, entry: StreamEntry) {
        let span = info_span!("persona_dispatch", persona = %self.dispatcher.persona, entry_id = entry.id);
        async {
            let envelope = match envelope_from_fields(&entry.fields) {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "malformed request-stream entry, acking without processing");
                    let _ = self.transport.ack(&self.dispatcher.request_stream, group, entry.id).await;
                    return;
                }
            };

            if let Some(target) = &envelope.to_persona {
                if target != &self.dispatcher.persona {
                    let _ = self.transport.ack(&self.dispatcher.request_stream, group, entry.id).await;
                    return;
                }
            }

            let response = self.execute(&envelope).await;
            self.publish_response(&envelope, response).await;
            let _ = self.transport.ack(&self.dispatcher.request_stream, group, entry.id).await;
        }
        .instrument(span)
        .await;
    }

    async fn execute(&self, envelope: &PersonaRequestEnvelope) -> Result<(TerminalResultBody, u64), AppError> {
        let payload: Value = serde_json::from_str(&envelope.payload).unwrap_or(Value::Null);
        let model = self
            .config
            .personas
            .get(&self.dispatcher.persona)
            .and_then(|p| p.model.clone())
            .unwrap_or_else(|| self.dispatcher.default_model.clone());
        let schedule = RetrySchedule {
            base_timeout_ms: self.config.base_timeout_ms(&self.dispatcher.persona),
            backoff_increment_ms: self.config.retry_defaults.backoff_increment_ms,
            max_retries: self.config.max_retries(&self.dispatcher.persona),
        };

        let input = ExecutorInput {
            persona: self.dispatcher.persona.clone(),
            intent: envelope.intent.clone(),
            corr_id: envelope.corr_id.clone(),
            payload,
            repo_root: envelope.repo.as_ref().map(PathBuf::from),
            task: None::<TaskSummary>,
            variables: HashMap::new(),
            model,
            schedule,
        };

        let outcome = self.executor.execute(input).await?;
        Ok((outcome.result, outcome.duration_ms))
    }

    /// Publish the event-stream envelope. Per spec §4.5 step 4, this
    /// happens "regardless of outcome": an executor error becomes a
    /// synthesized `status:fail` result rather than redelivery.
    async fn publish_response(
        &self,
        envelope: &PersonaRequestEnvelope,
        outcome: Result<(TerminalResultBody, u64), AppError>,
    ) {
        let (result_body, duration_ms, error) = match outcome {
            Ok((result, duration_ms)) => (result, duration_ms, None),
            Err(e) => {
                let env = e.to_envelope();
                warn!(persona = %self.dispatcher.persona, corr_id = %envelope.corr_id, error = %env.details, "persona execution failed");
                (
                    TerminalResultBody {
                        output: String::new(),
                        status: ma_core::envelope::PersonaStatus::Fail,
                        payload: None,
                        duration_ms: 0,
                        extra: HashMap::new(),
                    },
                    0,
                    Some(env.details),
                )
            }
        };

        let result_json = serde_json::to_string(&PersonaResultBody::Terminal(result_body))
            .unwrap_or_else(|_| "{}".to_string());
        let response = PersonaResponseEnvelope {
            workflow_id: envelope.workflow_id.clone(),
            from_persona: self.dispatcher.persona.clone(),
            status: EventStatus::Done,
            corr_id: envelope.corr_id.clone(),
            step: envelope.step.clone(),
            result: result_json,
            duration_ms,
            ts: Some(chrono::Utc::now()),
            error,
        };

        let fields = response_to_fields(&response);
        if let Err(e) = self.transport.append(&self.dispatcher.event_stream, fields).await {
            warn!(error = %e, "failed to publish persona response to event stream");
        } else {
            info!(persona = %self.dispatcher.persona, corr_id = %envelope.corr_id, "published persona response");
        }
    }
}

/// Decode a request-stream entry's flattened string fields back into a
/// typed envelope (spec §6: "all fields are string-valued on the wire").
fn envelope_from_fields(fields: &HashMap<String, String>) -> Result<PersonaRequestEnvelope, String> {
    let get = |k: &str| fields.get(k).cloned().ok_or_else(|| format!("missing field '{k}'"));
    Ok(PersonaRequestEnvelope {
        workflow_id: get("workflow_id")?,
        step: get("step")?,
        from: get("from")?,
        to_persona: fields.get("to_persona").cloned(),
        intent: get("intent")?,
        corr_id: get("corr_id")?,
        payload: fields.get("payload").cloned().unwrap_or_else(|| "{}".to_string()),
        repo: fields.get("repo").cloned(),
        branch: fields.get("branch").cloned(),
        project_id: fields.get("project_id").cloned(),
        task_id: fields.get("task_id").cloned(),
        deadline_s: fields.get("deadline_s").and_then(|v| v.parse().ok()).unwrap_or(0),
    })
}

pub fn request_to_fields(envelope: &PersonaRequestEnvelope) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    fields.insert("workflow_id".to_string(), envelope.workflow_id.clone());
    fields.insert("step".to_string(), envelope.step.clone());
    fields.insert("from".to_string(), envelope.from.clone());
    if let Some(to) = &envelope.to_persona {
        fields.insert("to_persona".to_string(), to.clone());
    }
    fields.insert("intent".to_string(), envelope.intent.clone());
    fields.insert("corr_id".to_string(), envelope.corr_id.clone());
    fields.insert("payload".to_string(), envelope.payload.clone());
    if let Some(repo) = &envelope.repo {
        fields.insert("repo".to_string(), repo.clone());
    }
    if let Some(branch) = &envelope.branch {
        fields.insert("branch".to_string(), branch.clone());
    }
    if let Some(pid) = &envelope.project_id {
        fields.insert("project_id".to_string(), pid.clone());
    }
    if let Some(tid) = &envelope.task_id {
        fields.insert("task_id".to_string(), tid.clone());
    }
    fields.insert("deadline_s".to_string(), envelope.deadline_s.to_string());
    fields
}

fn response_to_fields(envelope: &PersonaResponseEnvelope) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    fields.insert("workflow_id".to_string(), envelope.workflow_id.clone());
    fields.insert("from_persona".to_string(), envelope.from_persona.clone());
    fields.insert(
        "status".to_string(),
        match envelope.status {
            EventStatus::Done => "done".to_string(),
            EventStatus::Error => "error".to_string(),
        },
    );
    fields.insert("corr_id".to_string(), envelope.corr_id.clone());
    fields.insert("step".to_string(), envelope.step.clone());
    fields.insert("result".to_string(), envelope.result.clone());
    fields.insert("duration_ms".to_string(), envelope.duration_ms.to_string());
    if let Some(ts) = envelope.ts {
        fields.insert("ts".to_string(), ts.to_rfc3339());
    }
    if let Some(error) = &envelope.error {
        fields.insert("error".to_string(), error.clone());
    }
    fields
}

/// Decode an event-stream entry's flattened string fields back into a
/// typed response envelope; used by the correlating waiter (ma-plan,
/// ma-workflow) that scans the event stream for a matching `corr_id`.
pub fn response_from_fields(fields: &HashMap<String, String>) -> Result<PersonaResponseEnvelope, String> {
    let get = |k: &str| fields.get(k).cloned().ok_or_else(|| format!("missing field '{k}'"));
    let status = match get("status")?.as_str() {
        "done" => EventStatus::Done,
        "error" => EventStatus::Error,
        other => return Err(format!("unknown status '{other}'")),
    };
    Ok(PersonaResponseEnvelope {
        workflow_id: get("workflow_id")?,
        from_persona: get("from_persona")?,
        status,
        corr_id: get("corr_id")?,
        step: get("step")?,
        result: get("result")?,
        duration_ms: fields.get("duration_ms").and_then(|v| v.parse().ok()).unwrap_or(0),
        ts: fields.get("ts").and_then(|v| chrono::DateTime::parse_from_rfc3339(v).ok()).map(|d| d.with_timezone(&chrono::Utc)),
        error: fields.get("error").cloned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ma_core::config::OrchestratorConfig;
    use ma_lm_client::LmClient;
    use ma_transport::LocalStreamTransport;
    use std::sync::Arc;

    fn make_dispatcher(persona: &str) -> PersonaDispatcherLoop<LocalStreamTransport> {
        let transport = Arc::new(LocalStreamTransport::new());
        let lm_client = Arc::new(LmClient::new("http://localhost:9", "key"));
        let executor = Arc::new(PersonaRequestExecutor::new(lm_client, HashMap::new(), Default::default(), None));
        let config = Arc::new(OrchestratorConfig::default());
        let dispatcher = DispatcherConfig {
            persona: persona.to_string(),
            group_prefix: "req".to_string(),
            request_stream: "requests".to_string(),
            event_stream: "events".to_string(),
            consumer_name: "c1".to_string(),
            batch_size: 1,
            block_ms: 20,
            default_model: "gpt-test".to_string(),
        };
        PersonaDispatcherLoop::new(transport, executor, config, dispatcher)
    }

    #[test]
    fn group_name_is_prefixed_by_persona() {
        let dispatcher = DispatcherConfig {
            persona: "planner".to_string(),
            group_prefix: "req".to_string(),
            request_stream: "requests".to_string(),
            event_stream: "events".to_string(),
            consumer_name: "c1".to_string(),
            batch_size: 1,
            block_ms: 20,
            default_model: "gpt-test".to_string(),
        };
        assert_eq!(dispatcher.group_name(), "req:planner");
    }

    #[tokio::test]
    async fn entries_for_other_personas_are_acked_and_skipped() {
        let loop_ = make_dispatcher("planner");
        loop_.ensure_group().await;

        let envelope = PersonaRequestEnvelope {
            workflow_id: "wf1".to_string(),
            step: "plan".to_string(),
            from: "engine".to_string(),
            to_persona: Some("qa".to_string()),
            intent: "review".to_string(),
            corr_id: "c1".to_string(),
            payload: "{}".to_string(),
            repo: None,
            branch: None,
            project_id: None,
            task_id: None,
            deadline_s: 30,
        };
        loop_
            .transport
            .append("requests", request_to_fields(&envelope))
            .await
            .unwrap();

        loop_.read_and_process_batch().await.unwrap();

        // No response should have been published for a persona-mismatched entry.
        let events = loop_.transport.range("events", 0, u64::MAX).await;
        assert!(events.map(|e| e.is_empty()).unwrap_or(true));
    }

    #[tokio::test]
    async fn executor_error_publishes_fail_result_instead_of_redelivery() {
        let loop_ = make_dispatcher("implementer");
        loop_.ensure_group().await;

        let envelope = PersonaRequestEnvelope {
            workflow_id: "wf1".to_string(),
            step: "impl".to_string(),
            from: "engine".to_string(),
            to_persona: Some("implementer".to_string()),
            intent: "do it".to_string(),
            corr_id: "c2".to_string(),
            payload: "{}".to_string(),
            repo: None,
            branch: None,
            project_id: None,
            task_id: None,
            deadline_s: 1,
        };
        loop_
            .transport
            .append("requests", request_to_fields(&envelope))
            .await
            .unwrap();

        loop_.read_and_process_batch().await.unwrap();

        let events = loop_.transport.range("events", 0, u64::MAX).await.unwrap();
        assert_eq!(events.len(), 1);
        let response = response_from_fields(&events[0].fields).unwrap();
        assert_eq!(response.status, EventStatus::Done);
        assert!(response.error.is_some());
    }
}
