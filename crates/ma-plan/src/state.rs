//! States: `Request -> AwaitPlan -> AwaitEvaluation -> (Approved | Revise) -> ...`
//! (spec §4.8). The transitions themselves are folded into `PlanApprovalLoop::run`
//! rather than modeled as a separate enum dispatch, since every state but
//! `Revise` is a single request/response round with no internal branching
//! worth naming on its own — `csa-session/src/state.rs`'s `SessionPhase::transition`
//! is the nearest teacher analogue for the bookkeeping shape (bounded
//! attempts, a terminal "give up" outcome) even though the transition
//! function there is synchronous and this one dispatches personas.

use async_trait::async_trait;
use ma_core::config::PlanApprovalConfig;
use ma_core::envelope::{PersonaStatus, PlanMeta, PlanPayload, PlanStep, TerminalResultBody};
use ma_core::AppError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

/// Citation policy forwarded to both planner and evaluator every attempt
/// (spec §4.8 `Request` transition).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CitationPolicy {
    pub require_citations: bool,
    pub citation_fields: Vec<String>,
    pub uncited_budget: u32,
    pub treat_uncited_as_invalid: bool,
}

impl From<&PlanApprovalConfig> for CitationPolicy {
    fn from(cfg: &PlanApprovalConfig) -> Self {
        Self {
            require_citations: cfg.require_citations,
            citation_fields: cfg.citation_fields.clone(),
            uncited_budget: cfg.uncited_budget,
            treat_uncited_as_invalid: cfg.treat_uncited_as_invalid,
        }
    }
}

/// One planner/evaluator round, kept for the caller's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanAttempt {
    pub attempt: u32,
    pub plan_text: String,
    pub plan: Option<PlanPayload>,
    pub evaluator_status: PersonaStatus,
    pub evaluator_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanApprovalOutcome {
    pub plan_text: String,
    pub plan: PlanPayload,
    pub history: Vec<PlanAttempt>,
    pub approved: bool,
}

/// Caller-supplied hook to dispatch a persona request and wait for its
/// terminal result. A trait boundary keeps the state machine testable
/// without a transport or LM client, mirroring how `csa-scheduler`'s
/// failover policy is kept separate from the I/O that executes its
/// decisions.
#[async_trait]
pub trait PersonaCaller: Send + Sync {
    async fn call(
        &self,
        persona: &str,
        intent: &str,
        payload: Value,
    ) -> Result<TerminalResultBody, AppError>;
}

#[derive(Debug, Clone)]
pub struct PlanRequestContext {
    pub qa_feedback: Option<String>,
    pub planner_persona: String,
    pub evaluator_persona: String,
}

pub struct PlanApprovalLoop<'a, C: PersonaCaller> {
    caller: &'a C,
    config: PlanApprovalConfig,
    context: PlanRequestContext,
}

impl<'a, C: PersonaCaller> PlanApprovalLoop<'a, C> {
    pub fn new(caller: &'a C, config: PlanApprovalConfig, context: PlanRequestContext) -> Self {
        Self {
            caller,
            config,
            context,
        }
    }

    pub async fn run(&self) -> Result<PlanApprovalOutcome, AppError> {
        let policy = CitationPolicy::from(&self.config);
        let mut history: Vec<PlanAttempt> = Vec::new();
        let mut feedback_note: Option<String> = None;

        for attempt in 1..=self.config.plan_max_iterations_per_stage {
            // Request
            let planner_payload = json!({
                "qa_feedback": self.context.qa_feedback,
                "plan_feedback": feedback_note,
                "attempt": attempt,
                "citation_policy": policy,
            });
            let planner_result = self
                .caller
                .call(&self.context.planner_persona, "produce_plan", planner_payload)
                .await?;
            let plan_text = planner_result.output.clone();

            // AwaitPlan
            let plan = extract_plan(&planner_result);
            let Some(plan) = plan.filter(|p| !p.plan.is_empty()) else {
                info!(attempt, "planner returned an empty plan, forcing revision");
                history.push(PlanAttempt {
                    attempt,
                    plan_text: plan_text.clone(),
                    plan: None,
                    evaluator_status: PersonaStatus::Fail,
                    evaluator_reason: Some("empty plan".to_string()),
                });
                feedback_note = Some(build_feedback_note(
                    self.context.qa_feedback.as_deref(),
                    "empty plan",
                ));
                continue;
            };

            // AwaitEvaluation
            let evaluator_payload = json!({
                "qa_feedback": self.context.qa_feedback,
                "plan": plan,
                "citation_policy": policy,
            });
            let evaluator_result = self
                .caller
                .call(&self.context.evaluator_persona, "evaluate_plan", evaluator_payload)
                .await?;
            let evaluator_reason = evaluator_result
                .payload
                .as_ref()
                .and_then(|p| p.get("reason"))
                .and_then(Value::as_str)
                .map(str::to_string);

            history.push(PlanAttempt {
                attempt,
                plan_text: plan_text.clone(),
                plan: Some(plan.clone()),
                evaluator_status: evaluator_result.status,
                evaluator_reason: evaluator_reason.clone(),
            });

            // Approved
            if evaluator_result.status == PersonaStatus::Pass {
                let mut approved = plan;
                approved.meta.plan_approved = Some(true);
                approved.meta.reason = None;
                return Ok(PlanApprovalOutcome {
                    plan_text,
                    plan: approved,
                    history,
                    approved: true,
                });
            }

            // Revise
            let reason = evaluator_reason.as_deref().unwrap_or("evaluator rejected the plan");
            feedback_note = Some(build_feedback_note(self.context.qa_feedback.as_deref(), reason));
        }

        warn!(
            attempts = self.config.plan_max_iterations_per_stage,
            "plan approval iteration limit exceeded"
        );
        let (plan_text, plan) = history
            .last()
            .map(|a| (a.plan_text.clone(), a.plan.clone()))
            .unwrap_or_default();
        let mut plan = plan.unwrap_or_else(|| PlanPayload {
            plan: Vec::new(),
            meta: PlanMeta::default(),
        });
        plan.meta.plan_approved = Some(false);
        plan.meta.reason = Some("iteration_limit_exceeded".to_string());

        Ok(PlanApprovalOutcome {
            plan_text,
            plan,
            history,
            approved: false,
        })
    }
}

/// Extract the plan array from a planner's terminal payload via the fields
/// `plan | steps | items` (spec §4.8 `AwaitPlan`). Entries that don't
/// deserialize as a `PlanStep` are dropped rather than failing the whole
/// extraction.
fn extract_plan(result: &TerminalResultBody) -> Option<PlanPayload> {
    let payload = result.payload.as_ref()?;
    let array = ["plan", "steps", "items"]
        .iter()
        .find_map(|key| payload.get(key))
        .and_then(Value::as_array)?;
    let steps: Vec<PlanStep> = array
        .iter()
        .filter_map(|v| serde_json::from_value(v.clone()).ok())
        .collect();
    Some(PlanPayload {
        plan: steps,
        meta: PlanMeta::default(),
    })
}

/// Combine QA feedback and the evaluator's reason into guidance requiring a
/// verbatim `acknowledged_feedback` echo and a `plan_changes_mapping` array
/// on the next attempt (spec §4.8 `Revise`).
fn build_feedback_note(qa_feedback: Option<&str>, evaluator_reason: &str) -> String {
    let qa_part = qa_feedback
        .map(|f| format!("QA feedback: {f}\n"))
        .unwrap_or_default();
    format!(
        "{qa_part}Evaluator reason: {evaluator_reason}\n\
         Your next plan must include an `acknowledged_feedback` field that verbatim echoes \
         this feedback, and a `plan_changes_mapping` array describing what changed and why."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedCaller {
        responses: Mutex<Vec<(String, TerminalResultBody)>>,
    }

    #[async_trait]
    impl PersonaCaller for ScriptedCaller {
        async fn call(&self, persona: &str, _intent: &str, _payload: Value) -> Result<TerminalResultBody, AppError> {
            let mut responses = self.responses.lock().unwrap();
            assert!(!responses.is_empty(), "no more scripted responses");
            let (expected_persona, result) = responses.remove(0);
            assert_eq!(persona, expected_persona);
            Ok(result)
        }
    }

    fn terminal(status: PersonaStatus, payload: Value) -> TerminalResultBody {
        TerminalResultBody {
            output: "ok".to_string(),
            status,
            payload: Some(payload),
            duration_ms: 10,
            extra: Default::default(),
        }
    }

    fn context() -> PlanRequestContext {
        PlanRequestContext {
            qa_feedback: None,
            planner_persona: "planner".to_string(),
            evaluator_persona: "plan-evaluator".to_string(),
        }
    }

    #[tokio::test]
    async fn approves_on_first_pass() {
        let caller = ScriptedCaller {
            responses: Mutex::new(vec![
                (
                    "planner".to_string(),
                    terminal(PersonaStatus::Unknown, json!({"plan": [{"goal": "do x", "key_files": ["a.rs"]}]})),
                ),
                ("plan-evaluator".to_string(), terminal(PersonaStatus::Pass, json!({}))),
            ]),
        };
        let config = PlanApprovalConfig::default();
        let outcome = PlanApprovalLoop::new(&caller, config, context()).run().await.unwrap();
        assert!(outcome.approved);
        assert_eq!(outcome.plan.meta.plan_approved, Some(true));
        assert_eq!(outcome.history.len(), 1);
    }

    #[tokio::test]
    async fn revision_round_trip_reaches_approval_on_second_attempt() {
        let caller = ScriptedCaller {
            responses: Mutex::new(vec![
                (
                    "planner".to_string(),
                    terminal(PersonaStatus::Unknown, json!({"plan": [{"goal": "do x", "key_files": ["a.rs"]}]})),
                ),
                (
                    "plan-evaluator".to_string(),
                    terminal(PersonaStatus::Fail, json!({"reason": "no citations"})),
                ),
                (
                    "planner".to_string(),
                    terminal(
                        PersonaStatus::Unknown,
                        json!({"plan": [{"goal": "do x, cited", "key_files": ["a.rs"]}]}),
                    ),
                ),
                ("plan-evaluator".to_string(), terminal(PersonaStatus::Pass, json!({}))),
            ]),
        };
        let config = PlanApprovalConfig::default();
        let outcome = PlanApprovalLoop::new(&caller, config, context()).run().await.unwrap();
        assert!(outcome.approved);
        assert_eq!(outcome.history.len(), 2);
        assert_eq!(outcome.history[0].evaluator_reason.as_deref(), Some("no citations"));
    }

    #[tokio::test]
    async fn exhausting_iterations_marks_plan_unapproved() {
        let config = PlanApprovalConfig {
            plan_max_iterations_per_stage: 2,
            ..PlanApprovalConfig::default()
        };
        let mut scripted = Vec::new();
        for _ in 0..2 {
            scripted.push((
                "planner".to_string(),
                terminal(PersonaStatus::Unknown, json!({"plan": [{"goal": "x", "key_files": []}]})),
            ));
            scripted.push((
                "plan-evaluator".to_string(),
                terminal(PersonaStatus::Fail, json!({"reason": "still missing detail"})),
            ));
        }
        let caller = ScriptedCaller { responses: Mutex::new(scripted) };
        let outcome = PlanApprovalLoop::new(&caller, config, context()).run().await.unwrap();
        assert!(!outcome.approved);
        assert_eq!(outcome.plan.meta.plan_approved, Some(false));
        assert_eq!(outcome.plan.meta.reason.as_deref(), Some("iteration_limit_exceeded"));
        assert_eq!(outcome.history.len(), 2);
    }

    #[tokio::test]
    async fn empty_plan_forces_revision_without_invoking_evaluator() {
        let caller = ScriptedCaller {
            responses: Mutex::new(vec![
                ("planner".to_string(), terminal(PersonaStatus::Unknown, json!({"plan": []}))),
                (
                    "planner".to_string(),
                    terminal(PersonaStatus::Unknown, json!({"plan": [{"goal": "now non-empty", "key_files": []}]})),
                ),
                ("plan-evaluator".to_string(), terminal(PersonaStatus::Pass, json!({}))),
            ]),
        };
        let config = PlanApprovalConfig::default();
        let outcome = PlanApprovalLoop::new(&caller, config, context()).run().await.unwrap();
        assert!(outcome.approved);
        assert_eq!(outcome.history.len(), 2);
        assert_eq!(outcome.history[0].evaluator_reason.as_deref(), Some("empty plan"));
    }
}
