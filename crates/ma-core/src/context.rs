//! Workflow Context (spec §3): per-invocation mutable state owned
//! exclusively by one engine invocation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::types::Task;

/// Well-known persona names (spec §1). The persona set is configurable
/// (`ALLOWED_PERSONAS`), so these are identifiers, not a closed enum.
pub mod persona {
    pub const CONTEXT_SCAN: &str = "context-scan";
    pub const PLANNER: &str = "planner";
    pub const PLAN_EVALUATOR: &str = "plan-evaluator";
    pub const IMPLEMENTER: &str = "implementer";
    pub const TESTER_QA: &str = "tester-qa";
    pub const CODE_REVIEWER: &str = "code-reviewer";
    pub const SECURITY_REVIEW: &str = "security-review";
    pub const DEVOPS: &str = "devops";
    pub const PROJECT_MANAGER: &str = "project-manager";

    /// Personas that must supply an explicit `status` (§4.6 step 6).
    pub const STATUS_REQUIRED: &[&str] =
        &[PLAN_EVALUATOR, TESTER_QA, CODE_REVIEWER, SECURITY_REVIEW];
}

/// Shared, mutable variable/step-output maps owned by one Workflow Context.
/// Kept behind an `Arc<Mutex<_>>` so step implementations (each holding a
/// `&WorkflowContext`) can mutate concurrently-shared context state without
/// the engine needing `&mut` borrows across `await` points.
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    inner: Arc<Mutex<HashMap<String, serde_json::Value>>>,
}

impl VariableStore {
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.lock().expect("variable store poisoned").get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        self.inner
            .lock()
            .expect("variable store poisoned")
            .insert(key.into(), value);
    }

    pub fn snapshot(&self) -> HashMap<String, serde_json::Value> {
        self.inner.lock().expect("variable store poisoned").clone()
    }

    /// Resolve a dotted path (`a.b.c`) against the variable map, returning
    /// `None` for any missing segment (§4.12: "Missing path => undefined").
    pub fn resolve_path(&self, path: &str) -> Option<serde_json::Value> {
        let mut parts = path.split('.');
        let root = parts.next()?;
        let mut current = self.get(root)?;
        for part in parts {
            current = match current {
                serde_json::Value::Object(ref map) => map.get(part)?.clone(),
                _ => return None,
            };
        }
        Some(current)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResultSummary {
    pub status: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub outputs: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Per-invocation mutable state threaded through the workflow engine
/// (spec §3 Workflow Context). Cloning is cheap: the maps are `Arc`-shared.
#[derive(Clone)]
pub struct WorkflowContext {
    pub workflow_id: String,
    pub project_id: String,
    pub repo_root: std::path::PathBuf,
    pub branch: String,
    pub task: Option<Task>,
    pub variables: VariableStore,
    step_outputs: Arc<Mutex<HashMap<String, StepResultSummary>>>,
    pub workflow_aborted: Arc<Mutex<bool>>,
}

impl WorkflowContext {
    pub fn new(
        workflow_id: impl Into<String>,
        project_id: impl Into<String>,
        repo_root: std::path::PathBuf,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            project_id: project_id.into(),
            repo_root,
            branch: branch.into(),
            task: None,
            variables: VariableStore::default(),
            step_outputs: Arc::new(Mutex::new(HashMap::new())),
            workflow_aborted: Arc::new(Mutex::new(false)),
        }
    }

    /// Merge a completed step's outputs into `step_outputs[name]` and
    /// mirror each key into context variables both bare and prefixed with
    /// `{step_name}_{key}` (spec §4.9 step 4).
    pub fn record_step_outputs(&self, step_name: &str, summary: StepResultSummary) {
        for (key, value) in &summary.outputs {
            self.variables.set(key.clone(), value.clone());
            self.variables
                .set(format!("{step_name}_{key}"), value.clone());
        }
        self.step_outputs
            .lock()
            .expect("step outputs poisoned")
            .insert(step_name.to_string(), summary);
    }

    pub fn step_output(&self, step_name: &str) -> Option<StepResultSummary> {
        self.step_outputs
            .lock()
            .expect("step outputs poisoned")
            .get(step_name)
            .cloned()
    }

    pub fn mark_aborted(&self) {
        *self.workflow_aborted.lock().expect("abort flag poisoned") = true;
    }

    pub fn is_aborted(&self) -> bool {
        *self.workflow_aborted.lock().expect("abort flag poisoned")
    }
}
