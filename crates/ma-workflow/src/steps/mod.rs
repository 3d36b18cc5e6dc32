//! Step Library (spec §4.10): one implementation per step `type`.

pub mod context_step;
pub mod diff_apply;
pub mod git_artifact;
pub mod implementation_loop;
pub mod persona_request;
pub mod plan_approval;
pub mod plan_key_file_guard;
pub mod register_blocked_dependencies;
pub mod variable_resolution;

use std::collections::HashMap;

use async_trait::async_trait;
use ma_core::AppError;
use serde_json::Value;

use crate::context::EngineContext;

#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    pub data: Option<Value>,
    pub outputs: HashMap<String, Value>,
}

impl StepOutcome {
    pub fn new(data: Value, outputs: HashMap<String, Value>) -> Self {
        Self {
            data: Some(data),
            outputs,
        }
    }
}

#[async_trait]
pub trait Step: Send + Sync {
    async fn execute(
        &self,
        ctx: &EngineContext,
        step_name: &str,
        config: &Value,
    ) -> Result<StepOutcome, AppError>;
}

/// Resolve a step's `type` string to its implementation (spec §4.9 step 3).
pub fn build_step(step_type: &str) -> Result<Box<dyn Step>, AppError> {
    match step_type {
        "persona_request" => Ok(Box::new(persona_request::PersonaRequestStep)),
        "diff_apply" => Ok(Box::new(diff_apply::DiffApplyStep)),
        "git_artifact" => Ok(Box::new(git_artifact::GitArtifactStep)),
        "plan_approval" => Ok(Box::new(plan_approval::PlanApprovalStep)),
        "plan_key_file_guard" => Ok(Box::new(plan_key_file_guard::PlanKeyFileGuardStep)),
        "implementation_loop" => Ok(Box::new(implementation_loop::ImplementationLoopStep)),
        "context" => Ok(Box::new(context_step::ContextStep)),
        "variable_resolution" => Ok(Box::new(variable_resolution::VariableResolutionStep)),
        "register_blocked_dependencies" => {
            Ok(Box::new(register_blocked_dependencies::RegisterBlockedDependenciesStep))
        }
        other => Err(AppError::ConfigError(format!("unknown step type '{other}'"))),
    }
}
