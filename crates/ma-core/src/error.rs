//! Shared error taxonomy (spec §7).
//!
//! Each variant maps to one of the failure kinds in the error handling
//! design: `transport_timeout`/`transport_error`, `persona_fail`/
//! `persona_unknown`, `exhausted_retries`, `information_limit_reached`,
//! `information_source_cap_exceeded`, `plan_iteration_limit_exceeded`,
//! `vcs_error`, `branch_guard_violation`, `language_policy_violation`,
//! `task_service_error`. `config_error`, `invalid_artifact_path`, and
//! `step_error` are pragmatic additions for failure modes the engine needs
//! to surface that the table above does not name individually.

use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("transport timed out after {0}ms")]
    TransportTimeout(u64),

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("persona '{persona}' returned fail: {reason}")]
    PersonaFail { persona: String, reason: String },

    #[error("persona '{persona}' returned no status")]
    PersonaUnknown { persona: String },

    #[error(
        "exhausted retries for persona '{persona}' after {attempts} attempts (last corr_id {corr_id})"
    )]
    ExhaustedRetries {
        persona: String,
        attempts: u32,
        last_timeout_ms: u64,
        corr_id: String,
    },

    #[error("information request limit reached after {0} iterations")]
    InformationLimitReached(u32),

    #[error("information request source cap exceeded ({0} unique sources)")]
    InformationSourceCapExceeded(usize),

    #[error("plan approval iteration limit exceeded after {0} attempts")]
    PlanIterationLimitExceeded(u32),

    #[error("vcs error running {args:?} (exit {exit_code}): {stderr}")]
    VcsError {
        args: Vec<String>,
        exit_code: i32,
        stderr: String,
    },

    #[error("branch guard violation: expected '{expected}', found '{actual}'")]
    BranchGuardViolation { expected: String, actual: String },

    #[error("language policy violation: path '{path}' not in allowed languages {allowed:?}")]
    LanguagePolicyViolation { path: String, allowed: Vec<String> },

    #[error("task service error ({status}): {body}")]
    TaskServiceError { status: u16, body: String },

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("artifact path '{0}' must begin with '.ma/'")]
    InvalidArtifactPath(String),

    #[error("workflow step failed: {0}")]
    StepError(String),
}

/// Uniform wrapper used at boundaries that need `{kind, details, recoverable}`
/// per spec §7, independent of the concrete `AppError` variant carried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub kind: String,
    pub details: String,
    pub recoverable: bool,
}

impl AppError {
    /// Classify this error into the `{kind, details, recoverable}` shape
    /// used on event-stream `error` envelopes.
    pub fn to_envelope(&self) -> ErrorEnvelope {
        let (kind, recoverable) = match self {
            AppError::TransportTimeout(_) => ("transport_timeout", true),
            AppError::TransportError(_) => ("transport_error", true),
            AppError::PersonaFail { .. } => ("persona_fail", false),
            AppError::PersonaUnknown { .. } => ("persona_unknown", false),
            AppError::ExhaustedRetries { .. } => ("exhausted_retries", false),
            AppError::InformationLimitReached(_) => ("information_limit_reached", false),
            AppError::InformationSourceCapExceeded(_) => {
                ("information_source_cap_exceeded", false)
            }
            AppError::PlanIterationLimitExceeded(_) => ("plan_iteration_limit_exceeded", true),
            AppError::VcsError { .. } => ("vcs_error", false),
            AppError::BranchGuardViolation { .. } => ("branch_guard_violation", false),
            AppError::LanguagePolicyViolation { .. } => ("language_policy_violation", false),
            AppError::TaskServiceError { .. } => ("task_service_error", true),
            AppError::ConfigError(_) => ("config_error", false),
            AppError::InvalidArtifactPath(_) => ("invalid_artifact_path", false),
            AppError::StepError(_) => ("step_error", false),
        };
        ErrorEnvelope {
            kind: kind.to_string(),
            details: self.to_string(),
            recoverable,
        }
    }
}
