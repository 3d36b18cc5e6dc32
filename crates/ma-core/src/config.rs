//! Static orchestrator configuration (ambient stack, SPEC_FULL §3).
//!
//! Loaded from TOML, merged with environment overrides by the binary.
//! Mirrors the teacher's `csa-config` split between a typed struct and a
//! `validate` pass that runs once at load time rather than at first use.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_timeout_ms: Option<u64>,
    /// `None` inherits the global default; negative-as-unlimited is
    /// represented as `Some(-1)` per §4.6 step 4.
    #[serde(default)]
    pub max_retries: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryDefaults {
    pub base_timeout_ms: u64,
    pub max_retries: i32,
    pub backoff_increment_ms: u64,
}

impl Default for RetryDefaults {
    fn default() -> Self {
        Self {
            base_timeout_ms: 30_000,
            max_retries: 3,
            backoff_increment_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InformationRequestConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_unique_sources")]
    pub max_unique_sources: usize,
    #[serde(default = "default_max_bytes")]
    pub default_max_bytes: usize,
    #[serde(default)]
    pub host_deny_list: Vec<String>,
}

fn default_max_iterations() -> u32 {
    5
}
fn default_max_unique_sources() -> usize {
    10
}
fn default_max_bytes() -> usize {
    16 * 1024
}

impl Default for InformationRequestConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_unique_sources: default_max_unique_sources(),
            default_max_bytes: default_max_bytes(),
            host_deny_list: vec!["169.254.169.254".to_string(), "metadata.google.internal".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanApprovalConfig {
    #[serde(default = "default_plan_max_iterations")]
    pub plan_max_iterations_per_stage: u32,
    #[serde(default)]
    pub require_citations: bool,
    #[serde(default)]
    pub citation_fields: Vec<String>,
    #[serde(default)]
    pub uncited_budget: u32,
    #[serde(default)]
    pub treat_uncited_as_invalid: bool,
}

fn default_plan_max_iterations() -> u32 {
    5
}

impl Default for PlanApprovalConfig {
    fn default() -> Self {
        Self {
            plan_max_iterations_per_stage: default_plan_max_iterations(),
            require_citations: false,
            citation_fields: Vec::new(),
            uncited_budget: 0,
            treat_uncited_as_invalid: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub personas: HashMap<String, PersonaConfig>,
    #[serde(default)]
    pub retry_defaults: RetryDefaults,
    #[serde(default)]
    pub information_requests: InformationRequestConfig,
    #[serde(default)]
    pub plan_approval: PlanApprovalConfig,
    #[serde(default)]
    pub project_base: Option<String>,
    #[serde(default)]
    pub allow_workspace_git: bool,
    #[serde(default)]
    pub create_milestone_if_missing: bool,
}

impl OrchestratorConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, crate::error::AppError> {
        let cfg: Self =
            toml::from_str(raw).map_err(|e| crate::error::AppError::ConfigError(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject malformed configuration at load time (SPEC_FULL §4): negative
    /// `max_information_iterations`-equivalent knobs, and duplicate persona
    /// entries are impossible by construction since `personas` is a map, so
    /// this focuses on cross-field sanity the type system can't express.
    pub fn validate(&self) -> Result<(), crate::error::AppError> {
        if self.information_requests.max_iterations == 0 {
            return Err(crate::error::AppError::ConfigError(
                "information_requests.max_iterations must be >= 1".to_string(),
            ));
        }
        if self.plan_approval.plan_max_iterations_per_stage == 0 {
            return Err(crate::error::AppError::ConfigError(
                "plan_approval.plan_max_iterations_per_stage must be >= 1".to_string(),
            ));
        }
        for (name, persona) in &self.personas {
            if let Some(retries) = persona.max_retries {
                if retries < -1 {
                    return Err(crate::error::AppError::ConfigError(format!(
                        "persona '{name}': max_retries must be >= -1 (negative means unlimited)"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn base_timeout_ms(&self, persona: &str) -> u64 {
        self.personas
            .get(persona)
            .and_then(|p| p.base_timeout_ms)
            .unwrap_or(self.retry_defaults.base_timeout_ms)
    }

    /// `None` represents "unlimited" (negative override or global default).
    pub fn max_retries(&self, persona: &str) -> Option<u32> {
        let configured = self
            .personas
            .get(persona)
            .and_then(|p| p.max_retries)
            .unwrap_or(self.retry_defaults.max_retries);
        if configured < 0 {
            None
        } else {
            Some(configured as u32)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = OrchestratorConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.base_timeout_ms("unknown-persona"), 30_000);
        assert_eq!(cfg.max_retries("unknown-persona"), Some(3));
    }

    #[test]
    fn negative_max_retries_means_unlimited() {
        let mut cfg = OrchestratorConfig::default();
        cfg.personas.insert(
            "planner".to_string(),
            PersonaConfig {
                system_prompt: None,
                model: None,
                base_timeout_ms: None,
                max_retries: Some(-1),
            },
        );
        assert_eq!(cfg.max_retries("planner"), None);
    }

    #[test]
    fn invalid_max_retries_below_negative_one_rejected() {
        let mut cfg = OrchestratorConfig::default();
        cfg.personas.insert(
            "planner".to_string(),
            PersonaConfig {
                system_prompt: None,
                model: None,
                base_timeout_ms: None,
                max_retries: Some(-2),
            },
        );
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_max_iterations_rejected() {
        let mut cfg = OrchestratorConfig::default();
        cfg.information_requests.max_iterations = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_from_toml() {
        let raw = r#"
            project_base = "/tmp/repos"

            [retry_defaults]
            base_timeout_ms = 20000
            max_retries = 2
            backoff_increment_ms = 1000

            [personas.planner]
            base_timeout_ms = 60000
        "#;
        let cfg = OrchestratorConfig::from_toml_str(raw).unwrap();
        assert_eq!(cfg.project_base.as_deref(), Some("/tmp/repos"));
        assert_eq!(cfg.base_timeout_ms("planner"), 60_000);
        assert_eq!(cfg.base_timeout_ms("implementer"), 20_000);
    }
}
