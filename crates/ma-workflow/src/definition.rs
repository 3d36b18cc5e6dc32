//! Workflow/step definitions loadable from YAML (spec §3, §4.9).
//!
//! Grounded on the `WorkflowSpec`/`StepSpec` tagged-enum shape in
//! `other_examples/527cfaa3_OpenAgentsInc-openagents__...-workflow-schema.rs`,
//! adapted to this engine's flat step list plus `depends_on` edges rather
//! than that example's implicit trigger/policy wrapper.

use ma_core::AppError;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub steps: Vec<StepDefinition>,
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub continue_on_failure: bool,
}

impl WorkflowDefinition {
    pub fn from_yaml_str(raw: &str) -> Result<Self, AppError> {
        let def: Self = serde_yaml::from_str(raw).map_err(|e| AppError::ConfigError(e.to_string()))?;
        def.validate()?;
        Ok(def)
    }

    /// Reject duplicate step names and unknown `depends_on` references up
    /// front, before the engine starts walking the graph.
    pub fn validate(&self) -> Result<(), AppError> {
        let mut seen = std::collections::HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name.as_str()) {
                return Err(AppError::ConfigError(format!(
                    "duplicate step name '{}'",
                    step.name
                )));
            }
        }
        for step in &self.steps {
            for dep in &step.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(AppError::ConfigError(format!(
                        "step '{}' depends on unknown step '{}'",
                        step.name, dep
                    )));
                }
            }
        }
        crate::dag::topological_order(&self.steps)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_definition() {
        let raw = r#"
name: task-flow
steps:
  - name: context
    type: context
  - name: plan
    type: persona_request
    depends_on: [context]
"#;
        let def = WorkflowDefinition::from_yaml_str(raw).unwrap();
        assert_eq!(def.name, "task-flow");
        assert_eq!(def.steps.len(), 2);
        assert_eq!(def.steps[1].depends_on, vec!["context".to_string()]);
    }

    #[test]
    fn rejects_unknown_dependency() {
        let raw = r#"
name: broken
steps:
  - name: a
    type: context
    depends_on: [missing]
"#;
        assert!(WorkflowDefinition::from_yaml_str(raw).is_err());
    }

    #[test]
    fn rejects_duplicate_step_names() {
        let raw = r#"
name: broken
steps:
  - name: a
    type: context
  - name: a
    type: context
"#;
        assert!(WorkflowDefinition::from_yaml_str(raw).is_err());
    }
}
