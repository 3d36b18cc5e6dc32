//! Workflow registry and repo-resolution policy (spec §4.11), loaded once
//! at startup alongside `ma_core::config::OrchestratorConfig`. Mirrors
//! that type's TOML-load-then-validate shape.

use std::collections::HashMap;
use std::path::PathBuf;

use ma_core::AppError;
use ma_workflow::WorkflowDefinition;
use serde::Deserialize;

/// One entry of the `(task_type, scope)` workflow lookup table (spec
/// §4.11 step 3).
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRule {
    pub task_type: String,
    pub scope: String,
    pub workflow: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorSettings {
    #[serde(default = "default_project_base")]
    pub project_base: PathBuf,
    #[serde(default)]
    pub allow_workspace_git: bool,
    #[serde(default = "default_workflow_name")]
    pub default_workflow: String,
    #[serde(default = "default_blocked_workflow_name")]
    pub blocked_workflow: String,
    #[serde(default = "default_in_review_workflow_name")]
    pub in_review_workflow: String,
    #[serde(default)]
    pub rules: Vec<WorkflowRule>,
}

fn default_project_base() -> PathBuf {
    std::env::var("PROJECT_BASE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("ma-repos"))
}

fn default_workflow_name() -> String {
    "task-flow".to_string()
}

fn default_blocked_workflow_name() -> String {
    "blocked-task".to_string()
}

fn default_in_review_workflow_name() -> String {
    "in-review".to_string()
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            project_base: default_project_base(),
            allow_workspace_git: false,
            default_workflow: default_workflow_name(),
            blocked_workflow: default_blocked_workflow_name(),
            in_review_workflow: default_in_review_workflow_name(),
            rules: Vec::new(),
        }
    }
}

/// Loaded workflow definitions, keyed by name, plus the selection policy
/// over them.
pub struct WorkflowRegistry {
    pub settings: CoordinatorSettings,
    definitions: HashMap<String, WorkflowDefinition>,
}

impl WorkflowRegistry {
    pub fn new(settings: CoordinatorSettings) -> Self {
        Self {
            settings,
            definitions: HashMap::new(),
        }
    }

    /// Parses and validates a workflow definition, storing it under its
    /// own `name` field.
    pub fn load_yaml(&mut self, raw: &str) -> Result<(), AppError> {
        let def = WorkflowDefinition::from_yaml_str(raw)?;
        self.definitions.insert(def.name.clone(), def);
        Ok(())
    }

    /// Loads every `*.yaml`/`*.yml` file directly under `dir` as a workflow
    /// definition. Used by the CLI's bootstrap to populate the registry
    /// from a `.ma/workflows/` directory before the coordinator starts.
    pub fn load_workflow_dir(&mut self, dir: &std::path::Path) -> Result<(), AppError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| AppError::ConfigError(format!("reading workflow dir '{}': {e}", dir.display())))?;
        for entry in entries {
            let entry = entry.map_err(|e| AppError::ConfigError(e.to_string()))?;
            let path = entry.path();
            let is_yaml = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            );
            if !is_yaml {
                continue;
            }
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| AppError::ConfigError(format!("reading '{}': {e}", path.display())))?;
            self.load_yaml(&raw)?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&WorkflowDefinition> {
        self.definitions.get(name)
    }

    /// Workflow-selection priority chain (spec §4.11 step 3).
    pub fn select<'a>(
        &'a self,
        status_is_blocked_or_stuck: bool,
        status_contains_review: bool,
        task_type: Option<&str>,
        scope: Option<&str>,
    ) -> Result<&'a WorkflowDefinition, AppError> {
        let name = if status_is_blocked_or_stuck {
            self.settings.blocked_workflow.as_str()
        } else if status_contains_review {
            self.settings.in_review_workflow.as_str()
        } else if let Some(rule) = task_type.zip(scope).and_then(|(t, s)| {
            self.settings
                .rules
                .iter()
                .find(|r| r.task_type == t && r.scope == s)
        }) {
            rule.workflow.as_str()
        } else {
            self.settings.default_workflow.as_str()
        };

        self.get(name)
            .ok_or_else(|| AppError::ConfigError(format!("workflow '{name}' is not loaded")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(rules: Vec<WorkflowRule>) -> WorkflowRegistry {
        let mut registry = WorkflowRegistry::new(CoordinatorSettings {
            rules,
            ..Default::default()
        });
        for name in ["task-flow", "blocked-task", "in-review", "feature-medium"] {
            registry
                .load_yaml(&format!("name: {name}\nsteps: []\n"))
                .unwrap();
        }
        registry
    }

    #[test]
    fn blocked_status_always_wins() {
        let registry = registry_with(vec![]);
        let def = registry.select(true, true, Some("feature"), Some("medium")).unwrap();
        assert_eq!(def.name, "blocked-task");
    }

    #[test]
    fn review_status_selects_in_review_workflow() {
        let registry = registry_with(vec![]);
        let def = registry.select(false, true, None, None).unwrap();
        assert_eq!(def.name, "in-review");
    }

    #[test]
    fn matching_rule_selects_named_workflow() {
        let registry = registry_with(vec![WorkflowRule {
            task_type: "feature".to_string(),
            scope: "medium".to_string(),
            workflow: "feature-medium".to_string(),
        }]);
        let def = registry.select(false, false, Some("feature"), Some("medium")).unwrap();
        assert_eq!(def.name, "feature-medium");
    }

    #[test]
    fn falls_back_to_default_workflow() {
        let registry = registry_with(vec![]);
        let def = registry.select(false, false, Some("bug"), Some("small")).unwrap();
        assert_eq!(def.name, "task-flow");
    }

    #[test]
    fn load_workflow_dir_loads_every_yaml_file_and_skips_others() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("task-flow.yaml"), "name: task-flow\nsteps: []\n").unwrap();
        std::fs::write(tmp.path().join("blocked-task.yml"), "name: blocked-task\nsteps: []\n").unwrap();
        std::fs::write(tmp.path().join("README.md"), "not a workflow\n").unwrap();

        let mut registry = WorkflowRegistry::new(CoordinatorSettings::default());
        registry.load_workflow_dir(tmp.path()).unwrap();

        assert!(registry.get("task-flow").is_some());
        assert!(registry.get("blocked-task").is_some());
    }
}
