//! Workflow-selection rules (spec §4.11 step 3): map a task's status and
//! `(task_type, scope)` labels onto a loaded workflow definition.

use ma_core::types::{Task, TaskStatus};
use ma_core::AppError;
use ma_workflow::WorkflowDefinition;
use serde_json::Value;

use crate::config::WorkflowRegistry;

fn string_field(task: &Task, key: &str) -> Option<String> {
    task.extra.get(key).and_then(Value::as_str).map(str::to_string)
}

/// `blocked|stuck` -> the blocked-task workflow; an in-review status -> the
/// in-review workflow; otherwise a `(task_type, scope)` rule match, falling
/// back to the configured default.
pub fn select_workflow_for_task<'a>(
    registry: &'a WorkflowRegistry,
    task: &Task,
) -> Result<&'a WorkflowDefinition, AppError> {
    let blocked_or_stuck = matches!(task.status, TaskStatus::Blocked)
        || task.labels.iter().any(|l| l.eq_ignore_ascii_case("stuck"));
    let in_review = matches!(task.status, TaskStatus::InReview);
    let task_type = string_field(task, "task_type");
    let scope = string_field(task, "scope");

    registry.select(blocked_or_stuck, in_review, task_type.as_deref(), scope.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CoordinatorSettings, WorkflowRule};
    use std::collections::HashMap;

    fn task(status: TaskStatus, labels: Vec<&str>, extra: HashMap<String, Value>) -> Task {
        Task {
            id: "t1".to_string(),
            project_id: "p1".to_string(),
            milestone_id: None,
            parent_task_id: None,
            title: "demo".to_string(),
            description: String::new(),
            status,
            priority_score: 0.0,
            external_id: None,
            labels: labels.into_iter().map(str::to_string).collect(),
            lock_version: 0,
            branch: None,
            extra,
            blocked_dependencies: vec![],
        }
    }

    fn registry() -> WorkflowRegistry {
        let mut registry = WorkflowRegistry::new(CoordinatorSettings {
            rules: vec![WorkflowRule {
                task_type: "feature".to_string(),
                scope: "medium".to_string(),
                workflow: "feature-medium".to_string(),
            }],
            ..Default::default()
        });
        for name in ["task-flow", "blocked-task", "in-review", "feature-medium"] {
            registry.load_yaml(&format!("name: {name}\nsteps: []\n")).unwrap();
        }
        registry
    }

    #[test]
    fn a_stuck_label_routes_to_the_blocked_workflow_even_when_open() {
        let registry = registry();
        let task = task(TaskStatus::Open, vec!["stuck"], HashMap::new());
        let def = select_workflow_for_task(&registry, &task).unwrap();
        assert_eq!(def.name, "blocked-task");
    }

    #[test]
    fn in_review_status_routes_to_the_in_review_workflow() {
        let registry = registry();
        let task = task(TaskStatus::InReview, vec![], HashMap::new());
        let def = select_workflow_for_task(&registry, &task).unwrap();
        assert_eq!(def.name, "in-review");
    }

    #[test]
    fn matching_task_type_and_scope_selects_the_rule_workflow() {
        let registry = registry();
        let mut extra = HashMap::new();
        extra.insert("task_type".to_string(), Value::String("feature".to_string()));
        extra.insert("scope".to_string(), Value::String("medium".to_string()));
        let task = task(TaskStatus::Open, vec![], extra);
        let def = select_workflow_for_task(&registry, &task).unwrap();
        assert_eq!(def.name, "feature-medium");
    }
}
