//! Task candidate selection (spec §4.13).

use crate::types::Task;
use serde_json::Value;

/// Keys flattened from the task payload when searching for candidate lists
/// (spec §4.13). Tried in order; the first present array wins.
pub const CANDIDATE_LIST_KEYS: &[&str] = &[
    "tasks",
    "next_task",
    "active_task",
    "current_task",
    "items",
    "issues",
    "tickets",
    "stories",
    "work_items",
    "backlog",
    "in_progress",
];

/// Extract the flattened candidate task array from a loosely-shaped JSON
/// payload, per the key search order above. A bare object under a
/// singular key (e.g. `next_task`) is treated as a one-element list.
pub fn flatten_candidates(payload: &Value) -> Vec<Value> {
    for key in CANDIDATE_LIST_KEYS {
        if let Some(v) = payload.get(key) {
            match v {
                Value::Array(arr) => return arr.clone(),
                Value::Object(_) => return vec![v.clone()],
                _ => {}
            }
        }
    }
    Vec::new()
}

fn due_date_of(task: &Task) -> Option<chrono::DateTime<chrono::Utc>> {
    task.extra
        .iter()
        .filter(|(k, _)| k.starts_with("due"))
        .filter_map(|(_, v)| v.as_str())
        .filter_map(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .min()
}

fn order_hint_of(task: &Task) -> i64 {
    for key in ["order", "position", "rank"] {
        if let Some(v) = task.extra.get(key).and_then(Value::as_i64) {
            return v;
        }
    }
    i64::MAX
}

/// Sort key tuple for §4.13's ordering: status priority, then
/// `-priority_score` (higher first), then due date (earlier first, `None`
/// sorts last), then order hint (lower first), then insertion order.
type SortKey = (u8, i64, i64, i64, usize);

fn sort_key(task: &Task, insertion_index: usize) -> SortKey {
    let status_priority = task.status.selection_priority();
    // Negate via a fixed-point transform so "higher first" sorts ascending.
    let neg_priority_score = -(task.priority_score * 1000.0) as i64;
    let due_millis = due_date_of(task)
        .map(|d| d.timestamp_millis())
        .unwrap_or(i64::MAX);
    let order = order_hint_of(task);
    (
        status_priority,
        neg_priority_score,
        due_millis,
        order,
        insertion_index,
    )
}

/// Select the next task from a candidate set, applying the scoring order
/// of §4.13 and excluding tasks whose status-priority is >= 5.
pub fn select_next(tasks: &[Task]) -> Option<&Task> {
    tasks
        .iter()
        .enumerate()
        .filter(|(_, t)| t.status.selection_priority() < 5)
        .min_by_key(|(idx, t)| sort_key(t, *idx))
        .map(|(_, t)| t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskStatus;
    use std::collections::HashMap;

    fn task(id: &str, status: TaskStatus, priority_score: f64) -> Task {
        Task {
            id: id.to_string(),
            project_id: "p1".into(),
            milestone_id: None,
            parent_task_id: None,
            title: id.to_string(),
            description: String::new(),
            status,
            priority_score,
            external_id: None,
            labels: vec![],
            lock_version: 0,
            branch: None,
            extra: HashMap::new(),
            blocked_dependencies: vec![],
        }
    }

    #[test]
    fn excludes_done_and_archived() {
        let tasks = vec![
            task("a", TaskStatus::Done, 10.0),
            task("b", TaskStatus::Archived, 10.0),
        ];
        assert!(select_next(&tasks).is_none());
    }

    #[test]
    fn blocked_outranks_open_regardless_of_priority_score() {
        let tasks = vec![
            task("a", TaskStatus::Open, 100.0),
            task("b", TaskStatus::Blocked, 1.0),
        ];
        assert_eq!(select_next(&tasks).unwrap().id, "b");
    }

    #[test]
    fn higher_priority_score_wins_within_same_status() {
        let tasks = vec![
            task("a", TaskStatus::Open, 1.0),
            task("b", TaskStatus::Open, 5.0),
        ];
        assert_eq!(select_next(&tasks).unwrap().id, "b");
    }

    #[test]
    fn insertion_order_breaks_ties() {
        let tasks = vec![
            task("first", TaskStatus::Open, 1.0),
            task("second", TaskStatus::Open, 1.0),
        ];
        assert_eq!(select_next(&tasks).unwrap().id, "first");
    }

    #[test]
    fn flatten_candidates_tries_keys_in_order() {
        let payload = serde_json::json!({"backlog": [{"id": 1}], "tasks": [{"id": 2}]});
        let candidates = flatten_candidates(&payload);
        assert_eq!(candidates[0]["id"], 2);
    }

    #[test]
    fn flatten_candidates_wraps_singular_object() {
        let payload = serde_json::json!({"next_task": {"id": 7}});
        let candidates = flatten_candidates(&payload);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0]["id"], 7);
    }
}
