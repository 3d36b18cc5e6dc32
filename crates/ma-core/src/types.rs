//! Core data model (spec §3).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Task lifecycle status.
///
/// Transitions: `open -> in_progress -> {in_review|blocked|done}`; the only
/// retreat allowed is `blocked -> in_progress`. Enforcement lives in
/// `TaskStatus::can_transition_to`, not in the server the client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    InReview,
    Blocked,
    Done,
    Archived,
}

impl TaskStatus {
    /// Status priority used by task selection (§4.13): lower sorts first.
    /// Statuses scoring >= 5 are excluded from candidacy.
    pub fn selection_priority(&self) -> u8 {
        match self {
            TaskStatus::Blocked => 0,
            TaskStatus::InReview => 1,
            TaskStatus::InProgress => 2,
            TaskStatus::Open => 3,
            TaskStatus::Done => 5,
            TaskStatus::Archived => 7,
        }
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (*self, next) {
            (Open, InProgress) => true,
            (InProgress, InReview | Blocked | Done) => true,
            (Blocked, InProgress) => true,
            (a, b) if a == b => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub project_id: String,
    #[serde(default)]
    pub milestone_id: Option<String>,
    #[serde(default)]
    pub parent_task_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority_score: f64,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub lock_version: u64,
    #[serde(default)]
    pub branch: Option<String>,
    /// Flattened ordering/priority hints used by task selection (§4.13):
    /// due date, order/position/rank. Kept as a loose bag since the
    /// upstream task service's schema for these fields is not fixed.
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub blocked_dependencies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub tasks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(default)]
    pub path_hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub milestones: Vec<Milestone>,
    #[serde(default)]
    pub repositories: Vec<Repository>,
}

/// Milestone-slug allow-list for `create_milestone_if_missing` auto-create
/// policy (§4.3).
pub const FUTURE_ENHANCEMENTS_SLUGS: &[&str] = &[
    "future-enhancements",
    "future-enhancement",
    "future_enhancements",
    "future",
];

/// Normalize a milestone slug for matching: lowercase, non-alphanumeric -> `-`.
pub fn normalize_slug(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut prev_dash = false;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            prev_dash = false;
        } else if !prev_dash {
            out.push('-');
            prev_dash = true;
        }
    }
    out.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions() {
        assert!(TaskStatus::Open.can_transition_to(TaskStatus::InProgress));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Blocked));
        assert!(TaskStatus::Blocked.can_transition_to(TaskStatus::InProgress));
        assert!(!TaskStatus::Done.can_transition_to(TaskStatus::InProgress));
        assert!(!TaskStatus::Open.can_transition_to(TaskStatus::Done));
    }

    #[test]
    fn selection_priority_excludes_terminal_statuses() {
        assert!(TaskStatus::Done.selection_priority() >= 5);
        assert!(TaskStatus::Archived.selection_priority() >= 5);
        assert!(TaskStatus::Blocked.selection_priority() < 5);
    }

    #[test]
    fn normalize_slug_collapses_punctuation() {
        assert_eq!(normalize_slug("Future Enhancements!!"), "future-enhancements");
        assert_eq!(normalize_slug("future_enhancements"), "future-enhancements");
    }

    #[test]
    fn future_enhancements_allowlist_matches_normalized_variants() {
        let normalized = normalize_slug("Future_Enhancements");
        assert!(
            FUTURE_ENHANCEMENTS_SLUGS
                .iter()
                .any(|s| normalize_slug(s) == normalized)
        );
    }
}
