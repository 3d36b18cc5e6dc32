//! Feature-branch computation (spec §4.11 step 4): a priority chain from
//! the most explicit override down to a generic per-repo fallback.

use ma_core::types::{normalize_slug, Milestone, Task, FUTURE_ENHANCEMENTS_SLUGS};

fn is_generic_slug(slug: &str) -> bool {
    let normalized = normalize_slug(slug);
    FUTURE_ENHANCEMENTS_SLUGS
        .iter()
        .any(|s| normalize_slug(s) == normalized)
}

/// `milestone.branch > task.branch > milestone/{slug} (non-generic) >
/// feat/{task_slug} > milestone/{repo_slug}`.
pub fn compute_feature_branch(milestone: Option<&Milestone>, task: &Task, repo_slug: &str) -> String {
    if let Some(branch) = milestone.and_then(|m| m.branch.clone()) {
        return branch;
    }
    if let Some(branch) = &task.branch {
        return branch.clone();
    }
    if let Some(milestone) = milestone {
        if !is_generic_slug(&milestone.slug) {
            return format!("milestone/{}", milestone.slug);
        }
    }
    let task_slug = normalize_slug(&task.title);
    if !task_slug.is_empty() {
        return format!("feat/{task_slug}");
    }
    format!("milestone/{}", normalize_slug(repo_slug))
}
