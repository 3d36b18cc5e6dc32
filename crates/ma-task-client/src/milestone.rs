//! Milestone slug resolution and the `create_milestone_if_missing` policy
//! (spec §4.3). Per the recorded Open Question decision (DESIGN.md): a
//! non-allow-listed slug is not silently rejected — the client logs a
//! policy warning but still forwards the creation option to the server.

use crate::{parse_response, ApiResponse, TaskServiceClient};
use ma_core::types::{normalize_slug, FUTURE_ENHANCEMENTS_SLUGS};
use serde_json::json;
use tracing::warn;

#[derive(Debug, Clone)]
pub enum MilestoneResolution {
    Found { id: String },
    NotFound,
}

impl TaskServiceClient {
    /// Resolve a milestone by slug (or raw name) against the project's
    /// fetched milestone list.
    pub async fn resolve_milestone(&self, project_id: &str, slug_or_name: &str) -> MilestoneResolution {
        let target = normalize_slug(slug_or_name);
        let resp = self.fetch_project_milestones(project_id).await;
        let Some(milestones) = resp.body.as_array() else {
            return MilestoneResolution::NotFound;
        };
        for m in milestones {
            let slug = m.get("slug").and_then(|v| v.as_str()).unwrap_or_default();
            let name = m.get("name").and_then(|v| v.as_str()).unwrap_or_default();
            if normalize_slug(slug) == target || normalize_slug(name) == target {
                if let Some(id) = m.get("id").and_then(|v| v.as_str()) {
                    return MilestoneResolution::Found { id: id.to_string() };
                }
            }
        }
        MilestoneResolution::NotFound
    }

    /// Auto-create a milestone when `resolve_milestone` misses, honoring
    /// the allow-list policy for which slugs are expected to be
    /// auto-created versus merely tolerated with a warning.
    pub async fn create_milestone_if_missing(&self, project_id: &str, slug: &str, name: &str) -> ApiResponse {
        let normalized = normalize_slug(slug);
        let allow_listed = FUTURE_ENHANCEMENTS_SLUGS
            .iter()
            .any(|s| normalize_slug(s) == normalized);
        if !allow_listed {
            warn!(slug, "creating milestone outside the auto-create allow-list");
        }

        let url = self.url(&format!("/projects/{project_id}/milestones"));
        let payload = json!({ "slug": slug, "name": name });
        match self.client.post(&url).bearer_auth(&self.token).json(&payload).send().await {
            Ok(resp) => parse_response(resp).await,
            Err(e) => ApiResponse {
                ok: false,
                status: 0,
                body: serde_json::Value::Null,
                error: Some(e.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_slug_matches_allowlist_variants() {
        let normalized = normalize_slug("Future Enhancements");
        assert!(
            FUTURE_ENHANCEMENTS_SLUGS
                .iter()
                .any(|s| normalize_slug(s) == normalized)
        );
    }
}
