//! Task creation (spec §4.3): upsert by `external_id` first, falling back
//! once to the legacy create endpoint when the upsert route is absent.

use crate::sanitize::{clip_description, clip_title};
use crate::{parse_response, ApiResponse, TaskServiceClient};
use serde_json::json;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct CreateTaskInput {
    pub project_id: String,
    pub external_id: String,
    pub title: String,
    pub description: String,
    pub milestone_id: Option<String>,
    pub parent_task_id: Option<String>,
    pub labels: Vec<String>,
}

/// Legacy creation falls back when the upsert route itself doesn't exist
/// on the deployed task-service, not merely when a conflict occurs there.
fn is_missing_route(status: u16) -> bool {
    matches!(status, 404 | 405) || status >= 500
}

impl TaskServiceClient {
    pub async fn create_task(&self, input: &CreateTaskInput) -> ApiResponse {
        let title = clip_title(&input.title);
        let description = clip_description(&input.description);

        let payload = json!({
            "external_id": input.external_id,
            "title": title,
            "description": description,
            "milestone_id": input.milestone_id,
            "parent_task_id": input.parent_task_id,
            "labels": input.labels,
        });

        let upsert_url = self.url(&format!("/projects/{}/tasks/upsert", input.project_id));
        let upsert_resp = self
            .client
            .post(&upsert_url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await;

        match upsert_resp {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if !is_missing_route(status) {
                    return parse_response(resp).await;
                }
                warn!(status, "upsert route unavailable, falling back to legacy create");
            }
            Err(e) => {
                warn!(error = %e, "upsert request failed, falling back to legacy create");
            }
        }

        let legacy_url = self.url(&format!("/projects/{}/tasks", input.project_id));
        match self
            .client
            .post(&legacy_url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await
        {
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
    fn missing_route_covers_404_405_and_5xx() {
        assert!(is_missing_route(404));
        assert!(is_missing_route(405));
        assert!(is_missing_route(500));
        assert!(is_missing_route(503));
        assert!(!is_missing_route(200));
        assert!(!is_missing_route(409));
        assert!(!is_missing_route(422));
    }
}
