//! Task status transitions (spec §4.3): optimistic-concurrency PATCH with
//! a single retry against a freshly re-fetched `lock_version`, plus a
//! legacy by-external-id path for callers that only know the external id.

use crate::{parse_response, ApiResponse, TaskServiceClient};
use ma_core::types::TaskStatus;
use serde_json::json;
use tracing::warn;

/// 409 is the conventional optimistic-lock conflict; 422 covers
/// task-services that report the same condition as a validation error.
fn is_lock_conflict(status: u16) -> bool {
    matches!(status, 409 | 422)
}

impl TaskServiceClient {
    pub async fn update_task_status(
        &self,
        project_id: &str,
        task_id: &str,
        status: TaskStatus,
        lock_version: Option<u64>,
    ) -> ApiResponse {
        let first = self
            .patch_status(project_id, task_id, status, lock_version)
            .await;
        if !is_lock_conflict(first.status) {
            return first;
        }

        warn!(task_id, status = first.status, "lock_version conflict, re-fetching and retrying once");
        let fresh = self.fetch_task(task_id, Some(project_id)).await;
        let fresh_lock_version = fresh.body.get("lock_version").and_then(|v| v.as_u64());
        self.patch_status(project_id, task_id, status, fresh_lock_version).await
    }

    async fn patch_status(
        &self,
        project_id: &str,
        task_id: &str,
        status: TaskStatus,
        lock_version: Option<u64>,
    ) -> ApiResponse {
        let url = self.url(&format!("/projects/{project_id}/tasks/{task_id}/status"));
        let payload = json!({ "status": status, "lock_version": lock_version });
        match self.client.patch(&url).bearer_auth(&self.token).json(&payload).send().await {
            Ok(resp) => parse_response(resp).await,
            Err(e) => ApiResponse {
                ok: false,
                status: 0,
                body: serde_json::Value::Null,
                error: Some(e.to_string()),
            },
        }
    }

    /// Legacy path for callers that address a task only by its external id
    /// and don't have a project id handy. Falls back to resolving the
    /// external id to a canonical task id and retrying via the normal path.
    pub async fn update_task_status_by_external_id(
        &self,
        external_id: &str,
        status: TaskStatus,
    ) -> ApiResponse {
        let url = self.url(&format!("/v1/tasks/by-external/{external_id}/status"));
        let payload = json!({ "status": status });
        let first = match self.client.post(&url).bearer_auth(&self.token).json(&payload).send().await {
            Ok(resp) => parse_response(resp).await,
            Err(e) => ApiResponse {
                ok: false,
                status: 0,
                body: serde_json::Value::Null,
                error: Some(e.to_string()),
            },
        };
        if first.ok {
            return first;
        }

        warn!(external_id, "legacy by-external status update failed, resolving canonical id");
        let resolved = self.get(&format!("/v1/tasks/by-external/{external_id}")).await;
        let Some(task_id) = resolved.body.get("id").and_then(|v| v.as_str()) else {
            return first;
        };
        let resolve_url = self.url(&format!("/v1/tasks/{task_id}/status"));
        match self.client.post(&resolve_url).bearer_auth(&self.token).json(&payload).send().await {
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
