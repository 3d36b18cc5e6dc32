//! Blocked-dependency registration (spec §4.10 RegisterBlockedDependenciesStep):
//! PATCH the parent task's `blocked_dependencies`, merged server-side.
//! Mirrors `update.rs`'s bare `reqwest` call shape.

use crate::{parse_response, ApiResponse, TaskServiceClient};
use serde_json::{json, Value};

impl TaskServiceClient {
    /// With `allow_clear=false` and an empty `dependency_ids`, this is a
    /// no-op (the caller shouldn't accidentally wipe existing blockers by
    /// omitting the field); `allow_clear=true` sends the empty list through.
    pub async fn update_blocked_dependencies(
        &self,
        project_id: &str,
        task_id: &str,
        dependency_ids: &[String],
        allow_clear: bool,
    ) -> ApiResponse {
        if dependency_ids.is_empty() && !allow_clear {
            return ApiResponse {
                ok: true,
                status: 200,
                body: json!({"blocked_dependencies": [], "skipped": true}),
                error: None,
            };
        }

        let url = self.url(&format!("/projects/{project_id}/tasks/{task_id}/blocked-dependencies"));
        let payload = json!({"dependency_ids": dependency_ids, "allow_clear": allow_clear});
        match self.client.patch(&url).bearer_auth(&self.token).json(&payload).send().await {
            Ok(resp) => parse_response(resp).await,
            Err(e) => ApiResponse {
                ok: false,
                status: 0,
                body: Value::Null,
                error: Some(e.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_list_without_allow_clear_is_a_no_op() {
        let client = TaskServiceClient::new("https://tasks.example.com", "tok");
        let resp = client
            .update_blocked_dependencies("p1", "t1", &[], false)
            .await;
        assert!(resp.ok);
        assert_eq!(resp.body["skipped"], Value::Bool(true));
    }
}
