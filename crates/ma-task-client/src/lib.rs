//! Task-Service Client (spec §4.3, §6).
//!
//! Grounded on `csa-memory/src/llm_client.rs`'s `reqwest::Client` +
//! `bearer_auth` + `.json(...)` construction, generalized from a single
//! chat-completion endpoint to the project/milestone/task CRUD surface.

mod blocked_dependencies;
mod create;
mod milestone;
mod sanitize;
mod update;

pub use create::CreateTaskInput;
pub use milestone::MilestoneResolution;

use serde_json::Value;
use std::time::Duration;
use tracing::warn;

/// Uniform response envelope (spec §4.3: "each returning `{ok, status,
/// body, error?}`").
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub ok: bool,
    pub status: u16,
    pub body: Value,
    pub error: Option<String>,
}

impl ApiResponse {
    fn success(status: u16, body: Value) -> Self {
        Self {
            ok: true,
            status,
            body,
            error: None,
        }
    }

    fn failure(status: u16, body: Value, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            status,
            body,
            error: Some(error.into()),
        }
    }
}

pub struct TaskServiceClient {
    pub(crate) base_url: String,
    pub(crate) token: String,
    pub(crate) client: reqwest::Client,
}

impl TaskServiceClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_timeout(base_url, token, Duration::from_secs(5))
    }

    /// Timeouts scale per call site (spec §5: "every outbound HTTP call has
    /// a configured timeout (default 5s for task-service)").
    pub fn with_timeout(base_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client build with static config should not fail");
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client,
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub(crate) async fn get(&self, path: &str) -> ApiResponse {
        match self.client.get(self.url(path)).bearer_auth(&self.token).send().await {
            Ok(resp) => parse_response(resp).await,
            Err(e) => {
                warn!(path, error = %e, "task-service GET failed");
                ApiResponse::failure(0, Value::Null, e.to_string())
            }
        }
    }

    pub async fn fetch_project_status(&self, project_id: &str) -> ApiResponse {
        self.get(&format!("/projects/{project_id}/status")).await
    }

    pub async fn fetch_project_status_details(&self, project_id: &str) -> ApiResponse {
        self.get(&format!("/projects/{project_id}/status?details=1")).await
    }

    pub async fn fetch_project_tasks(&self, project_id: &str) -> ApiResponse {
        self.get(&format!("/v1/tasks?project_id={project_id}")).await
    }

    pub async fn fetch_project_milestones(&self, project_id: &str) -> ApiResponse {
        self.get(&format!("/projects/{project_id}/milestones")).await
    }

    pub async fn fetch_task(&self, task_id: &str, project_id: Option<&str>) -> ApiResponse {
        match project_id {
            Some(pid) => self.get(&format!("/projects/{pid}/tasks/{task_id}")).await,
            None => self.get(&format!("/v1/tasks/{task_id}")).await,
        }
    }
}

pub(crate) async fn parse_response(resp: reqwest::Response) -> ApiResponse {
    let status = resp.status().as_u16();
    let ok = resp.status().is_success();
    let body: Value = resp.json().await.unwrap_or(Value::Null);
    if ok {
        ApiResponse::success(status, body)
    } else {
        let error = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("request failed")
            .to_string();
        ApiResponse::failure(status, body, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_normalizes_trailing_slash_in_base_url() {
        let client = TaskServiceClient::new("https://tasks.example.com/", "tok");
        assert_eq!(client.url("/v1/tasks/1"), "https://tasks.example.com/v1/tasks/1");
    }
}
