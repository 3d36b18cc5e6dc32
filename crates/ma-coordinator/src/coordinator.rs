//! Coordinator main loop (spec §4.11): resolve a repo, pick the next
//! task, resolve+checkout a feature branch, select and run a workflow,
//! then report the task status or run the Abort Path.

use std::sync::Arc;

use ma_core::context::WorkflowContext;
use ma_core::task_selection::{flatten_candidates, select_next};
use ma_core::types::{Milestone, Repository, Task, TaskStatus};
use ma_core::AppError;
use ma_task_client::TaskServiceClient;
use ma_transport::StreamTransport;
use ma_vcs::driver::VcsDriver;
use ma_workflow::{EngineContext, EngineRunSummary, WorkflowEngine};
use serde_json::json;
use tracing::{info, warn};

use crate::abort::run_abort_path;
use crate::branch::compute_feature_branch;
use crate::config::{CoordinatorSettings, WorkflowRegistry};
use crate::repo::resolve_repository;
use crate::workflow_select::select_workflow_for_task;

/// Bootstrap input matching the CLI surface (spec §6): `<project_id>
/// [repo_url] [base_branch] [--force-rescan]`.
#[derive(Debug, Clone)]
pub struct CoordinatorRequest {
    pub project_id: String,
    pub repo_url: Option<String>,
    pub base_branch: String,
    pub force_rescan: bool,
}

#[derive(Debug)]
pub enum CoordinatorOutcome {
    NoEligibleTask,
    Completed {
        workflow_id: String,
        task_id: String,
        summary: EngineRunSummary,
    },
    Aborted {
        workflow_id: String,
        task_id: String,
        purged: usize,
        error: String,
    },
}

pub struct Coordinator {
    pub vcs: Arc<VcsDriver>,
    pub transport: Arc<dyn StreamTransport>,
    pub task_client: Arc<TaskServiceClient>,
    pub registry: WorkflowRegistry,
    pub request_stream: String,
}

impl Coordinator {
    pub fn new(
        vcs: Arc<VcsDriver>,
        transport: Arc<dyn StreamTransport>,
        task_client: Arc<TaskServiceClient>,
        registry: WorkflowRegistry,
    ) -> Self {
        Self {
            vcs,
            transport,
            task_client,
            registry,
            request_stream: "ma:requests".to_string(),
        }
    }

    fn settings(&self) -> &CoordinatorSettings {
        &self.registry.settings
    }

    async fn fetch_tasks(&self, project_id: &str) -> Result<Vec<Task>, AppError> {
        let resp = self.task_client.fetch_project_tasks(project_id).await;
        if !resp.ok {
            return Err(AppError::TaskServiceError {
                status: resp.status,
                body: resp.body.to_string(),
            });
        }
        let candidates = flatten_candidates(&resp.body);
        Ok(candidates
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect())
    }

    async fn fetch_milestone(&self, project_id: &str, milestone_id: &str) -> Option<Milestone> {
        let resp = self.task_client.fetch_project_milestones(project_id).await;
        if !resp.ok {
            return None;
        }
        let milestones: Vec<Milestone> = resp
            .body
            .get("milestones")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        milestones.into_iter().find(|m| m.id == milestone_id)
    }

    /// Runs exactly one coordinator iteration: select a task, run its
    /// workflow, and report the outcome. Does not loop; callers (the CLI
    /// binary) decide whether/how often to call this again.
    pub async fn run_once(&self, request: &CoordinatorRequest) -> Result<CoordinatorOutcome, AppError> {
        let tasks = self.fetch_tasks(&request.project_id).await?;
        let Some(task) = select_next(&tasks).cloned() else {
            info!(project_id = request.project_id.as_str(), "no eligible task found");
            return Ok(CoordinatorOutcome::NoEligibleTask);
        };

        let milestone = match &task.milestone_id {
            Some(id) => self.fetch_milestone(&request.project_id, id).await,
            None => None,
        };

        let repository = Repository {
            id: request.project_id.clone(),
            remote_url: request.repo_url.clone(),
            path_hint: None,
        };
        let resolution = resolve_repository(
            &self.vcs,
            self.settings(),
            None,
            &repository,
            &request.project_id,
        )
        .await?;

        let feature_branch = compute_feature_branch(milestone.as_ref(), &task, &request.project_id);
        self.vcs
            .checkout_from_base(&resolution.repo_root, &feature_branch, &request.base_branch)
            .await?;
        if self.vcs.has_remote(&resolution.repo_root).await
            && !self.vcs.remote_branch_exists(&resolution.repo_root, &feature_branch).await?
        {
            self.vcs.push(&resolution.repo_root, &feature_branch).await?;
        }

        let definition = select_workflow_for_task(&self.registry, &task)?.clone();

        let workflow_id = ulid::Ulid::new().to_string();
        let mut workflow_ctx = WorkflowContext::new(
            workflow_id.clone(),
            request.project_id.clone(),
            resolution.repo_root.clone(),
            feature_branch.clone(),
        );
        workflow_ctx.task = Some(task.clone());
        workflow_ctx
            .variables
            .set("force_rescan", json!(request.force_rescan));

        let ctx = EngineContext::new(
            workflow_ctx,
            self.transport.clone(),
            self.vcs.clone(),
            Some(self.task_client.clone()),
        );

        let engine = WorkflowEngine::new(definition)?;
        match engine.run(&ctx).await {
            Ok(summary) => {
                let status_resp = self
                    .task_client
                    .update_task_status(&task.project_id, &task.id, TaskStatus::Done, Some(task.lock_version))
                    .await;
                if !status_resp.ok {
                    warn!(task_id = task.id.as_str(), status = status_resp.status, "failed to mark task done after a successful run");
                }
                Ok(CoordinatorOutcome::Completed {
                    workflow_id,
                    task_id: task.id,
                    summary,
                })
            }
            Err(e) => {
                if is_abort_worthy(&e) {
                    warn!(task_id = task.id.as_str(), error = %e, "aborting workflow run");
                    let purged = run_abort_path(self.transport.as_ref(), &self.request_stream, &ctx.workflow).await;
                    Ok(CoordinatorOutcome::Aborted {
                        workflow_id,
                        task_id: task.id,
                        purged,
                        error: e.to_string(),
                    })
                } else {
                    Err(e)
                }
            }
        }
    }
}

/// The Abort Path triggers on VCS-layer failures (DiffApply's commit,
/// GitArtifact's commit/push, a branch guard rejection) — the class of
/// failure spec §7 names explicitly, as opposed to persona/transport
/// failures the engine already reports without aborting the workflow.
fn is_abort_worthy(error: &AppError) -> bool {
    matches!(
        error,
        AppError::VcsError { .. } | AppError::BranchGuardViolation { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_worthy_errors_are_vcs_and_branch_guard_only() {
        assert!(is_abort_worthy(&AppError::VcsError {
            args: vec!["push".into()],
            exit_code: 1,
            stderr: "rejected".into(),
        }));
        assert!(is_abort_worthy(&AppError::BranchGuardViolation {
            expected: "feat/x".into(),
            actual: "main".into(),
        }));
        assert!(!is_abort_worthy(&AppError::StepError("boom".into())));
        assert!(!is_abort_worthy(&AppError::TransportTimeout(1000)));
    }
}
