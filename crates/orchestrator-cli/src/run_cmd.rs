//! Wires the ambient collaborators together and drives one Coordinator
//! request alongside the persona dispatcher loops it depends on (spec §6).
//!
//! Grounded on the teacher's `mcp_hub::handle_serve_command` shape: spawn
//! a set of long-lived background tasks, run the foreground work, then
//! cancel the background tasks on the way out.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use ma_coordinator::{Coordinator, CoordinatorOutcome, CoordinatorRequest, CoordinatorSettings, WorkflowRegistry};
use ma_core::config::OrchestratorConfig;
use ma_core::context::persona;
use ma_lm_client::LmClient;
use ma_persona::{DispatcherConfig, PersonaDispatcherLoop, PersonaRequestExecutor};
use ma_task_client::TaskServiceClient;
use ma_transport::LocalStreamTransport;
use ma_vcs::VcsDriver;
use tokio_util::sync::CancellationToken;
use tracing::info;

const REQUEST_STREAM: &str = "ma:requests";
const EVENT_STREAM: &str = "ma:events";

/// Personas dispatched by default when `ALLOWED_PERSONAS` is unset (spec §6).
const DEFAULT_PERSONAS: &[&str] = &[
    persona::CONTEXT_SCAN,
    persona::PLANNER,
    persona::PLAN_EVALUATOR,
    persona::IMPLEMENTER,
    persona::TESTER_QA,
    persona::CODE_REVIEWER,
    persona::SECURITY_REVIEW,
    persona::DEVOPS,
    persona::PROJECT_MANAGER,
];

fn allowed_personas() -> Vec<String> {
    match std::env::var("ALLOWED_PERSONAS") {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect()
        }
        _ => DEFAULT_PERSONAS.iter().map(|p| p.to_string()).collect(),
    }
}

fn load_orchestrator_config(path: Option<&Path>) -> Result<OrchestratorConfig> {
    let Some(path) = path else {
        return Ok(OrchestratorConfig::default());
    };
    if !path.exists() {
        return Ok(OrchestratorConfig::default());
    }
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading config '{}'", path.display()))?;
    OrchestratorConfig::from_toml_str(&raw).map_err(|e| anyhow::anyhow!("{e}"))
}

fn load_registry(settings: CoordinatorSettings, workflow_dir: &Path) -> Result<WorkflowRegistry> {
    let mut registry = WorkflowRegistry::new(settings);
    if workflow_dir.is_dir() {
        registry
            .load_workflow_dir(workflow_dir)
            .map_err(|e| anyhow::anyhow!("{e}"))?;
    } else {
        info!(dir = %workflow_dir.display(), "workflow directory not found, registry is empty");
    }
    Ok(registry)
}

pub struct RunArgs {
    pub project_id: String,
    pub repo_url: Option<String>,
    pub base_branch: Option<String>,
    pub force_rescan: bool,
    pub config_path: Option<PathBuf>,
    pub workflow_dir: PathBuf,
}

pub async fn handle_run(args: RunArgs) -> Result<CoordinatorOutcome> {
    let config = Arc::new(load_orchestrator_config(args.config_path.as_deref())?);

    let project_base = config
        .project_base
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::var("PROJECT_BASE").map(PathBuf::from).unwrap_or_else(|_| std::env::temp_dir().join("ma-repos")));
    let allow_workspace_git = config.allow_workspace_git || std::env::var("MC_ALLOW_WORKSPACE_GIT").is_ok();

    let settings = CoordinatorSettings {
        project_base,
        allow_workspace_git,
        ..Default::default()
    };
    let registry = load_registry(settings, &args.workflow_dir)?;

    let transport = Arc::new(LocalStreamTransport::new());
    let vcs = Arc::new(VcsDriver::default());

    let task_service_url = std::env::var("DASHBOARD_API_URL")
        .or_else(|_| std::env::var("DASHBOARD_BASE_URL"))
        .context("DASHBOARD_API_URL (or DASHBOARD_BASE_URL) must be set")?;
    let task_service_key = std::env::var("DASHBOARD_API_KEY").unwrap_or_default();
    let task_client = Arc::new(TaskServiceClient::new(task_service_url, task_service_key));

    let lm_base_url = std::env::var("LM_BASE_URL").context("LM_BASE_URL must be set")?;
    let lm_api_key = std::env::var("LM_API_KEY").unwrap_or_default();
    let lm_client = Arc::new(LmClient::new(lm_base_url, lm_api_key));

    let executor = Arc::new(PersonaRequestExecutor::new(
        lm_client,
        HashMap::new(),
        config.information_requests.clone(),
        std::env::var("MC_REMOTE_OWNER_REPO").ok(),
    ));

    let cancel = CancellationToken::new();
    let mut dispatcher_handles = Vec::new();
    for persona_name in allowed_personas() {
        let dispatcher_config = DispatcherConfig {
            persona: persona_name.clone(),
            group_prefix: "ma-dispatch".to_string(),
            request_stream: REQUEST_STREAM.to_string(),
            event_stream: EVENT_STREAM.to_string(),
            consumer_name: format!("{persona_name}-{}", ulid::Ulid::new()),
            batch_size: 8,
            block_ms: 2_000,
            default_model: std::env::var("LM_DEFAULT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
        };
        let dispatcher = PersonaDispatcherLoop::new(transport.clone(), executor.clone(), config.clone(), dispatcher_config);
        let persona_cancel = cancel.clone();
        dispatcher_handles.push(tokio::spawn(async move {
            dispatcher.run(persona_cancel).await;
        }));
    }

    let coordinator = Coordinator::new(vcs, transport, task_client, registry);
    let request = CoordinatorRequest {
        project_id: args.project_id,
        repo_url: args.repo_url,
        base_branch: args.base_branch.unwrap_or_else(|| "main".to_string()),
        force_rescan: args.force_rescan,
    };

    let outcome = coordinator.run_once(&request).await;

    cancel.cancel();
    for handle in dispatcher_handles {
        let _ = handle.await;
    }

    outcome.map_err(|e| anyhow::anyhow!("{e}"))
}
