//! ContextStep (spec §4.10): reuses a prior repository scan when nothing
//! under the working tree has changed since it was written, otherwise
//! delegates the scan/summarization itself to the `context` persona (the
//! heuristics for *what* a good scan contains are out of scope here, per
//! spec §1 — this step only owns the reuse decision and artifact layout).

use std::collections::HashMap;
use std::path::Path;
use std::time::SystemTime;

use async_trait::async_trait;
use ma_core::AppError;
use serde_json::{json, Value};

use super::persona_request::PersonaRequestStep;
use super::{Step, StepOutcome};
use crate::artifact_store::ArtifactStore;
use crate::context::EngineContext;

pub struct ContextStep;

const SNAPSHOT_PATH: &str = ".ma/context/snapshot.json";
const SUMMARY_PATH: &str = ".ma/context/summary.md";

fn default_excluded_paths() -> Vec<String> {
    vec![".ma".to_string(), "node_modules".to_string(), ".git".to_string()]
}

#[async_trait]
impl Step for ContextStep {
    async fn execute(
        &self,
        ctx: &EngineContext,
        step_name: &str,
        config: &Value,
    ) -> Result<StepOutcome, AppError> {
        let persona = config
            .get("persona")
            .and_then(Value::as_str)
            .unwrap_or("context")
            .to_string();
        let force_rescan = config.get("force_rescan").and_then(Value::as_bool).unwrap_or(false);
        let excluded_paths: Vec<String> = config
            .get("excluded_paths")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_else(default_excluded_paths);

        let store = ArtifactStore::new(ctx.workflow.repo_root.clone());
        let reused = !force_rescan
            && store.exists(SNAPSHOT_PATH)
            && store.exists(SUMMARY_PATH)
            && !any_source_newer_than_snapshot(&ctx.workflow.repo_root, &store, &excluded_paths)?;

        if reused {
            let snapshot = store.read(SNAPSHOT_PATH).await?;
            let summary = store.read(SUMMARY_PATH).await?;
            return Ok(outcome(true, &snapshot, &summary));
        }

        let persona_outcome = PersonaRequestStep
            .execute(
                ctx,
                step_name,
                &json!({"persona": persona, "intent": "scan_repository", "payload": {}}),
            )
            .await?;
        let summary = persona_outcome
            .outputs
            .get("output")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let scan_payload = persona_outcome
            .outputs
            .get("payload")
            .cloned()
            .unwrap_or_else(|| json!({}));
        let snapshot = serde_json::to_string_pretty(&json!({"scan": scan_payload})).map_err(|e| {
            AppError::StepError(format!("encoding context snapshot: {e}"))
        })?;

        store.write(SNAPSHOT_PATH, &snapshot).await?;
        store.write(SUMMARY_PATH, &summary).await?;
        Ok(outcome(false, &snapshot, &summary))
    }
}

fn outcome(reused_existing: bool, snapshot: &str, summary: &str) -> StepOutcome {
    let mut outputs = HashMap::new();
    outputs.insert("reused_existing".to_string(), Value::Bool(reused_existing));
    outputs.insert("summary".to_string(), Value::String(summary.to_string()));
    StepOutcome::new(
        json!({"reused_existing": reused_existing, "snapshot": snapshot, "summary": summary}),
        outputs,
    )
}

fn any_source_newer_than_snapshot(
    repo_root: &Path,
    store: &ArtifactStore,
    excluded_paths: &[String],
) -> Result<bool, AppError> {
    let Some(snapshot_mtime) = store.modified_at(SNAPSHOT_PATH) else {
        return Ok(true);
    };
    walk(repo_root, repo_root, excluded_paths, snapshot_mtime)
}

fn walk(root: &Path, dir: &Path, excluded_paths: &[String], snapshot_mtime: SystemTime) -> Result<bool, AppError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return Ok(false),
    };
    for entry in entries {
        let entry = entry.map_err(|e| AppError::StepError(format!("reading '{}': {e}", dir.display())))?;
        let path = entry.path();
        let rel = path.strip_prefix(root).unwrap_or(&path);
        if is_excluded(rel, excluded_paths) {
            continue;
        }
        let metadata = entry
            .metadata()
            .map_err(|e| AppError::StepError(format!("stat '{}': {e}", path.display())))?;
        if metadata.is_dir() {
            if walk(root, &path, excluded_paths, snapshot_mtime)? {
                return Ok(true);
            }
        } else if let Ok(modified) = metadata.modified() {
            if modified > snapshot_mtime {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

fn is_excluded(rel_path: &Path, excluded_paths: &[String]) -> bool {
    rel_path
        .components()
        .next()
        .and_then(|c| c.as_os_str().to_str())
        .is_some_and(|first| excluded_paths.iter().any(|p| p == first))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ma_core::context::WorkflowContext;
    use ma_task_client::TaskServiceClient;
    use ma_transport::LocalStreamTransport;
    use ma_vcs::VcsDriver;
    use std::sync::Arc;
    use std::thread::sleep;
    use std::time::Duration;

    fn test_ctx(repo_root: std::path::PathBuf) -> EngineContext {
        let workflow = WorkflowContext::new("wf1", "proj1", repo_root, "main");
        let transport: Arc<dyn ma_transport::StreamTransport> = Arc::new(LocalStreamTransport::new());
        let vcs = Arc::new(VcsDriver::default());
        let task_client: Option<Arc<TaskServiceClient>> = None;
        let mut ctx = EngineContext::new(workflow, transport, vcs, task_client);
        ctx.skip_persona_operations = true;
        ctx
    }

    #[tokio::test]
    async fn first_run_is_not_reused_and_writes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path().to_path_buf());
        let outcome = ContextStep.execute(&ctx, "ctx", &json!({})).await.unwrap();
        assert_eq!(outcome.outputs["reused_existing"], Value::Bool(false));
        assert!(dir.path().join(SNAPSHOT_PATH).exists());
        assert!(dir.path().join(SUMMARY_PATH).exists());
    }

    #[tokio::test]
    async fn second_run_with_no_source_changes_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path().to_path_buf());
        ContextStep.execute(&ctx, "ctx", &json!({})).await.unwrap();
        let outcome = ContextStep.execute(&ctx, "ctx", &json!({})).await.unwrap();
        assert_eq!(outcome.outputs["reused_existing"], Value::Bool(true));
    }

    #[tokio::test]
    async fn a_change_under_ma_tasks_does_not_invalidate_reuse() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path().to_path_buf());
        ContextStep.execute(&ctx, "ctx", &json!({})).await.unwrap();
        sleep(Duration::from_millis(10));
        std::fs::create_dir_all(dir.path().join(".ma/tasks/42")).unwrap();
        std::fs::write(dir.path().join(".ma/tasks/42/01-notes.md"), "notes").unwrap();
        let outcome = ContextStep.execute(&ctx, "ctx", &json!({})).await.unwrap();
        assert_eq!(outcome.outputs["reused_existing"], Value::Bool(true));
    }

    #[tokio::test]
    async fn a_source_change_invalidates_reuse() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path().to_path_buf());
        ContextStep.execute(&ctx, "ctx", &json!({})).await.unwrap();
        sleep(Duration::from_millis(10));
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "fn lib() {}").unwrap();
        let outcome = ContextStep.execute(&ctx, "ctx", &json!({})).await.unwrap();
        assert_eq!(outcome.outputs["reused_existing"], Value::Bool(false));
    }

    #[tokio::test]
    async fn force_rescan_bypasses_reuse() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path().to_path_buf());
        ContextStep.execute(&ctx, "ctx", &json!({})).await.unwrap();
        let outcome = ContextStep
            .execute(&ctx, "ctx", &json!({"force_rescan": true}))
            .await
            .unwrap();
        assert_eq!(outcome.outputs["reused_existing"], Value::Bool(false));
    }
}
