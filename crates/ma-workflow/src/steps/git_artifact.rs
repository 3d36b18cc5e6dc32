//! GitArtifactStep (spec §4.10): optionally writes an artifact under
//! `.ma/`, commits the working tree's `.ma/`-confined changes, enforces
//! the branch guard on every commit, and pushes when a remote exists.
//! Grounded on `ma_vcs::driver::VcsDriver::commit_paths`/`push`/`has_remote`,
//! which already own the add/commit/`--force`-retry-once and push
//! mechanics, plus `ArtifactStore`/`resolver::resolve_value` for the
//! write-then-commit path the way `ContextStep` writes its snapshot.

use std::collections::HashMap;

use async_trait::async_trait;
use ma_core::envelope::validate_artifact_path;
use ma_core::AppError;
use serde_json::{json, Value};
use tracing::warn;

use super::{Step, StepOutcome};
use crate::artifact_store::ArtifactStore;
use crate::context::EngineContext;
use crate::resolver::resolve_value;

pub struct GitArtifactStep;

/// Resolve the branch this step must be on before it is allowed to commit
/// (spec §4.10), trying each config key in turn and falling back to the
/// workflow's own branch.
fn expected_branch(config: &Value, ctx: &EngineContext) -> String {
    for key in ["branch", "currentBranch", "featureBranchName"] {
        if let Some(value) = config.get(key).and_then(Value::as_str) {
            return value.to_string();
        }
    }
    ctx.workflow.branch.clone()
}

#[async_trait]
impl Step for GitArtifactStep {
    async fn execute(
        &self,
        ctx: &EngineContext,
        step_name: &str,
        config: &Value,
    ) -> Result<StepOutcome, AppError> {
        let mut paths: Vec<String> = config
            .get("paths")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let written_path = match config.get("path").and_then(Value::as_str) {
            Some(path) => {
                validate_artifact_path(path)?;
                let resolved = resolve_value(
                    config.get("content").unwrap_or(&Value::Null),
                    &ctx.workflow.variables,
                );
                let contents = match resolved {
                    Value::String(s) => s,
                    other => serde_json::to_string_pretty(&other)
                        .map_err(|e| AppError::StepError(format!("encoding artifact content: {e}")))?,
                };
                ArtifactStore::new(ctx.workflow.repo_root.clone()).write(path, &contents).await?;
                Some(path.to_string())
            }
            None => None,
        };

        if let Some(path) = &written_path {
            if !paths.contains(path) {
                paths.push(path.clone());
            }
        }
        if paths.is_empty() {
            return Err(AppError::ConfigError(format!(
                "step '{step_name}': neither 'paths' nor 'path' was given"
            )));
        }
        for path in &paths {
            validate_artifact_path(path)?;
        }

        let message = config
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("update .ma artifacts")
            .to_string();

        let expected = expected_branch(config, ctx);
        let actual = ctx
            .vcs
            .current_branch(&ctx.workflow.repo_root)
            .await
            .map_err(|e| AppError::StepError(format!("resolving current branch: {e}")))?;
        if actual != expected {
            return Err(AppError::BranchGuardViolation {
                expected,
                actual,
            });
        }

        let commit_sha = ctx
            .vcs
            .commit_paths(&ctx.workflow.repo_root, &message, &paths)
            .await?;

        let mut pushed = false;
        if ctx.vcs.has_remote(&ctx.workflow.repo_root).await {
            match ctx.vcs.push(&ctx.workflow.repo_root, &ctx.workflow.branch).await {
                Ok(()) => pushed = true,
                Err(e) => warn!(step = step_name, error = %e, "push failed, continuing with local commit only"),
            }
        }

        let mut outputs = HashMap::new();
        outputs.insert("commit_sha".to_string(), Value::String(commit_sha.clone()));
        outputs.insert("pushed".to_string(), Value::Bool(pushed));
        Ok(StepOutcome::new(
            json!({"commit_sha": commit_sha, "pushed": pushed, "paths": paths}),
            outputs,
        ))
    }
}
