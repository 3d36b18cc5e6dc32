//! Repository resolution (spec §4.11 step 1): decide which working tree
//! a workflow run operates on, preferring an already-checked-out local
//! repo over cloning, and refusing to silently operate on the
//! orchestrator's own working directory.

use std::path::{Path, PathBuf};

use ma_core::types::Repository;
use ma_core::AppError;
use ma_vcs::driver::VcsDriver;

use crate::config::CoordinatorSettings;

#[derive(Debug, Clone)]
pub struct RepoResolution {
    pub repo_root: PathBuf,
    pub cloned: bool,
}

async fn is_git_repo(path: &Path) -> bool {
    tokio::fs::metadata(path.join(".git")).await.is_ok()
}

/// Filesystem-safe directory name for a clone destination.
fn sanitize_dest_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    let trimmed = cleaned.trim_matches('-');
    if trimmed.is_empty() {
        "repo".to_string()
    } else {
        trimmed.to_string()
    }
}

fn guard_not_workspace_cwd(path: &Path, settings: &CoordinatorSettings) -> Result<(), AppError> {
    if settings.allow_workspace_git {
        return Ok(());
    }
    let cwd = std::env::current_dir().ok();
    if cwd.as_deref() == Some(path) {
        return Err(AppError::ConfigError(format!(
            "refusing to operate on the orchestrator's own working directory '{}' (set allow_workspace_git to override)",
            path.display()
        )));
    }
    Ok(())
}

/// Priority chain: an explicit local path that is already a git repo,
/// then `PROJECT_BASE/<path_hint>` if that is already a git repo, then a
/// fresh clone of `repository.remote_url` into `PROJECT_BASE/<hint-or-slug>`.
pub async fn resolve_repository(
    vcs: &VcsDriver,
    settings: &CoordinatorSettings,
    explicit_path: Option<&Path>,
    repository: &Repository,
    project_slug: &str,
) -> Result<RepoResolution, AppError> {
    if let Some(path) = explicit_path {
        guard_not_workspace_cwd(path, settings)?;
        if is_git_repo(path).await {
            return Ok(RepoResolution {
                repo_root: path.to_path_buf(),
                cloned: false,
            });
        }
    }

    if let Some(hint) = &repository.path_hint {
        let candidate = settings.project_base.join(sanitize_dest_name(hint));
        guard_not_workspace_cwd(&candidate, settings)?;
        if is_git_repo(&candidate).await {
            return Ok(RepoResolution {
                repo_root: candidate,
                cloned: false,
            });
        }
    }

    let remote_url = repository.remote_url.as_deref().ok_or_else(|| {
        AppError::ConfigError(format!(
            "repository '{}' has no local path and no remote_url to clone",
            repository.id
        ))
    })?;
    let dest_name = repository
        .path_hint
        .clone()
        .unwrap_or_else(|| project_slug.to_string());
    let dest = settings.project_base.join(sanitize_dest_name(&dest_name));
    guard_not_workspace_cwd(&dest, settings)?;

    if !is_git_repo(&dest).await {
        vcs.clone(remote_url, &dest, None).await?;
    }

    Ok(RepoResolution {
        repo_root: dest,
        cloned: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_dest_name_replaces_unsafe_characters() {
        assert_eq!(sanitize_dest_name("org/repo name!"), "org-repo-name-");
        assert_eq!(sanitize_dest_name(""), "repo");
    }

    #[tokio::test]
    async fn explicit_git_repo_path_wins_without_cloning() {
        let tmp = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(tmp.path().join(".git")).await.unwrap();
        let vcs = VcsDriver::default();
        let settings = CoordinatorSettings::default();
        let repository = Repository {
            id: "r1".to_string(),
            remote_url: None,
            path_hint: None,
        };

        let resolution = resolve_repository(&vcs, &settings, Some(tmp.path()), &repository, "proj")
            .await
            .unwrap();
        assert_eq!(resolution.repo_root, tmp.path());
        assert!(!resolution.cloned);
    }

    #[tokio::test]
    async fn missing_remote_url_is_a_config_error_when_nothing_local_exists() {
        let tmp = tempfile::tempdir().unwrap();
        let vcs = VcsDriver::default();
        let settings = CoordinatorSettings {
            project_base: tmp.path().join("repos"),
            ..Default::default()
        };
        let repository = Repository {
            id: "r1".to_string(),
            remote_url: None,
            path_hint: None,
        };

        let err = resolve_repository(&vcs, &settings, None, &repository, "proj")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[tokio::test]
    async fn refuses_the_current_working_directory_unless_allowed() {
        let cwd = std::env::current_dir().unwrap();
        let settings = CoordinatorSettings::default();
        let repository = Repository {
            id: "r1".to_string(),
            remote_url: None,
            path_hint: None,
        };
        let vcs = VcsDriver::default();

        let err = resolve_repository(&vcs, &settings, Some(&cwd), &repository, "proj")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }
}
