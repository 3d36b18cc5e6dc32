//! Artifact Store (spec §4.10 C12): reads and writes under the repo's
//! `.ma/` subtree. Grounded on `csa-session/src/git.rs`'s commit helpers
//! (writes land in the working tree; persistence is a subsequent commit,
//! not a separate store) plus the `.ma/`-confinement convention already
//! enforced by `ma_core::envelope::validate_artifact_path`.

use std::path::PathBuf;

use ma_core::envelope::validate_artifact_path;
use ma_core::AppError;

pub struct ArtifactStore {
    repo_root: PathBuf,
}

impl ArtifactStore {
    pub fn new(repo_root: PathBuf) -> Self {
        Self { repo_root }
    }

    pub async fn write(&self, rel_path: &str, contents: &str) -> Result<PathBuf, AppError> {
        validate_artifact_path(rel_path)?;
        let full = self.repo_root.join(rel_path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::StepError(format!("create_dir_all '{}': {e}", parent.display())))?;
        }
        tokio::fs::write(&full, contents)
            .await
            .map_err(|e| AppError::StepError(format!("write '{}': {e}", full.display())))?;
        Ok(full)
    }

    pub async fn read(&self, rel_path: &str) -> Result<String, AppError> {
        validate_artifact_path(rel_path)?;
        let full = self.repo_root.join(rel_path);
        tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| AppError::StepError(format!("read '{}': {e}", full.display())))
    }

    pub fn exists(&self, rel_path: &str) -> bool {
        self.repo_root.join(rel_path).exists()
    }

    pub fn modified_at(&self, rel_path: &str) -> Option<std::time::SystemTime> {
        std::fs::metadata(self.repo_root.join(rel_path))
            .and_then(|m| m.modified())
            .ok()
    }
}
