//! VCS Driver (spec §4.2): serialized invocations of a VCS binary with
//! stdout/stderr capture.
//!
//! Grounded on `csa-session/src/git.rs` (subprocess spawn + non-zero-exit
//! -> error with captured stderr), generalized from session-repo-only
//! operations to the full clone/checkout/push/diff surface and ported to
//! `tokio::process::Command` so every invocation accepts a deadline
//! (spec §5).

use ma_core::error::AppError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::lock::RepoLockRegistry;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub env: Vec<(String, String)>,
    pub stdin: Option<String>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Serialized VCS invocations against a configurable binary (default
/// `git`), each bound to a repo root via `RepoLockRegistry`.
#[derive(Clone)]
pub struct VcsDriver {
    binary: String,
    locks: RepoLockRegistry,
}

impl Default for VcsDriver {
    fn default() -> Self {
        Self::new("git")
    }
}

impl VcsDriver {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            locks: RepoLockRegistry::new(),
        }
    }

    /// Run the VCS binary with `args` in `cwd`, serialized per repo root.
    /// Non-zero exit raises `AppError::VcsError` carrying captured stderr.
    pub async fn run(
        &self,
        cwd: &Path,
        args: &[&str],
        opts: RunOptions,
    ) -> Result<RunOutput, AppError> {
        let _guard = self.locks.acquire(cwd).await;
        self.run_unlocked(cwd, args, opts).await
    }

    /// Same as `run` but does not take the repo-root lock; used by helpers
    /// that already hold it (e.g. `commit_paths` composing `add` + `commit`
    /// atomically).
    async fn run_unlocked(
        &self,
        cwd: &Path,
        args: &[&str],
        opts: RunOptions,
    ) -> Result<RunOutput, AppError> {
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (k, v) in &opts.env {
            command.env(k, v);
        }

        let mut child = command
            .spawn()
            .map_err(|e| AppError::VcsError {
                args: args.iter().map(|s| s.to_string()).collect(),
                exit_code: -1,
                stderr: format!("failed to spawn '{}': {e}", self.binary),
            })?;

        if let Some(stdin_data) = &opts.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(stdin_data.as_bytes()).await;
            }
        } else {
            drop(child.stdin.take());
        }

        let wait = child.wait_with_output();
        let output = match opts.timeout {
            Some(d) => tokio::time::timeout(d, wait).await.map_err(|_| {
                AppError::VcsError {
                    args: args.iter().map(|s| s.to_string()).collect(),
                    exit_code: -1,
                    stderr: format!("timed out after {d:?}"),
                }
            })?,
            None => wait.await,
        }
        .map_err(|e| AppError::VcsError {
            args: args.iter().map(|s| s.to_string()).collect(),
            exit_code: -1,
            stderr: e.to_string(),
        })?;

        let result = RunOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        };

        if !output.status.success() {
            tracing::warn!(
                binary = %self.binary,
                args = ?args,
                exit_code = result.exit_code,
                stderr = %result.stderr,
                "vcs invocation failed"
            );
            return Err(AppError::VcsError {
                args: args.iter().map(|s| s.to_string()).collect(),
                exit_code: result.exit_code,
                stderr: result.stderr,
            });
        }

        Ok(result)
    }

    pub async fn clone(
        &self,
        remote_url: &str,
        dest: &Path,
        timeout: Option<Duration>,
    ) -> Result<(), AppError> {
        let parent = dest.parent().unwrap_or(Path::new("."));
        tokio::fs::create_dir_all(parent).await.map_err(|e| AppError::VcsError {
            args: vec!["clone".into()],
            exit_code: -1,
            stderr: format!("failed to create parent dir: {e}"),
        })?;
        self.run(
            parent,
            &["clone", remote_url, dest.to_string_lossy().as_ref()],
            RunOptions {
                timeout,
                ..Default::default()
            },
        )
        .await?;
        Ok(())
    }

    pub async fn current_branch(&self, repo_root: &Path) -> Result<String, AppError> {
        let out = self
            .run(repo_root, &["rev-parse", "--abbrev-ref", "HEAD"], RunOptions::default())
            .await?;
        Ok(out.stdout.trim().to_string())
    }

    pub async fn branch_exists(&self, repo_root: &Path, branch: &str) -> Result<bool, AppError> {
        let refname = format!("refs/heads/{branch}");
        let res = self
            .run(
                repo_root,
                &["show-ref", "--verify", "--quiet", &refname],
                RunOptions::default(),
            )
            .await;
        Ok(res.is_ok())
    }

    pub async fn remote_branch_exists(
        &self,
        repo_root: &Path,
        branch: &str,
    ) -> Result<bool, AppError> {
        let refname = format!("refs/remotes/origin/{branch}");
        let res = self
            .run(
                repo_root,
                &["show-ref", "--verify", "--quiet", &refname],
                RunOptions::default(),
            )
            .await;
        Ok(res.is_ok())
    }

    /// Checkout `branch`, creating it from `base` if it does not exist
    /// locally or remotely.
    pub async fn checkout_from_base(
        &self,
        repo_root: &Path,
        branch: &str,
        base: &str,
    ) -> Result<(), AppError> {
        if self.branch_exists(repo_root, branch).await? {
            self.run(repo_root, &["checkout", branch], RunOptions::default())
                .await?;
            return Ok(());
        }
        if self.remote_branch_exists(repo_root, branch).await? {
            let remote_ref = format!("origin/{branch}");
            self.run(
                repo_root,
                &["checkout", "-b", branch, &remote_ref],
                RunOptions::default(),
            )
            .await?;
            return Ok(());
        }
        self.run(repo_root, &["checkout", base], RunOptions::default())
            .await?;
        self.run(repo_root, &["checkout", "-b", branch], RunOptions::default())
            .await?;
        Ok(())
    }

    /// Stage and commit `paths` with `message`. Uses `--no-verify` since
    /// callers (GitArtifactStep) own the policy of when hooks should run.
    pub async fn commit_paths(
        &self,
        repo_root: &Path,
        message: &str,
        paths: &[String],
    ) -> Result<String, AppError> {
        let _guard_outer = (); // documents: add+commit below run under separate locked `run` calls
        let mut add_args: Vec<&str> = vec!["add"];
        add_args.extend(paths.iter().map(String::as_str));
        let add_result = self.run(repo_root, &add_args, RunOptions::default()).await;
        if add_result.is_err() {
            // Retry with --force once (spec §7 local recovery list).
            let mut force_args: Vec<&str> = vec!["add", "--force"];
            force_args.extend(paths.iter().map(String::as_str));
            self.run(repo_root, &force_args, RunOptions::default()).await?;
        }

        self.run(
            repo_root,
            &["commit", "--no-verify", "-m", message],
            RunOptions::default(),
        )
        .await?;

        self.head_sha(repo_root, "HEAD", false).await
    }

    pub async fn push(&self, repo_root: &Path, branch: &str) -> Result<(), AppError> {
        self.run(repo_root, &["push", "-u", "origin", branch], RunOptions::default())
            .await?;
        Ok(())
    }

    pub async fn has_remote(&self, repo_root: &Path) -> bool {
        self.run(repo_root, &["remote", "get-url", "origin"], RunOptions::default())
            .await
            .is_ok()
    }

    pub async fn head_sha(
        &self,
        repo_root: &Path,
        reference: &str,
        remote: bool,
    ) -> Result<String, AppError> {
        let target = if remote {
            format!("origin/{reference}")
        } else {
            reference.to_string()
        };
        let out = self
            .run(repo_root, &["rev-parse", &target], RunOptions::default())
            .await?;
        Ok(out.stdout.trim().to_string())
    }

    /// Verify a pushed branch actually carries a diff against `base`
    /// (spec §4.2). Fetches both refs first.
    pub async fn verify_remote_branch_has_diff(
        &self,
        repo_root: &Path,
        branch: &str,
        base: Option<&str>,
    ) -> Result<bool, AppError> {
        let _ = self
            .run(repo_root, &["fetch", "origin", branch], RunOptions::default())
            .await;
        if let Some(base) = base {
            let _ = self
                .run(repo_root, &["fetch", "origin", base], RunOptions::default())
                .await;
        }

        let remote_ref = format!("origin/{branch}");
        if self
            .run(repo_root, &["rev-parse", &remote_ref], RunOptions::default())
            .await
            .is_err()
        {
            return Err(AppError::VcsError {
                args: vec!["rev-parse".into(), remote_ref],
                exit_code: -1,
                stderr: "branch_not_found".to_string(),
            });
        }

        match base {
            Some(base) => {
                let base_ref = format!("origin/{base}");
                let range = format!("{base_ref}..{remote_ref}");
                let count_out = self
                    .run(repo_root, &["rev-list", "--count", &range], RunOptions::default())
                    .await?;
                let ahead_count: u64 = count_out.stdout.trim().parse().unwrap_or(0);
                if ahead_count > 0 {
                    return Ok(true);
                }
                let diff_out = self
                    .run(repo_root, &["diff", "--stat", &range], RunOptions::default())
                    .await?;
                Ok(!is_empty_diffstat(&diff_out.stdout))
            }
            None => {
                let show_out = self
                    .run(repo_root, &["show", "--stat", &remote_ref], RunOptions::default())
                    .await?;
                Ok(!is_empty_diffstat(&show_out.stdout))
            }
        }
    }

    /// Parse `git status --porcelain=v1 --branch` into a structured
    /// description (SPEC_FULL §4).
    pub async fn describe_working_tree(&self, repo_root: &Path) -> Result<WorkingTreeStatus, AppError> {
        let out = self
            .run(
                repo_root,
                &["status", "--porcelain=v1", "--branch"],
                RunOptions::default(),
            )
            .await?;
        Ok(parse_porcelain_status(&out.stdout))
    }
}

fn is_empty_diffstat(diffstat: &str) -> bool {
    let trimmed = diffstat.trim();
    trimmed.is_empty() || trimmed.contains("0 files changed")
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusEntry {
    pub index_status: char,
    pub worktree_status: char,
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSummary {
    pub staged: usize,
    pub unstaged: usize,
    pub untracked: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkingTreeStatus {
    pub dirty: bool,
    pub branch: Option<String>,
    pub entries: Vec<StatusEntry>,
    pub summary: StatusSummary,
}

fn parse_porcelain_status(raw: &str) -> WorkingTreeStatus {
    let mut status = WorkingTreeStatus::default();
    for line in raw.lines() {
        if let Some(branch_line) = line.strip_prefix("## ") {
            // e.g. "main...origin/main [ahead 1]" -- keep the branch name only.
            status.branch = branch_line.split("...").next().map(|s| s.trim().to_string());
            continue;
        }
        if line.len() < 3 {
            continue;
        }
        let mut chars = line.chars();
        let index_status = chars.next().unwrap_or(' ');
        let worktree_status = chars.next().unwrap_or(' ');
        let path = line[3..].to_string();

        if index_status == '?' && worktree_status == '?' {
            status.summary.untracked += 1;
        } else {
            if index_status != ' ' {
                status.summary.staged += 1;
            }
            if worktree_status != ' ' {
                status.summary.unstaged += 1;
            }
        }
        status.summary.total += 1;
        status.entries.push(StatusEntry {
            index_status,
            worktree_status,
            path,
        });
    }
    status.dirty = status.summary.total > 0;
    status
}

pub use crate::lock::RepoLockRegistry as LockRegistry;
