//! Information-Request Loop (spec §4.7): lets a persona ask for repo-file
//! slices or allow-listed HTTP fetches before answering.

use ma_core::AppError;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub enum InformationRequest {
    RepoFile {
        path: String,
        start_line: Option<u32>,
        end_line: Option<u32>,
        max_bytes: Option<usize>,
    },
    HttpGet {
        url: String,
        headers: Vec<(String, String)>,
        max_bytes: Option<usize>,
    },
}

impl InformationRequest {
    /// A stable signature used to collapse duplicate requests within one
    /// iteration (§4.7: "duplicate requests (by signature) are collapsed").
    pub fn signature(&self) -> String {
        match self {
            InformationRequest::RepoFile { path, start_line, end_line, .. } => {
                format!("repo_file:{path}:{start_line:?}:{end_line:?}")
            }
            InformationRequest::HttpGet { url, .. } => format!("http_get:{url}"),
        }
    }

    pub fn parse(value: &Value) -> Option<Self> {
        let kind = value.get("type")?.as_str()?;
        match kind {
            "repo_file" => {
                let raw_path = value.get("path")?.as_str()?;
                let (path, start_line, end_line) = split_anchor(raw_path);
                Some(InformationRequest::RepoFile {
                    path,
                    start_line: value.get("start_line").and_then(Value::as_u64).map(|v| v as u32).or(start_line),
                    end_line: value.get("end_line").and_then(Value::as_u64).map(|v| v as u32).or(end_line),
                    max_bytes: value.get("max_bytes").and_then(Value::as_u64).map(|v| v as usize),
                })
            }
            "http_get" => {
                let url = value.get("url")?.as_str()?.to_string();
                let headers = value
                    .get("headers")
                    .and_then(Value::as_object)
                    .map(|m| {
                        m.iter()
                            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                            .collect()
                    })
                    .unwrap_or_default();
                Some(InformationRequest::HttpGet {
                    url,
                    headers,
                    max_bytes: value.get("max_bytes").and_then(Value::as_u64).map(|v| v as usize),
                })
            }
            _ => None,
        }
    }
}

/// Parse a GitHub-style `path#L<start>[-L<end>]` anchor off the end of a
/// path string.
fn split_anchor(raw: &str) -> (String, Option<u32>, Option<u32>) {
    let Some((path, anchor)) = raw.split_once('#') else {
        return (raw.to_string(), None, None);
    };
    let anchor = anchor.trim_start_matches('L');
    if let Some((start, end)) = anchor.split_once("-L") {
        (path.to_string(), start.parse().ok(), end.parse().ok())
    } else {
        let start = anchor.parse().ok();
        (path.to_string(), start, start)
    }
}

#[derive(Debug, Clone)]
pub struct FulfilledRequest {
    pub signature: String,
    pub summary: String,
    pub truncated: bool,
}

/// Resolve `path` confined to `repo_root`: rejects traversal and absolute
/// escapes, mirroring the normalization the Artifact Store (§3) applies to
/// `.ma/` paths but scoped to the whole working tree.
fn resolve_in_repo(repo_root: &Path, path: &str) -> Result<PathBuf, AppError> {
    let candidate = repo_root.join(path);
    let normalized = normalize_path(&candidate);
    if !normalized.starts_with(repo_root) {
        return Err(AppError::InvalidArtifactPath(path.to_string()));
    }
    Ok(normalized)
}

fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        use std::path::Component;
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

pub async fn fulfill_repo_file(
    repo_root: &Path,
    path: &str,
    start_line: Option<u32>,
    end_line: Option<u32>,
    max_bytes: usize,
    char_cap: usize,
) -> Result<FulfilledRequest, AppError> {
    let resolved = resolve_in_repo(repo_root, path)?;
    let content = tokio::fs::read_to_string(&resolved)
        .await
        .map_err(|e| AppError::TransportError(format!("reading '{path}': {e}")))?;

    let sliced = match (start_line, end_line) {
        (Some(start), end) => {
            let end = end.unwrap_or(start);
            content
                .lines()
                .skip(start.saturating_sub(1) as usize)
                .take((end.saturating_sub(start) + 1) as usize)
                .collect::<Vec<_>>()
                .join("\n")
        }
        (None, _) => content,
    };

    let byte_capped: String = sliced.bytes().take(max_bytes).map(|b| b as char).collect();
    let mut truncated = byte_capped.len() < sliced.len();
    let summary: String = if byte_capped.chars().count() > char_cap {
        truncated = true;
        byte_capped.chars().take(char_cap).collect()
    } else {
        byte_capped
    };

    Ok(FulfilledRequest {
        signature: format!("repo_file:{path}:{start_line:?}:{end_line:?}"),
        summary,
        truncated,
    })
}

pub async fn fulfill_http_get(
    client: &reqwest::Client,
    url: &str,
    headers: &[(String, String)],
    deny_list: &[String],
    max_bytes: usize,
    char_cap: usize,
) -> Result<FulfilledRequest, AppError> {
    let parsed = url::Url::parse(url).map_err(|e| AppError::TransportError(e.to_string()))?;
    let host = parsed.host_str().unwrap_or_default();
    if deny_list.iter().any(|d| host == d || host.ends_with(&format!(".{d}"))) {
        return Err(AppError::TransportError(format!("host '{host}' is deny-listed")));
    }

    let mut request = client.get(url);
    for (key, value) in headers {
        request = request.header(key, value);
    }
    let response = request.send().await.map_err(|e| AppError::TransportError(e.to_string()))?;
    let body = response.text().await.map_err(|e| AppError::TransportError(e.to_string()))?;

    let byte_capped: String = body.bytes().take(max_bytes).map(|b| b as char).collect();
    let mut truncated = byte_capped.len() < body.len();
    let summary = if byte_capped.chars().count() > char_cap {
        truncated = true;
        byte_capped.chars().take(char_cap).collect()
    } else {
        byte_capped
    };

    Ok(FulfilledRequest {
        signature: format!("http_get:{url}"),
        summary,
        truncated,
    })
}

/// Whether `url` targets the same owner/repo as the current remote on
/// `github.com`/`raw.githubusercontent.com`, in which case it should be
/// rewritten to a `repo_file` request and served locally rather than
/// fetched over the network (§4.7).
pub fn github_same_repo_path(url: &str, remote_owner_repo: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    if host != "github.com" && host != "raw.githubusercontent.com" {
        return None;
    }
    let segments: Vec<&str> = parsed.path_segments()?.collect();
    if segments.len() < 2 {
        return None;
    }
    let owner_repo = format!("{}/{}", segments[0], segments[1]);
    if owner_repo != remote_owner_repo {
        return None;
    }
    // github.com/{owner}/{repo}/blob/{ref}/{path...} or
    // raw.githubusercontent.com/{owner}/{repo}/{ref}/{path...}
    let rest = if host == "github.com" && segments.get(2) == Some(&"blob") {
        &segments[4..]
    } else {
        &segments[3..]
    };
    if rest.is_empty() {
        None
    } else {
        Some(rest.join("/"))
    }
}

/// Tracks the accumulated iteration/source bounds across one information
/// request loop (§4.7: "`max_iterations` ... and `max_unique_sources`
/// bound the loop").
#[derive(Debug, Default)]
pub struct LoopBudget {
    iterations: u32,
    seen_sources: HashSet<String>,
}

impl LoopBudget {
    pub fn record_iteration(&mut self, max_iterations: u32) -> Result<(), AppError> {
        self.iterations += 1;
        if self.iterations > max_iterations {
            return Err(AppError::InformationLimitReached(self.iterations));
        }
        Ok(())
    }

    pub fn record_source(&mut self, signature: &str, max_unique_sources: usize) -> Result<(), AppError> {
        self.seen_sources.insert(signature.to_string());
        if self.seen_sources.len() > max_unique_sources {
            return Err(AppError::InformationSourceCapExceeded(self.seen_sources.len()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_repo_file_with_line_anchor() {
        let value = json!({"type": "repo_file", "path": "src/lib.rs#L10-L20"});
        let parsed = InformationRequest::parse(&value).unwrap();
        match parsed {
            InformationRequest::RepoFile { path, start_line, end_line, .. } => {
                assert_eq!(path, "src/lib.rs");
                assert_eq!(start_line, Some(10));
                assert_eq!(end_line, Some(20));
            }
            _ => panic!("expected repo_file"),
        }
    }

    #[test]
    fn resolve_in_repo_rejects_traversal() {
        let root = Path::new("/repo");
        assert!(resolve_in_repo(root, "../etc/passwd").is_err());
        assert!(resolve_in_repo(root, "src/lib.rs").is_ok());
    }

    #[test]
    fn loop_budget_enforces_iteration_cap() {
        let mut budget = LoopBudget::default();
        budget.record_iteration(2).unwrap();
        budget.record_iteration(2).unwrap();
        assert!(budget.record_iteration(2).is_err());
    }

    #[test]
    fn loop_budget_enforces_unique_source_cap() {
        let mut budget = LoopBudget::default();
        budget.record_source("a", 1).unwrap();
        assert!(budget.record_source("b", 1).is_err());
    }

    #[test]
    fn github_blob_url_for_same_repo_rewrites_to_repo_path() {
        let path = github_same_repo_path(
            "https://github.com/acme/widgets/blob/main/src/lib.rs",
            "acme/widgets",
        );
        assert_eq!(path, Some("src/lib.rs".to_string()));
    }

    #[test]
    fn github_url_for_different_repo_is_not_rewritten() {
        let path = github_same_repo_path(
            "https://github.com/other/project/blob/main/src/lib.rs",
            "acme/widgets",
        );
        assert_eq!(path, None);
    }
}
