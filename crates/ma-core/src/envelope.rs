//! Wire types for the request/event stream protocol (spec §3, §6).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Entry appended to the request stream (all fields are string-valued on
/// the wire; this is the typed in-process view built from/serialized to
/// that flattened field map by `ma-transport`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaRequestEnvelope {
    pub workflow_id: String,
    pub step: String,
    pub from: String,
    #[serde(default)]
    pub to_persona: Option<String>,
    pub intent: String,
    pub corr_id: String,
    /// JSON-encoded payload, kept as a string to mirror the stream's
    /// string-valued field model.
    pub payload: String,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    pub deadline_s: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Done,
    Error,
}

/// Entry appended to the event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaResponseEnvelope {
    pub workflow_id: String,
    pub from_persona: String,
    pub status: EventStatus,
    pub corr_id: String,
    pub step: String,
    /// JSON-encoded `PersonaResultBody`.
    pub result: String,
    pub duration_ms: u64,
    #[serde(default)]
    pub ts: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Normalized persona status (§3 Persona Result Body, §4.6 step 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonaStatus {
    Pass,
    Fail,
    Unknown,
}

/// The decoded `result` payload of a `PersonaResponseEnvelope`, tagged by
/// whether it is a terminal answer or an information request (spec §9:
/// "Implement as a tagged variant after parsing").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PersonaResultBody {
    InformationRequest(InformationRequestBody),
    Terminal(TerminalResultBody),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InformationRequestBody {
    pub information_request: Vec<serde_json::Value>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalResultBody {
    #[serde(default)]
    pub output: String,
    #[serde(default = "default_status")]
    pub status: PersonaStatus,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub duration_ms: u64,
    /// Unknown fields preserved for forward compatibility (spec §9).
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

fn default_status() -> PersonaStatus {
    PersonaStatus::Unknown
}

impl PersonaResultBody {
    /// Parse a raw `result` JSON string, tolerating persona output that
    /// omits `status` (normalized to `Unknown` per §4.6 step 6).
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// A single goal entry in a `PlanPayload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub goal: String,
    #[serde(default)]
    pub key_files: Vec<String>,
    #[serde(default)]
    pub owners: Option<Vec<String>>,
    #[serde(default)]
    pub dependencies: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanMeta {
    #[serde(default)]
    pub plan_approved: Option<bool>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanPayload {
    pub plan: Vec<PlanStep>,
    #[serde(default)]
    pub meta: PlanMeta,
}

impl PlanPayload {
    /// The union of `key_files` declared across every plan step; the set
    /// the Plan-Key-File Guard (C10) enforces.
    pub fn key_files(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for step in &self.plan {
            for f in &step.key_files {
                if !out.contains(f) {
                    out.push(f.clone());
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitOutcome {
    pub committed: bool,
    pub pushed: bool,
    pub branch: String,
    #[serde(default)]
    pub sha: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppliedEditsRecord {
    pub attempted: bool,
    pub applied: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub commit: Option<CommitOutcome>,
}

/// Validate that an artifact path is confined to `.ma/` (spec §3, §8
/// invariant 3).
pub fn validate_artifact_path(path: &str) -> Result<(), crate::error::AppError> {
    if path.starts_with(".ma/") && !path.contains("..") {
        Ok(())
    } else {
        Err(crate::error::AppError::InvalidArtifactPath(
            path.to_string(),
        ))
    }
}
