//! Serde contracts for the JSON artifacts the external producer scripts
//! write under the workspace. Field names mirror the producers' camelCase
//! output; unknown fields are tolerated so producers can grow their payloads
//! without breaking the panel.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Workspace health report produced by the meta-check automation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaCheckReport {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub completed: Option<String>,
    #[serde(default, rename = "logPath")]
    pub log_path: Option<String>,
    #[serde(default)]
    pub checks: Vec<MetaCheckEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaCheckEntry {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, rename = "durationSeconds")]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Toolchain pin manifest; the panel only consumes the repo count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolchainManifest {
    #[serde(default)]
    pub repos: HashMap<String, Value>,
}

impl ToolchainManifest {
    pub fn repo_count(&self) -> usize {
        self.repos.len()
    }
}

/// Cross-repo consistency report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossRepoReport {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub findings: Vec<String>,
    #[serde(default)]
    pub metadata: CrossRepoMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrossRepoMetadata {
    #[serde(default)]
    pub repositories: Option<u64>,
}

/// Renovate-style dependency dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyDashboard {
    #[serde(default)]
    pub status: String,
    #[serde(default, rename = "pendingPRs")]
    pub pending_prs: u64,
    #[serde(default)]
    pub repositories: Vec<RepoDependencyStatus>,
    #[serde(default, rename = "topRisks")]
    pub top_risks: Vec<DependencyRisk>,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoDependencyStatus {
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, rename = "pendingPRs")]
    pub pending_prs: u64,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyRisk {
    pub name: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub summary: String,
}

/// One per-project override policy file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideManifest {
    pub project: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub overrides: BTreeMap<String, ToolOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOverride {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub expires: Option<String>,
}

/// One entry in the recorded agent-run history, oldest first on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunRecord {
    pub id: String,
    #[serde(default)]
    pub capability: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub started: Option<String>,
    #[serde(default, rename = "logPath")]
    pub log_path: Option<String>,
}

/// Registry of launchable capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityManifest {
    #[serde(default)]
    pub capabilities: Vec<CapabilityDescriptor>,
}

impl CapabilityManifest {
    pub fn find(&self, id: &str) -> Option<&CapabilityDescriptor> {
        self.capabilities.iter().find(|cap| cap.id == id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub id: String,
    #[serde(default)]
    pub summary: String,
    pub entrypoint: String,
    #[serde(default)]
    pub inputs: CapabilityInputs,
    #[serde(default)]
    pub origin: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilityInputs {
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl CapabilityDescriptor {
    /// A capability advertises a dry-run toggle by declaring a `check`
    /// input property in its manifest entry.
    pub fn supports_check_mode(&self) -> bool {
        self.inputs.properties.contains_key("check")
    }
}
