//! Bounded, size-checked artifact fetches. Every fetch decodes one of the
//! producer JSON files into a published snapshot; any I/O or decode failure
//! becomes [`Fetched::Stale`] so the caller keeps the last-known-good
//! snapshot. A missing file and a corrupt file are deliberately
//! indistinguishable here.

use opsdash_core::{
    AgentRunRecord, CapabilityManifest, CrossRepoReport, DependencyDashboard, MetaCheckEntry,
    OverrideManifest, StatusIndicator, ToolchainManifest,
};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Ceiling above which a fetch logs a warning before reading anyway.
const FILE_SIZE_CEILING: u64 = 25 * 1024 * 1024;

const CAPABILITIES_PATH: &str = "capabilities/manifest.json";
const META_CHECK_PATH: &str = ".dev/automation/artifacts/health/meta-check.json";
const DEPENDENCIES_PATH: &str = ".dev/automation/artifacts/dependencies/dashboard.json";
const CROSS_REPO_PATH: &str = ".dev/automation/artifacts/dependencies/cross-repo.json";
const TOOLCHAIN_PATH: &str = ".dev/automation/artifacts/dependencies/toolchain.json";
const OVERRIDES_DIR: &str = ".dev/automation/artifacts/overrides";
const AGENT_RUNS_PATH: &str = ".dev/automation/artifacts/automation/agent-runs.json";

/// The fixed set of per-refresh fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Capabilities,
    MetaCheck,
    Dependencies,
    Overrides,
    AgentRuns,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 5] = [
        ArtifactKind::Capabilities,
        ArtifactKind::MetaCheck,
        ArtifactKind::Dependencies,
        ArtifactKind::Overrides,
        ArtifactKind::AgentRuns,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Capabilities => "capabilities",
            ArtifactKind::MetaCheck => "meta-check",
            ArtifactKind::Dependencies => "dependencies",
            ArtifactKind::Overrides => "overrides",
            ArtifactKind::AgentRuns => "agent-runs",
        }
    }
}

/// Outcome of one fetch: a fresh snapshot, or "keep what you had".
#[derive(Debug, Clone)]
pub enum Fetched<T> {
    Snapshot(T),
    Stale,
}

impl<T> Fetched<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Fetched::Snapshot(value) => Some(value),
            Fetched::Stale => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CapabilitiesSnapshot {
    pub indicator: StatusIndicator,
    pub summary: String,
    pub manifest: CapabilityManifest,
}

#[derive(Debug, Clone)]
pub struct MetaCheckSnapshot {
    pub indicator: StatusIndicator,
    pub summary: String,
    pub completed: Option<String>,
    pub log_path: Option<String>,
    pub checks: Vec<MetaCheckEntry>,
}

#[derive(Debug, Clone)]
pub struct DependencySnapshot {
    pub indicator: StatusIndicator,
    pub summary: String,
    pub dashboard: DependencyDashboard,
    /// Findings from the cross-repo consistency report, when present.
    pub cross_findings: Vec<String>,
    /// Repo count from the toolchain manifest, when present.
    pub tracked_repos: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct OverridesSnapshot {
    pub indicator: StatusIndicator,
    pub summary: String,
    pub manifests: Vec<OverrideManifest>,
}

impl OverridesSnapshot {
    pub fn override_count(&self) -> usize {
        self.manifests.iter().map(|m| m.overrides.len()).sum()
    }
}

#[derive(Debug, Clone)]
pub struct AgentRunsSnapshot {
    pub indicator: StatusIndicator,
    pub summary: String,
    pub runs: Vec<AgentRunRecord>,
}

/// Read one artifact file, logging (not failing) when it exceeds the size
/// ceiling. `None` covers both missing and unreadable files.
async fn read_artifact(path: &Path) -> Option<Vec<u8>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.len() > FILE_SIZE_CEILING => {
            warn!(
                "artifact_oversized: {} is {} bytes (ceiling {FILE_SIZE_CEILING})",
                path.display(),
                meta.len()
            );
        }
        Ok(_) => {}
        Err(err) => {
            debug!("artifact_unreadable: {}: {err}", path.display());
            return None;
        }
    }
    match tokio::fs::read(path).await {
        Ok(bytes) => Some(bytes),
        Err(err) => {
            warn!("artifact_read_failed: {}: {err}", path.display());
            None
        }
    }
}

async fn decode_artifact<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = read_artifact(path).await?;
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("artifact_decode_failed: {}: {err}", path.display());
            None
        }
    }
}

pub async fn fetch_capabilities(root: &Path) -> Fetched<CapabilitiesSnapshot> {
    let Some(manifest) =
        decode_artifact::<CapabilityManifest>(&root.join(CAPABILITIES_PATH)).await
    else {
        return Fetched::Stale;
    };
    let count = manifest.capabilities.len();
    Fetched::Snapshot(CapabilitiesSnapshot {
        indicator: StatusIndicator::Ok,
        summary: format!("{count} capabilities registered"),
        manifest,
    })
}

pub async fn fetch_meta_check(root: &Path) -> Fetched<MetaCheckSnapshot> {
    let Some(report) = decode_artifact::<opsdash_core::MetaCheckReport>(
        &root.join(META_CHECK_PATH),
    )
    .await
    else {
        return Fetched::Stale;
    };
    let indicator = StatusIndicator::dominant(
        StatusIndicator::from_raw(&report.status),
        StatusIndicator::dominant_of(
            report.checks.iter().map(|c| StatusIndicator::from_raw(&c.status)),
        ),
    );
    let failing = report
        .checks
        .iter()
        .filter(|c| StatusIndicator::from_raw(&c.status).is_failure())
        .count();
    let summary = if report.summary.is_empty() {
        format!("{} checks, {failing} failing", report.checks.len())
    } else {
        report.summary.clone()
    };
    Fetched::Snapshot(MetaCheckSnapshot {
        indicator,
        summary,
        completed: report.completed,
        log_path: report.log_path,
        checks: report.checks,
    })
}

pub async fn fetch_dependencies(root: &Path) -> Fetched<DependencySnapshot> {
    let Some(dashboard) =
        decode_artifact::<DependencyDashboard>(&root.join(DEPENDENCIES_PATH)).await
    else {
        return Fetched::Stale;
    };
    // The cross-repo report and toolchain manifest enrich the snapshot but
    // never block it.
    let cross = decode_artifact::<CrossRepoReport>(&root.join(CROSS_REPO_PATH)).await;
    let toolchain = decode_artifact::<ToolchainManifest>(&root.join(TOOLCHAIN_PATH)).await;

    let mut indicator = StatusIndicator::from_raw(&dashboard.status);
    indicator = StatusIndicator::dominant(
        indicator,
        StatusIndicator::dominant_of(
            dashboard
                .repositories
                .iter()
                .map(|repo| StatusIndicator::from_raw(&repo.status)),
        ),
    );
    indicator = StatusIndicator::dominant(
        indicator,
        StatusIndicator::dominant_of(
            dashboard
                .top_risks
                .iter()
                .map(|risk| StatusIndicator::from_raw(&risk.severity)),
        ),
    );
    if !dashboard.errors.is_empty() {
        indicator = StatusIndicator::dominant(indicator, StatusIndicator::Warning);
    }
    let cross_findings = cross
        .as_ref()
        .map(|report| report.findings.clone())
        .unwrap_or_default();
    if let Some(report) = &cross {
        indicator = StatusIndicator::dominant(indicator, StatusIndicator::from_raw(&report.status));
    }
    let summary = format!(
        "{} pending PRs across {} repositories",
        dashboard.pending_prs,
        dashboard.repositories.len()
    );
    Fetched::Snapshot(DependencySnapshot {
        indicator,
        summary,
        dashboard,
        cross_findings,
        tracked_repos: toolchain.map(|m| m.repo_count()),
    })
}

pub async fn fetch_overrides(root: &Path) -> Fetched<OverridesSnapshot> {
    let dir = root.join(OVERRIDES_DIR);
    let mut reader = match tokio::fs::read_dir(&dir).await {
        Ok(reader) => reader,
        Err(err) => {
            debug!("overrides_dir_unreadable: {}: {err}", dir.display());
            return Fetched::Stale;
        }
    };
    let mut manifests = Vec::new();
    loop {
        let entry = match reader.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(err) => {
                warn!("overrides_dir_iter_failed: {}: {err}", dir.display());
                return Fetched::Stale;
            }
        };
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match decode_artifact::<OverrideManifest>(&path).await {
            Some(manifest) => manifests.push(manifest),
            // One undecodable policy file makes the whole kind stale; the
            // prior snapshot stays visible.
            None => return Fetched::Stale,
        }
    }
    manifests.sort_by(|a, b| a.project.cmp(&b.project));
    let total: usize = manifests.iter().map(|m| m.overrides.len()).sum();
    let indicator = if total == 0 {
        StatusIndicator::Ok
    } else {
        StatusIndicator::Informational
    };
    Fetched::Snapshot(OverridesSnapshot {
        indicator,
        summary: format!("{total} overrides across {} projects", manifests.len()),
        manifests,
    })
}

pub async fn fetch_agent_runs(root: &Path) -> Fetched<AgentRunsSnapshot> {
    let Some(runs) =
        decode_artifact::<Vec<AgentRunRecord>>(&root.join(AGENT_RUNS_PATH)).await
    else {
        return Fetched::Stale;
    };
    // History is stored oldest first; the latest run colors the snapshot.
    let indicator = runs
        .last()
        .map(|run| StatusIndicator::from_raw(&run.status))
        .unwrap_or(StatusIndicator::Unknown);
    Fetched::Snapshot(AgentRunsSnapshot {
        indicator,
        summary: format!("{} recorded runs", runs.len()),
        runs,
    })
}

/// Absolute path of the artifact backing a kind, for diagnostics.
pub fn artifact_path(root: &Path, kind: ArtifactKind) -> PathBuf {
    match kind {
        ArtifactKind::Capabilities => root.join(CAPABILITIES_PATH),
        ArtifactKind::MetaCheck => root.join(META_CHECK_PATH),
        ArtifactKind::Dependencies => root.join(DEPENDENCIES_PATH),
        ArtifactKind::Overrides => root.join(OVERRIDES_DIR),
        ArtifactKind::AgentRuns => root.join(AGENT_RUNS_PATH),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn every_kind_maps_to_a_path_under_the_root() {
        let root = Path::new("/srv/acme");
        for kind in ArtifactKind::ALL {
            let path = artifact_path(root, kind);
            assert!(path.starts_with(root), "{}", kind.as_str());
        }
        assert!(artifact_path(root, ArtifactKind::MetaCheck)
            .ends_with(".dev/automation/artifacts/health/meta-check.json"));
    }

    #[tokio::test]
    async fn missing_artifact_is_stale() {
        let root = TempDir::new().expect("tempdir");
        assert!(fetch_meta_check(root.path()).await.into_option().is_none());
    }

    #[tokio::test]
    async fn empty_overrides_dir_reads_as_ok() {
        let root = TempDir::new().expect("tempdir");
        std::fs::create_dir_all(artifact_path(root.path(), ArtifactKind::Overrides))
            .expect("overrides dir");
        let snapshot = fetch_overrides(root.path())
            .await
            .into_option()
            .expect("snapshot");
        assert_eq!(snapshot.indicator, StatusIndicator::Ok);
        assert_eq!(snapshot.override_count(), 0);
    }
}
