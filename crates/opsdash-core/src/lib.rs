use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub mod contracts;
pub mod transcript;

pub use contracts::{
    AgentRunRecord, CapabilityDescriptor, CapabilityManifest, CrossRepoReport,
    DependencyDashboard, DependencyRisk, MetaCheckEntry, MetaCheckReport, OverrideManifest,
    RepoDependencyStatus, ToolOverride, ToolchainManifest,
};
pub use transcript::{TranscriptEntry, TranscriptLog, TranscriptRole, TranscriptStream};

/// Rollup health indicator shared by every artifact and run summary.
///
/// Variant order is severity order: the earlier variant always dominates
/// when two indicators are merged.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum StatusIndicator {
    Failed,
    Warning,
    Informational,
    Ok,
    Skipped,
    Unknown,
}

impl StatusIndicator {
    /// The more severe of the two indicators.
    pub fn dominant(a: StatusIndicator, b: StatusIndicator) -> StatusIndicator {
        a.min(b)
    }

    /// Fold `dominant` over an iterator. Empty input is `Unknown`.
    pub fn dominant_of<I>(indicators: I) -> StatusIndicator
    where
        I: IntoIterator<Item = StatusIndicator>,
    {
        indicators
            .into_iter()
            .fold(StatusIndicator::Unknown, StatusIndicator::dominant)
    }

    /// Map a producer-defined raw status code onto the closed indicator set.
    /// Codes outside the known vocabulary become `Unknown`.
    pub fn from_raw(code: &str) -> StatusIndicator {
        match code.trim().to_lowercase().as_str() {
            "ok" | "succeeded" => StatusIndicator::Ok,
            "drift" | "warning" | "moderate" | "partial" => StatusIndicator::Warning,
            "failed" | "critical" => StatusIndicator::Failed,
            "skipped" => StatusIndicator::Skipped,
            "informational" => StatusIndicator::Informational,
            _ => StatusIndicator::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusIndicator::Failed => "failed",
            StatusIndicator::Warning => "warning",
            StatusIndicator::Informational => "informational",
            StatusIndicator::Ok => "ok",
            StatusIndicator::Skipped => "skipped",
            StatusIndicator::Unknown => "unknown",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, StatusIndicator::Failed)
    }
}

impl Default for StatusIndicator {
    fn default() -> Self {
        Self::Unknown
    }
}

impl fmt::Display for StatusIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusIndicator {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "failed" => Ok(StatusIndicator::Failed),
            "warning" => Ok(StatusIndicator::Warning),
            "informational" => Ok(StatusIndicator::Informational),
            "ok" => Ok(StatusIndicator::Ok),
            "skipped" => Ok(StatusIndicator::Skipped),
            "unknown" => Ok(StatusIndicator::Unknown),
            other => Err(format!("Unknown indicator: {other}")),
        }
    }
}

/// Derive the storage slug for a workspace root from its directory name.
/// Non-alphanumeric runs collapse to a single `-`; an unusable name falls
/// back to `"default"`.
pub fn workspace_slug(root: &Path) -> String {
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "default".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const ALL: [StatusIndicator; 6] = [
        StatusIndicator::Failed,
        StatusIndicator::Warning,
        StatusIndicator::Informational,
        StatusIndicator::Ok,
        StatusIndicator::Skipped,
        StatusIndicator::Unknown,
    ];

    #[test]
    fn dominant_is_commutative_and_associative() {
        for a in ALL {
            for b in ALL {
                assert_eq!(
                    StatusIndicator::dominant(a, b),
                    StatusIndicator::dominant(b, a)
                );
                for c in ALL {
                    assert_eq!(
                        StatusIndicator::dominant(StatusIndicator::dominant(a, b), c),
                        StatusIndicator::dominant(a, StatusIndicator::dominant(b, c))
                    );
                }
            }
        }
    }

    #[test]
    fn unknown_is_the_weakest_element() {
        for a in ALL {
            assert_eq!(StatusIndicator::dominant(a, StatusIndicator::Unknown), a);
        }
    }

    #[test]
    fn severity_order_matches_contract() {
        assert!(StatusIndicator::Failed < StatusIndicator::Warning);
        assert!(StatusIndicator::Warning < StatusIndicator::Informational);
        assert!(StatusIndicator::Informational < StatusIndicator::Ok);
        assert!(StatusIndicator::Ok < StatusIndicator::Skipped);
        assert!(StatusIndicator::Skipped < StatusIndicator::Unknown);
    }

    #[test]
    fn from_raw_covers_the_producer_vocabulary() {
        let expected = [
            ("ok", StatusIndicator::Ok),
            ("succeeded", StatusIndicator::Ok),
            ("drift", StatusIndicator::Warning),
            ("warning", StatusIndicator::Warning),
            ("moderate", StatusIndicator::Warning),
            ("partial", StatusIndicator::Warning),
            ("failed", StatusIndicator::Failed),
            ("critical", StatusIndicator::Failed),
            ("skipped", StatusIndicator::Skipped),
            ("informational", StatusIndicator::Informational),
        ];
        for (raw, indicator) in expected {
            assert_eq!(StatusIndicator::from_raw(raw), indicator, "code {raw}");
        }
        assert_eq!(
            StatusIndicator::from_raw("  Drift "),
            StatusIndicator::Warning
        );
        assert_eq!(
            StatusIndicator::from_raw("definitely-not-a-code"),
            StatusIndicator::Unknown
        );
        assert_eq!(StatusIndicator::from_raw(""), StatusIndicator::Unknown);
    }

    #[test]
    fn dominant_of_reduces_lists() {
        assert_eq!(
            StatusIndicator::dominant_of([
                StatusIndicator::Ok,
                StatusIndicator::Warning,
                StatusIndicator::Skipped,
            ]),
            StatusIndicator::Warning
        );
        assert_eq!(
            StatusIndicator::dominant_of(std::iter::empty()),
            StatusIndicator::Unknown
        );
    }

    #[test]
    fn slug_collapses_punctuation() {
        assert_eq!(workspace_slug(Path::new("/tmp/My Workspace")), "my-workspace");
        assert_eq!(
            workspace_slug(Path::new("/srv/ops__dash: 2")),
            "ops-dash-2"
        );
        assert_eq!(workspace_slug(&PathBuf::from("/")), "default");
        assert_eq!(workspace_slug(Path::new("/x/---")), "default");
    }
}
