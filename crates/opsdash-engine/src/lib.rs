//! Capability-execution and refresh-orchestration engine behind the
//! workspace control panel. The presentation layer observes [`PanelState`]
//! and the transcript event feed; everything here is UI-agnostic.

pub mod artifacts;
pub mod error;
pub mod refresh;
pub mod runner;
pub mod state;
pub mod workspace;

pub use artifacts::{
    AgentRunsSnapshot, ArtifactKind, CapabilitiesSnapshot, DependencySnapshot, Fetched,
    MetaCheckSnapshot, OverridesSnapshot,
};
pub use error::EngineError;
pub use refresh::RefreshOrchestrator;
pub use runner::{CapabilityRunner, RunOutcome, RunRequest, RunStatus};
pub use state::{ArtifactSlot, PanelState};
pub use workspace::{WorkspaceResolver, WORKSPACE_ROOT_ENV};
