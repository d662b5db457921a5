//! Shared panel state: the one owned application-state struct every
//! component writes its designated fields into. Slots are replaced
//! wholesale on publish; only one component ever writes a given slot.

use crate::artifacts::{
    AgentRunsSnapshot, CapabilitiesSnapshot, DependencySnapshot, Fetched, MetaCheckSnapshot,
    OverridesSnapshot,
};
use chrono::{DateTime, Utc};
use opsdash_core::{
    StatusIndicator, TranscriptEntry, TranscriptLog, TranscriptRole, TranscriptStream,
};
use std::path::Path;
use tokio::sync::{broadcast, Mutex, RwLock};

use crate::error::EngineError;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// One artifact kind's published snapshot plus its loading flag.
#[derive(Debug)]
pub struct ArtifactSlot<T> {
    pub snapshot: Option<T>,
    pub loading: bool,
}

// Manual impl: an empty slot needs no `T: Default`.
impl<T> Default for ArtifactSlot<T> {
    fn default() -> Self {
        Self {
            snapshot: None,
            loading: false,
        }
    }
}

impl<T> ArtifactSlot<T> {
    /// Publish a fetch outcome: a snapshot replaces the slot, `Stale` keeps
    /// the prior snapshot (last-known-good policy).
    pub fn publish(&mut self, fetched: Fetched<T>) {
        if let Fetched::Snapshot(snapshot) = fetched {
            self.snapshot = Some(snapshot);
        }
        self.loading = false;
    }
}

/// The in-flight capability run. At most one exists at a time.
#[derive(Debug, Clone)]
pub struct ActiveRun {
    pub capability_id: String,
    pub started_at: DateTime<Utc>,
    pub pid: Option<u32>,
    pub cancel_requested: bool,
}

#[derive(Debug, Default)]
struct PanelFlags {
    refreshing: bool,
    workspace_missing: bool,
}

/// Shared view state. Hand out as `Arc<PanelState>`; readers take the slot
/// locks briefly, writers only ever touch their own slot.
pub struct PanelState {
    pub capabilities: RwLock<ArtifactSlot<CapabilitiesSnapshot>>,
    pub meta_check: RwLock<ArtifactSlot<MetaCheckSnapshot>>,
    pub dependencies: RwLock<ArtifactSlot<DependencySnapshot>>,
    pub overrides: RwLock<ArtifactSlot<OverridesSnapshot>>,
    pub agent_runs: RwLock<ArtifactSlot<AgentRunsSnapshot>>,
    flags: RwLock<PanelFlags>,
    transcript: RwLock<TranscriptLog>,
    active_run: Mutex<Option<ActiveRun>>,
    events: broadcast::Sender<TranscriptEntry>,
}

impl Default for PanelState {
    fn default() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            capabilities: RwLock::default(),
            meta_check: RwLock::default(),
            dependencies: RwLock::default(),
            overrides: RwLock::default(),
            agent_runs: RwLock::default(),
            flags: RwLock::default(),
            transcript: RwLock::new(TranscriptLog::default_transcript()),
            active_run: Mutex::default(),
            events,
        }
    }
}

impl PanelState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the in-memory transcript with the persisted one for `root`.
    pub async fn load_transcript(&self, root: &Path) {
        let loaded = opsdash_storage::load_transcript(root);
        *self.transcript.write().await = loaded;
    }

    pub async fn transcript_snapshot(&self) -> Vec<TranscriptEntry> {
        self.transcript.read().await.snapshot()
    }

    /// Live feed of appended entries. Streamed chunks arrive uncoalesced,
    /// in delivery order; the durable transcript is the coalesced form.
    pub fn subscribe(&self) -> broadcast::Receiver<TranscriptEntry> {
        self.events.subscribe()
    }

    pub async fn append_entry(&self, entry: TranscriptEntry) {
        self.transcript.write().await.append(entry.clone());
        let _ = self.events.send(entry);
    }

    pub async fn append_stream(
        &self,
        text: &str,
        capability_id: &str,
        stream: TranscriptStream,
        status: StatusIndicator,
    ) {
        if text.trim().is_empty() {
            return;
        }
        self.transcript
            .write()
            .await
            .append_stream(text, capability_id, stream, status);
        let mut chunk = TranscriptEntry::new(TranscriptRole::Assistant, text);
        chunk.status = Some(status);
        chunk.capability_id = Some(capability_id.to_string());
        chunk.stream = stream;
        let _ = self.events.send(chunk);
    }

    /// Fire-and-forget persistence of the current transcript for `root`.
    pub async fn persist_transcript(&self, root: &Path) {
        let entries = self.transcript.read().await.snapshot();
        opsdash_storage::spawn_persist(root, entries);
    }

    pub async fn set_refreshing(&self, refreshing: bool) {
        self.flags.write().await.refreshing = refreshing;
    }

    pub async fn is_refreshing(&self) -> bool {
        self.flags.read().await.refreshing
    }

    pub async fn set_workspace_missing(&self, missing: bool) {
        self.flags.write().await.workspace_missing = missing;
    }

    pub async fn workspace_missing(&self) -> bool {
        self.flags.read().await.workspace_missing
    }

    /// Reduce every published snapshot's indicator into the panel rollup.
    pub async fn rollup(&self) -> StatusIndicator {
        let mut indicators = Vec::with_capacity(5);
        if let Some(s) = &self.capabilities.read().await.snapshot {
            indicators.push(s.indicator);
        }
        if let Some(s) = &self.meta_check.read().await.snapshot {
            indicators.push(s.indicator);
        }
        if let Some(s) = &self.dependencies.read().await.snapshot {
            indicators.push(s.indicator);
        }
        if let Some(s) = &self.overrides.read().await.snapshot {
            indicators.push(s.indicator);
        }
        if let Some(s) = &self.agent_runs.read().await.snapshot {
            indicators.push(s.indicator);
        }
        StatusIndicator::dominant_of(indicators)
    }

    /// Atomically claim the single capability slot. The checked-and-set is
    /// one lock acquisition; concurrent claims see `AlreadyRunning`.
    pub async fn try_claim_run(&self, capability_id: &str) -> Result<(), EngineError> {
        let mut guard = self.active_run.lock().await;
        if let Some(active) = guard.as_ref() {
            return Err(EngineError::AlreadyRunning {
                running: active.capability_id.clone(),
            });
        }
        *guard = Some(ActiveRun {
            capability_id: capability_id.to_string(),
            started_at: Utc::now(),
            pid: None,
            cancel_requested: false,
        });
        Ok(())
    }

    pub async fn set_run_pid(&self, pid: Option<u32>) {
        if let Some(active) = self.active_run.lock().await.as_mut() {
            active.pid = pid;
        }
    }

    /// Flag the active run for cancellation and hand back its pid so the
    /// caller can signal the process. `None` when nothing is running.
    pub async fn request_cancel(&self) -> Option<ActiveRun> {
        let mut guard = self.active_run.lock().await;
        let active = guard.as_mut()?;
        active.cancel_requested = true;
        Some(active.clone())
    }

    pub async fn cancel_requested(&self) -> bool {
        self.active_run
            .lock()
            .await
            .as_ref()
            .map(|run| run.cancel_requested)
            .unwrap_or(false)
    }

    pub async fn active_run(&self) -> Option<ActiveRun> {
        self.active_run.lock().await.clone()
    }

    /// Release the single-flight guard, returning the finished run.
    pub async fn release_run(&self) -> Option<ActiveRun> {
        self.active_run.lock().await.take()
    }

    /// The manifest entry for `id` from the published capabilities snapshot.
    pub async fn capability(&self, id: &str) -> Option<opsdash_core::CapabilityDescriptor> {
        self.capabilities
            .read()
            .await
            .snapshot
            .as_ref()
            .and_then(|snap| snap.manifest.find(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_state_starts_with_empty_idle_slots() {
        let state = PanelState::new();
        let capabilities = state.capabilities.read().await;
        assert!(capabilities.snapshot.is_none());
        assert!(!capabilities.loading);
        drop(capabilities);
        assert!(state.agent_runs.read().await.snapshot.is_none());
        assert!(!state.is_refreshing().await);
        assert!(state.active_run().await.is_none());
    }

    #[tokio::test]
    async fn claim_is_single_flight() {
        let state = PanelState::new();
        state.try_claim_run("cap-a").await.expect("first claim");
        let err = state.try_claim_run("cap-b").await.expect_err("second claim");
        match err {
            EngineError::AlreadyRunning { running } => assert_eq!(running, "cap-a"),
            other => panic!("unexpected error: {other}"),
        }
        state.release_run().await.expect("release");
        state.try_claim_run("cap-b").await.expect("free again");
    }

    #[tokio::test]
    async fn rollup_reads_published_slots_only() {
        let state = PanelState::new();
        assert_eq!(state.rollup().await, StatusIndicator::Unknown);
        state.meta_check.write().await.publish(Fetched::Snapshot(MetaCheckSnapshot {
            indicator: StatusIndicator::Ok,
            summary: "all good".into(),
            completed: None,
            log_path: None,
            checks: Vec::new(),
        }));
        assert_eq!(state.rollup().await, StatusIndicator::Ok);
        state
            .dependencies
            .write()
            .await
            .publish(Fetched::Snapshot(DependencySnapshot {
                indicator: StatusIndicator::Warning,
                summary: "drift".into(),
                dashboard: serde_json::from_str("{}").expect("empty dashboard"),
                cross_findings: Vec::new(),
                tracked_repos: None,
            }));
        assert_eq!(state.rollup().await, StatusIndicator::Warning);
    }

    #[tokio::test]
    async fn stale_publish_keeps_the_prior_snapshot() {
        let state = PanelState::new();
        let mut slot = state.meta_check.write().await;
        slot.publish(Fetched::Snapshot(MetaCheckSnapshot {
            indicator: StatusIndicator::Ok,
            summary: "first".into(),
            completed: None,
            log_path: None,
            checks: Vec::new(),
        }));
        slot.loading = true;
        slot.publish(Fetched::Stale);
        assert!(!slot.loading);
        assert_eq!(slot.snapshot.as_ref().expect("kept").summary, "first");
    }

    #[tokio::test]
    async fn cancel_request_marks_the_active_run() {
        let state = PanelState::new();
        assert!(state.request_cancel().await.is_none());
        state.try_claim_run("cap").await.expect("claim");
        state.set_run_pid(Some(4242)).await;
        let run = state.request_cancel().await.expect("active");
        assert_eq!(run.pid, Some(4242));
        assert!(state.cancel_requested().await);
    }
}
