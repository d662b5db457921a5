//! Per-cycle refresh orchestration: resolve the root, fan out the five
//! artifact fetches, join them all, tolerate partial failure. A newer
//! refresh supersedes an in-flight one by cancelling its token; cancelled
//! tasks skip publishing and leave prior snapshots intact.

use crate::artifacts;
use crate::state::PanelState;
use crate::workspace::WorkspaceResolver;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct RefreshOrchestrator {
    state: Arc<PanelState>,
    resolver: WorkspaceResolver,
    /// Pinned root for embedders/tests; `None` re-resolves every cycle.
    root_override: Option<PathBuf>,
    current: Mutex<CancellationToken>,
}

impl RefreshOrchestrator {
    pub fn new(state: Arc<PanelState>) -> Self {
        Self {
            state,
            resolver: WorkspaceResolver,
            root_override: None,
            current: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn with_root(state: Arc<PanelState>, root: PathBuf) -> Self {
        Self {
            root_override: Some(root),
            ..Self::new(state)
        }
    }

    /// Cancel whatever refresh is in flight without starting a new one
    /// (view going away).
    pub async fn cancel(&self) {
        self.current.lock().await.cancel();
    }

    /// Run one refresh cycle. Re-entrant: calling again supersedes the
    /// previous cycle. Returns the root the cycle ran against, if any.
    pub async fn refresh(&self) -> Option<PathBuf> {
        let token = {
            let mut current = self.current.lock().await;
            current.cancel();
            let fresh = CancellationToken::new();
            *current = fresh.clone();
            fresh
        };

        // Root may have changed since the last cycle; resolve before
        // anything else.
        let root = match &self.root_override {
            Some(root) => Some(root.clone()),
            None => self.resolver.resolve(),
        };
        let Some(root) = root else {
            info!("refresh: workspace root not found");
            // A superseded cycle no longer owns the shared flags.
            if !token.is_cancelled() {
                self.state.set_workspace_missing(true).await;
                self.state.set_refreshing(false).await;
            }
            return None;
        };
        self.state.set_workspace_missing(false).await;
        self.state.set_refreshing(true).await;
        debug!("refresh: fetching artifacts under {}", root.display());

        let mut tasks = Vec::with_capacity(5);

        {
            let state = self.state.clone();
            let root = root.clone();
            let token = token.clone();
            tasks.push(tokio::spawn(async move {
                state.capabilities.write().await.loading = true;
                let fetched = artifacts::fetch_capabilities(&root).await;
                if token.is_cancelled() {
                    state.capabilities.write().await.loading = false;
                    return;
                }
                state.capabilities.write().await.publish(fetched);
            }));
        }
        {
            let state = self.state.clone();
            let root = root.clone();
            let token = token.clone();
            tasks.push(tokio::spawn(async move {
                state.meta_check.write().await.loading = true;
                let fetched = artifacts::fetch_meta_check(&root).await;
                if token.is_cancelled() {
                    state.meta_check.write().await.loading = false;
                    return;
                }
                state.meta_check.write().await.publish(fetched);
            }));
        }
        {
            let state = self.state.clone();
            let root = root.clone();
            let token = token.clone();
            tasks.push(tokio::spawn(async move {
                state.dependencies.write().await.loading = true;
                let fetched = artifacts::fetch_dependencies(&root).await;
                if token.is_cancelled() {
                    state.dependencies.write().await.loading = false;
                    return;
                }
                state.dependencies.write().await.publish(fetched);
            }));
        }
        {
            let state = self.state.clone();
            let root = root.clone();
            let token = token.clone();
            tasks.push(tokio::spawn(async move {
                state.overrides.write().await.loading = true;
                let fetched = artifacts::fetch_overrides(&root).await;
                if token.is_cancelled() {
                    state.overrides.write().await.loading = false;
                    return;
                }
                state.overrides.write().await.publish(fetched);
            }));
        }
        {
            let state = self.state.clone();
            let root = root.clone();
            let token = token.clone();
            tasks.push(tokio::spawn(async move {
                state.agent_runs.write().await.loading = true;
                let fetched = artifacts::fetch_agent_runs(&root).await;
                if token.is_cancelled() {
                    state.agent_runs.write().await.loading = false;
                    return;
                }
                state.agent_runs.write().await.publish(fetched);
            }));
        }

        // Structured join: the refreshing flag only clears after every
        // fetch has finished, cancelled or not.
        for task in tasks {
            let _ = task.await;
        }
        // A cancelled cycle joins quietly; clearing the flag here would
        // steal it from the live successor that set it.
        if !token.is_cancelled() {
            self.state.set_refreshing(false).await;
        }
        Some(root)
    }
}
