//! Workspace root resolution. Four mechanisms, first match wins:
//! environment override, remembered operator choice, upward walk from the
//! current directory, upward walk from the executable. A workspace root is
//! any directory carrying both marker paths.

use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Explicit override naming the workspace root directory.
pub const WORKSPACE_ROOT_ENV: &str = "OPSDASH_WORKSPACE_ROOT";

const MARKER_DIR: &str = ".dev/automation";
const MARKER_SCRIPTS_DIR: &str = ".dev/automation/scripts";
const MAX_ASCENT: usize = 128;

#[derive(Debug, Clone, Default)]
pub struct WorkspaceResolver;

impl WorkspaceResolver {
    /// Resolve the workspace root, or `None` when no mechanism produces a
    /// directory satisfying the marker check. `None` is an expected,
    /// operator-visible state.
    pub fn resolve(&self) -> Option<PathBuf> {
        let env_root = env::var(WORKSPACE_ROOT_ENV)
            .ok()
            .map(PathBuf::from)
            .filter(|p| p.is_dir());
        let remembered = opsdash_storage::load_remembered_root();
        let cwd = env::current_dir().ok();
        let exe_dir = env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));
        resolve_from(env_root, remembered, cwd, exe_dir)
    }

    /// Persist an explicit operator choice; it takes effect on the next
    /// resolution after the environment override.
    pub fn remember(&self, root: &Path) -> Result<(), opsdash_storage::StorageError> {
        opsdash_storage::remember_root(root)
    }

    pub fn forget(&self) -> Result<(), opsdash_storage::StorageError> {
        opsdash_storage::forget_root()
    }
}

/// Pure resolution core, separated from the ambient inputs so precedence is
/// testable without touching process environment.
pub fn resolve_from(
    env_root: Option<PathBuf>,
    remembered: Option<PathBuf>,
    cwd: Option<PathBuf>,
    exe_dir: Option<PathBuf>,
) -> Option<PathBuf> {
    if let Some(root) = env_root {
        debug!("workspace root from env override: {}", root.display());
        return Some(root);
    }
    if let Some(root) = remembered.filter(|p| p.is_dir()) {
        debug!("workspace root from remembered choice: {}", root.display());
        return Some(root);
    }
    if let Some(root) = cwd.and_then(|start| ascend_to_root(&start)) {
        return Some(root);
    }
    if let Some(root) = exe_dir.and_then(|start| ascend_to_root(&start)) {
        return Some(root);
    }
    None
}

/// Both marker paths must exist for a directory to qualify as a root.
pub fn has_markers(dir: &Path) -> bool {
    dir.join(MARKER_DIR).is_dir() && dir.join(MARKER_SCRIPTS_DIR).is_dir()
}

/// Walk upward from `start` until a marker-bearing ancestor is found. The
/// walk is capped and stops once `parent == current` (filesystem root).
pub fn ascend_to_root(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    for _ in 0..MAX_ASCENT {
        if has_markers(&current) {
            return Some(current);
        }
        match current.parent() {
            Some(parent) if parent != current => current = parent.to_path_buf(),
            _ => return None,
        }
    }
    None
}
