//! Durable state for the control panel: one transcript file per workspace
//! (keyed by the workspace slug) plus the operator's remembered workspace
//! path. Writes are atomic replaces; readers always see a whole file.

use opsdash_core::{workspace_slug, TranscriptEntry, TranscriptLog};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Environment override for the app-local state directory. Primarily for
/// headless and test use.
pub const STATE_DIR_ENV: &str = "OPSDASH_STATE_DIR";

const TRANSCRIPTS_DIR: &str = "transcripts";
const WORKSPACE_PATH_FILE: &str = "workspace-path";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// App-local state directory. `OPSDASH_STATE_DIR` wins; otherwise the
/// platform data dir, falling back to the system temp dir so headless
/// environments still function.
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(STATE_DIR_ENV) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("opsdash")
}

pub fn transcript_path(root: &Path) -> PathBuf {
    transcript_path_in(&state_dir(), root)
}

pub fn transcript_path_in(state_dir: &Path, root: &Path) -> PathBuf {
    state_dir
        .join(TRANSCRIPTS_DIR)
        .join(format!("{}.json", workspace_slug(root)))
}

/// Load the persisted transcript for a workspace. A missing, empty, or
/// undecodable file yields the fixed default transcript, never an error.
pub fn load_transcript(root: &Path) -> TranscriptLog {
    load_transcript_from(&state_dir(), root)
}

pub fn load_transcript_from(state_dir: &Path, root: &Path) -> TranscriptLog {
    let path = transcript_path_in(state_dir, root);
    let raw = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) => {
            if err.kind() != io::ErrorKind::NotFound {
                warn!("transcript_read_failed: {}: {err}", path.display());
            }
            return TranscriptLog::default_transcript();
        }
    };
    match serde_json::from_slice::<Vec<TranscriptEntry>>(&raw) {
        Ok(entries) if !entries.is_empty() => TranscriptLog::new(entries),
        Ok(_) => TranscriptLog::default_transcript(),
        Err(err) => {
            warn!("transcript_decode_failed: {}: {err}", path.display());
            TranscriptLog::default_transcript()
        }
    }
}

/// Serialize and atomically replace the workspace transcript file.
pub fn persist_transcript(root: &Path, entries: &[TranscriptEntry]) -> Result<(), StorageError> {
    persist_transcript_to(&state_dir(), root, entries)
}

pub fn persist_transcript_to(
    state_dir: &Path,
    root: &Path,
    entries: &[TranscriptEntry],
) -> Result<(), StorageError> {
    let path = transcript_path_in(state_dir, root);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let payload = serde_json::to_vec_pretty(entries)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, payload)?;
    fs::rename(&tmp, &path)?;
    Ok(())
}

/// Fire-and-forget persistence: snapshot the entries, hand the write to a
/// blocking task, and log failures instead of surfacing them. Must be called
/// from within a tokio runtime.
pub fn spawn_persist(root: &Path, entries: Vec<TranscriptEntry>) {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || {
        if let Err(err) = persist_transcript(&root, &entries) {
            warn!("transcript_persist_failed: {}: {err}", root.display());
        }
    });
}

/// The workspace root the operator last chose explicitly, if it still exists.
pub fn load_remembered_root() -> Option<PathBuf> {
    load_remembered_root_from(&state_dir())
}

pub fn load_remembered_root_from(state_dir: &Path) -> Option<PathBuf> {
    let raw = fs::read_to_string(state_dir.join(WORKSPACE_PATH_FILE)).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let path = PathBuf::from(trimmed);
    path.is_dir().then_some(path)
}

pub fn remember_root(root: &Path) -> Result<(), StorageError> {
    remember_root_in(&state_dir(), root)
}

pub fn remember_root_in(state_dir: &Path, root: &Path) -> Result<(), StorageError> {
    fs::create_dir_all(state_dir)?;
    fs::write(
        state_dir.join(WORKSPACE_PATH_FILE),
        format!("{}\n", root.display()),
    )?;
    Ok(())
}

pub fn forget_root() -> Result<(), StorageError> {
    let path = state_dir().join(WORKSPACE_PATH_FILE);
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsdash_core::{StatusIndicator, TranscriptRole, TranscriptStream};
    use tempfile::TempDir;

    fn sample_entries() -> Vec<TranscriptEntry> {
        let mut log = TranscriptLog::default();
        log.append(TranscriptEntry::new(TranscriptRole::User, "run health-sweep"));
        log.append_stream(
            "checking pins\n",
            "health-sweep",
            TranscriptStream::Stdout,
            StatusIndicator::Informational,
        );
        log.snapshot()
    }

    #[test]
    fn load_without_a_file_yields_the_default_transcript() {
        let state = TempDir::new().expect("tempdir");
        let log = load_transcript_from(state.path(), Path::new("/srv/acme"));
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].role, TranscriptRole::System);
    }

    #[test]
    fn persist_then_load_round_trips() {
        let state = TempDir::new().expect("tempdir");
        let root = Path::new("/srv/acme");
        let entries = sample_entries();
        persist_transcript_to(state.path(), root, &entries).expect("persist");
        let log = load_transcript_from(state.path(), root);
        assert_eq!(log.len(), entries.len());
        assert_eq!(log.entries()[1].text, "checking pins\n");
        // No temp file left behind after the atomic rename.
        let tmp = transcript_path_in(state.path(), root).with_extension("json.tmp");
        assert!(!tmp.exists());
    }

    #[test]
    fn corrupt_file_falls_back_to_default() {
        let state = TempDir::new().expect("tempdir");
        let root = Path::new("/srv/acme");
        let path = transcript_path_in(state.path(), root);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, b"{not json").expect("write");
        let log = load_transcript_from(state.path(), root);
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].role, TranscriptRole::System);
    }

    #[test]
    fn empty_entry_list_falls_back_to_default() {
        let state = TempDir::new().expect("tempdir");
        let root = Path::new("/srv/acme");
        persist_transcript_to(state.path(), root, &[]).expect("persist");
        let log = load_transcript_from(state.path(), root);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn transcripts_are_keyed_by_slug() {
        let state = TempDir::new().expect("tempdir");
        assert!(transcript_path_in(state.path(), Path::new("/srv/My Workspace"))
            .ends_with("transcripts/my-workspace.json"));
        assert!(transcript_path_in(state.path(), Path::new("/"))
            .ends_with("transcripts/default.json"));
    }

    #[test]
    fn remembered_root_requires_an_existing_directory() {
        let state = TempDir::new().expect("tempdir");
        let workspace = TempDir::new().expect("workspace");
        remember_root_in(state.path(), workspace.path()).expect("remember");
        assert_eq!(
            load_remembered_root_from(state.path()),
            Some(workspace.path().to_path_buf())
        );
        remember_root_in(state.path(), Path::new("/nonexistent/opsdash-root"))
            .expect("remember");
        assert_eq!(load_remembered_root_from(state.path()), None);
    }
}
