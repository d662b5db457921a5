//! Single-flight capability execution. One external process at a time,
//! stdout/stderr forwarded chunk-by-chunk into the shared transcript, a
//! final event recording how the run ended. Cancellation is cooperative:
//! the process is asked to terminate and the run stays active until it
//! actually exits.

use crate::artifacts;
use crate::error::EngineError;
use crate::state::PanelState;
use opsdash_core::{CapabilityDescriptor, StatusIndicator, TranscriptEntry, TranscriptStream};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Environment passed to every capability process.
pub const WORKSPACE_ROOT_VAR: &str = "WORKSPACE_ROOT";
pub const CAPABILITY_ID_VAR: &str = "CAPABILITY_ID";
/// Serialized `{input?, check?}` payload, set only when the request carries
/// either field.
pub const CAPABILITY_INPUTS_VAR: &str = "CAPABILITY_INPUTS";

const STREAM_CHUNK_BYTES: usize = 4096;
const STREAM_CHANNEL_CAPACITY: usize = 256;

/// Operator-supplied launch parameters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check: Option<bool>,
}

impl RunRequest {
    pub fn is_empty(&self) -> bool {
        self.input.is_none() && self.check.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub exit_code: Option<i32>,
}

#[derive(Clone)]
pub struct CapabilityRunner {
    state: Arc<PanelState>,
    root: PathBuf,
}

impl CapabilityRunner {
    pub fn new(state: Arc<PanelState>, root: PathBuf) -> Self {
        Self { state, root }
    }

    /// Launch a capability and stream it to completion. Rejections and
    /// launch failures are reported through the transcript; only the
    /// rejection itself is returned as an error.
    pub async fn launch(&self, id: &str, request: RunRequest) -> Result<RunOutcome, EngineError> {
        let descriptor = self.descriptor(id).await?;

        if let Err(err) = self.state.try_claim_run(id).await {
            if let EngineError::AlreadyRunning { running } = &err {
                self.state
                    .append_entry(TranscriptEntry::event(
                        format!(
                            "Capability '{running}' is already running; request for '{id}' ignored."
                        ),
                        id,
                        StatusIndicator::Warning,
                    ))
                    .await;
                self.state.persist_transcript(&self.root).await;
            }
            return Err(err);
        }

        self.state
            .append_entry(TranscriptEntry::event(
                format!("Launching '{id}'."),
                id,
                StatusIndicator::Informational,
            ))
            .await;

        let mut child = match self.spawn(&descriptor, &request) {
            Ok(child) => child,
            Err(source) => {
                // Launching -> Failed directly; Running is never entered.
                self.state
                    .append_entry(TranscriptEntry::event(
                        format!("Failed to launch '{id}': {source}"),
                        id,
                        StatusIndicator::Failed,
                    ))
                    .await;
                self.state.release_run().await;
                self.state.persist_transcript(&self.root).await;
                return Err(EngineError::Spawn {
                    entrypoint: descriptor.entrypoint.clone(),
                    source,
                });
            }
        };
        self.state.set_run_pid(child.id()).await;
        info!("capability '{id}' running (pid {:?})", child.id());

        let (chunk_tx, mut chunk_rx) =
            mpsc::channel::<(TranscriptStream, String)>(STREAM_CHANNEL_CAPACITY);

        let stdout_task = child.stdout.take().map(|stdout| {
            let tx = chunk_tx.clone();
            tokio::spawn(forward_chunks(stdout, TranscriptStream::Stdout, tx))
        });
        let stderr_task = child.stderr.take().map(|stderr| {
            let tx = chunk_tx.clone();
            tokio::spawn(forward_chunks(stderr, TranscriptStream::Stderr, tx))
        });
        drop(chunk_tx);

        let consumer_state = self.state.clone();
        let consumer_id = id.to_string();
        let consumer = tokio::spawn(async move {
            while let Some((stream, text)) = chunk_rx.recv().await {
                let status = match stream {
                    TranscriptStream::Stderr => StatusIndicator::Warning,
                    _ => StatusIndicator::Informational,
                };
                consumer_state
                    .append_stream(&text, &consumer_id, stream, status)
                    .await;
            }
        });

        let exit = child.wait().await;

        // Drain before the final event so buffered output lands first.
        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        if let Some(task) = stderr_task {
            let _ = task.await;
        }
        let _ = consumer.await;

        let cancel_requested = self.state.cancel_requested().await;
        let exit_code = exit.as_ref().ok().and_then(|status| status.code());
        let (status, indicator, text) = match (&exit, cancel_requested) {
            (_, true) => (
                RunStatus::Cancelled,
                StatusIndicator::Warning,
                format!(
                    "Capability '{id}' cancelled{}.",
                    exit_code.map_or_else(String::new, |c| format!(" (exit code {c})"))
                ),
            ),
            (Ok(es), false) if es.success() => (
                RunStatus::Completed,
                StatusIndicator::Ok,
                format!("Capability '{id}' completed with exit code 0."),
            ),
            (Ok(_), false) => (
                RunStatus::Failed,
                StatusIndicator::Failed,
                format!(
                    "Capability '{id}' failed with exit code {}.",
                    exit_code.map_or_else(|| "unknown (signal)".to_string(), |c| c.to_string())
                ),
            ),
            (Err(err), false) => (
                RunStatus::Failed,
                StatusIndicator::Failed,
                format!("Capability '{id}' wait failed: {err}"),
            ),
        };

        self.state
            .append_entry(TranscriptEntry::event(text, id, indicator))
            .await;
        self.state.release_run().await;
        self.state.persist_transcript(&self.root).await;

        Ok(RunOutcome { status, exit_code })
    }

    /// Ask the active run to terminate. The "cancellation requested" event
    /// is appended immediately; the run only reaches its terminal state
    /// when the process actually exits.
    pub async fn cancel(&self) {
        let Some(run) = self.state.request_cancel().await else {
            return;
        };
        self.state
            .append_entry(TranscriptEntry::event(
                format!("Cancellation requested for '{}'.", run.capability_id),
                run.capability_id.clone(),
                StatusIndicator::Warning,
            ))
            .await;
        self.state.persist_transcript(&self.root).await;
        if let Some(pid) = run.pid {
            request_termination(pid);
        }
    }

    async fn descriptor(&self, id: &str) -> Result<CapabilityDescriptor, EngineError> {
        if let Some(descriptor) = self.state.capability(id).await {
            return Ok(descriptor);
        }
        // No published snapshot yet (launch before first refresh); read the
        // manifest directly.
        if let Some(snapshot) = artifacts::fetch_capabilities(&self.root).await.into_option() {
            if let Some(descriptor) = snapshot.manifest.find(id) {
                return Ok(descriptor.clone());
            }
        }
        Err(EngineError::UnknownCapability(id.to_string()))
    }

    fn spawn(
        &self,
        descriptor: &CapabilityDescriptor,
        request: &RunRequest,
    ) -> std::io::Result<tokio::process::Child> {
        let entrypoint = resolve_entrypoint(&self.root, &descriptor.entrypoint);
        let mut command = Command::new(&entrypoint);
        command
            .current_dir(&self.root)
            .env(WORKSPACE_ROOT_VAR, &self.root)
            .env(CAPABILITY_ID_VAR, &descriptor.id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !request.is_empty() {
            let payload = serde_json::to_string(request).unwrap_or_else(|_| "{}".to_string());
            command.env(CAPABILITY_INPUTS_VAR, payload);
        }
        command.spawn()
    }
}

fn resolve_entrypoint(root: &Path, entrypoint: &str) -> PathBuf {
    let path = Path::new(entrypoint);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Forward one process stream chunk-by-chunk as data arrives. An incomplete
/// multibyte character at the end of a read is held back and decoded with
/// the next chunk instead of turning into a replacement character.
async fn forward_chunks<R>(
    mut reader: R,
    stream: TranscriptStream,
    tx: mpsc::Sender<(TranscriptStream, String)>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = [0u8; STREAM_CHUNK_BYTES];
    let mut pending: Vec<u8> = Vec::new();
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&buf[..n]);
                let text = drain_complete_utf8(&mut pending);
                if text.is_empty() {
                    continue;
                }
                if tx.send((stream, text)).await.is_err() {
                    return;
                }
            }
            Err(err) => {
                warn!("stream_read_failed ({:?}): {err}", stream);
                break;
            }
        }
    }
    // EOF with a dangling partial character: the process emitted truncated
    // output, so lossy decoding is the honest rendering.
    if !pending.is_empty() {
        let _ = tx
            .send((stream, String::from_utf8_lossy(&pending).into_owned()))
            .await;
    }
}

/// Decode the complete UTF-8 prefix of `pending`, leaving an incomplete
/// trailing character in place for the next chunk. Genuinely invalid bytes
/// decode lossily rather than stalling the buffer.
fn drain_complete_utf8(pending: &mut Vec<u8>) -> String {
    match std::str::from_utf8(pending) {
        Ok(text) => {
            let text = text.to_string();
            pending.clear();
            text
        }
        Err(err) if err.error_len().is_none() => {
            let tail = pending.split_off(err.valid_up_to());
            let prefix = std::mem::replace(pending, tail);
            String::from_utf8_lossy(&prefix).into_owned()
        }
        Err(_) => {
            let text = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            text
        }
    }
}

/// Cooperative termination: SIGTERM on unix so the capability can clean up.
#[cfg(unix)]
fn request_termination(pid: u32) {
    // Safety: plain kill(2) with a known signal; failure (e.g. the process
    // already exited) is ignored.
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn request_termination(pid: u32) {
    warn!("cooperative termination not supported on this platform (pid {pid})");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_request_payload_skips_absent_fields() {
        let payload = serde_json::to_string(&RunRequest {
            input: None,
            check: Some(true),
        })
        .expect("encode");
        assert_eq!(payload, r#"{"check":true}"#);
        assert!(RunRequest::default().is_empty());
    }

    #[test]
    fn multibyte_output_survives_chunk_splits() {
        // Worst case: one byte per read.
        let mut pending = Vec::new();
        let mut out = String::new();
        for byte in "héllo ✓ wörld".as_bytes() {
            pending.push(*byte);
            out.push_str(&drain_complete_utf8(&mut pending));
        }
        assert!(pending.is_empty());
        assert_eq!(out, "héllo ✓ wörld");
        assert!(!out.contains('\u{FFFD}'));
    }

    #[test]
    fn invalid_bytes_decode_lossily_without_stalling() {
        let mut pending = vec![b'a', 0xff, b'b'];
        let out = drain_complete_utf8(&mut pending);
        assert!(pending.is_empty());
        assert!(out.starts_with('a'));
        assert!(out.ends_with('b'));
    }

    #[test]
    fn relative_entrypoints_resolve_under_the_root() {
        let resolved = resolve_entrypoint(Path::new("/srv/acme"), "scripts/run.sh");
        assert_eq!(resolved, PathBuf::from("/srv/acme/scripts/run.sh"));
        let absolute = resolve_entrypoint(Path::new("/srv/acme"), "/usr/bin/true");
        assert_eq!(absolute, PathBuf::from("/usr/bin/true"));
    }
}
