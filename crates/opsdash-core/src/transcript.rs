//! In-memory transcript model: an append-only, coalescing sequence of
//! entries. Persistence lives in `opsdash-storage`; this module only owns
//! ordering and the coalescing rule.

use crate::StatusIndicator;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    System,
    User,
    Assistant,
    Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptStream {
    Transcript,
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: Uuid,
    pub role: TranscriptRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusIndicator>,
    #[serde(default, rename = "capabilityId", skip_serializing_if = "Option::is_none")]
    pub capability_id: Option<String>,
    #[serde(default = "default_stream")]
    pub stream: TranscriptStream,
}

fn default_stream() -> TranscriptStream {
    TranscriptStream::Transcript
}

impl TranscriptEntry {
    pub fn new(role: TranscriptRole, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text: text.into(),
            timestamp: Utc::now(),
            status: None,
            capability_id: None,
            stream: TranscriptStream::Transcript,
        }
    }

    pub fn event(
        text: impl Into<String>,
        capability_id: impl Into<String>,
        status: StatusIndicator,
    ) -> Self {
        Self {
            status: Some(status),
            capability_id: Some(capability_id.into()),
            ..Self::new(TranscriptRole::Event, text)
        }
    }
}

/// Ordered transcript with stream coalescing. Only the most recent entry is
/// ever "open": a chunk for the same `(capability, stream)` pair grows it,
/// anything else closes it by appending behind it.
#[derive(Debug, Clone, Default)]
pub struct TranscriptLog {
    entries: Vec<TranscriptEntry>,
}

impl TranscriptLog {
    pub fn new(entries: Vec<TranscriptEntry>) -> Self {
        Self { entries }
    }

    /// The fixed transcript shown before anything has been persisted.
    pub fn default_transcript() -> Self {
        let mut entry = TranscriptEntry::new(
            TranscriptRole::System,
            "Workspace transcript started. Launch a capability to see its output here.",
        );
        entry.status = Some(StatusIndicator::Informational);
        Self {
            entries: vec![entry],
        }
    }

    pub fn append(&mut self, entry: TranscriptEntry) {
        self.entries.push(entry);
    }

    /// Append streamed process output, coalescing consecutive chunks of the
    /// same `(capability, stream)` pair into one growing entry. Whitespace-only
    /// chunks are dropped.
    pub fn append_stream(
        &mut self,
        text: &str,
        capability_id: &str,
        stream: TranscriptStream,
        status: StatusIndicator,
    ) {
        if text.trim().is_empty() {
            return;
        }
        if let Some(last) = self.entries.last_mut() {
            if last.stream == stream && last.capability_id.as_deref() == Some(capability_id) {
                last.text.push_str(text);
                last.timestamp = Utc::now();
                return;
            }
        }
        let mut entry = TranscriptEntry::new(TranscriptRole::Assistant, text);
        entry.status = Some(status);
        entry.capability_id = Some(capability_id.to_string());
        entry.stream = stream;
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn snapshot(&self) -> Vec<TranscriptEntry> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consecutive_chunks_coalesce_into_one_entry() {
        let mut log = TranscriptLog::default();
        log.append_stream("a", "cap", TranscriptStream::Stdout, StatusIndicator::Ok);
        log.append_stream("b", "cap", TranscriptStream::Stdout, StatusIndicator::Ok);
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].text, "ab");
    }

    #[test]
    fn switching_stream_closes_the_open_entry() {
        let mut log = TranscriptLog::default();
        log.append_stream("out", "cap", TranscriptStream::Stdout, StatusIndicator::Informational);
        log.append_stream("err", "cap", TranscriptStream::Stderr, StatusIndicator::Warning);
        log.append_stream("out2", "cap", TranscriptStream::Stdout, StatusIndicator::Informational);
        assert_eq!(log.len(), 3);
        assert_eq!(log.entries()[0].text, "out");
        assert_eq!(log.entries()[1].text, "err");
        assert_eq!(log.entries()[2].text, "out2");
    }

    #[test]
    fn different_capability_never_coalesces() {
        let mut log = TranscriptLog::default();
        log.append_stream("a", "cap-a", TranscriptStream::Stdout, StatusIndicator::Ok);
        log.append_stream("b", "cap-b", TranscriptStream::Stdout, StatusIndicator::Ok);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn whitespace_chunks_are_dropped() {
        let mut log = TranscriptLog::default();
        log.append_stream("  \n\t", "cap", TranscriptStream::Stdout, StatusIndicator::Ok);
        assert!(log.is_empty());
    }

    #[test]
    fn an_event_between_chunks_splits_them() {
        let mut log = TranscriptLog::default();
        log.append_stream("a", "cap", TranscriptStream::Stdout, StatusIndicator::Ok);
        log.append(TranscriptEntry::event(
            "cancellation requested",
            "cap",
            StatusIndicator::Warning,
        ));
        log.append_stream("b", "cap", TranscriptStream::Stdout, StatusIndicator::Ok);
        assert_eq!(log.len(), 3);
        assert_eq!(log.entries()[2].text, "b");
    }

    #[test]
    fn default_transcript_has_a_single_system_entry() {
        let log = TranscriptLog::default_transcript();
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].role, TranscriptRole::System);
    }

    #[test]
    fn entries_round_trip_through_json() {
        let mut log = TranscriptLog::default();
        log.append_stream("boom", "cap", TranscriptStream::Stderr, StatusIndicator::Warning);
        let json = serde_json::to_string(log.entries()).expect("encode");
        let decoded: Vec<TranscriptEntry> = serde_json::from_str(&json).expect("decode");
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].stream, TranscriptStream::Stderr);
        assert_eq!(decoded[0].status, Some(StatusIndicator::Warning));
        assert_eq!(decoded[0].capability_id.as_deref(), Some("cap"));
    }
}
