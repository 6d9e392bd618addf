//! Core data types used throughout the BlackMirror library
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **History**: `SnapshotKind`, `SnapshotEvent`, `LogRecord` - what the log store holds
//! - **Notifications**: `FsChange`, `RawEvent` - what the capture pipeline consumes
//! - **Operations**: `RollbackResult`, `PruneResult`, `IngestResult` - operation summaries
//!
//! ## Examples
//!
//! ```rust
//! use blackmirror::types::{SnapshotEvent, SnapshotKind};
//!
//! let event = SnapshotEvent::new(10.0, SnapshotKind::Created, Some(b"hello".to_vec()));
//! assert!(event.kind.carries_content());
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Kind of a recorded change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
    /// First recorded content of a path
    Created,
    /// New content for a path that already had some
    Modified,
    /// The path stopped existing
    Deleted,
}

impl SnapshotKind {
    /// Whether events of this kind are expected to carry content
    pub fn carries_content(self) -> bool {
        !matches!(self, SnapshotKind::Deleted)
    }

    /// Tag used in log files and CLI output
    pub fn as_str(self) -> &'static str {
        match self {
            SnapshotKind::Created => "created",
            SnapshotKind::Modified => "modified",
            SnapshotKind::Deleted => "deleted",
        }
    }
}

impl fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable entry of a path's history
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEvent {
    /// Seconds since the Unix epoch, sub-second precision
    pub timestamp: f64,
    /// What happened
    pub kind: SnapshotKind,
    /// Full file content for created/modified events
    pub content: Option<Vec<u8>>,
}

impl SnapshotEvent {
    /// Create an event
    pub fn new(timestamp: f64, kind: SnapshotKind, content: Option<Vec<u8>>) -> Self {
        Self { timestamp, kind, content }
    }

    /// Timestamp as a UTC date, if representable
    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        let secs = self.timestamp.floor();
        let nanos = ((self.timestamp - secs) * 1e9) as u32;
        DateTime::from_timestamp(secs as i64, nanos)
    }
}

/// On-disk shape of one log line
///
/// ```text
/// {"timestamp": 1718000000.25, "event": "modified", "content_b64": "aGVsbG8="}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Seconds since the Unix epoch
    pub timestamp: f64,
    /// Event tag
    pub event: SnapshotKind,
    /// Base64 (standard, padded) encoded content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_b64: Option<String>,
}

impl LogRecord {
    /// Build the record for an event
    pub fn from_event(event: &SnapshotEvent) -> Self {
        Self {
            timestamp: event.timestamp,
            event: event.kind,
            content_b64: event.content.as_deref().map(|c| STANDARD.encode(c)),
        }
    }

    /// Decode the record back into an event
    pub fn into_event(self) -> std::result::Result<SnapshotEvent, base64::DecodeError> {
        let content = match self.content_b64 {
            Some(b64) => Some(STANDARD.decode(b64.as_bytes())?),
            None => None,
        };
        Ok(SnapshotEvent {
            timestamp: self.timestamp,
            kind: self.event,
            content,
        })
    }
}

/// Semantic change reported by a notification backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsChange {
    /// A path appeared
    Created(PathBuf),
    /// A path's content changed
    Modified(PathBuf),
    /// A path went away
    Deleted(PathBuf),
    /// A path was moved
    Renamed {
        /// Old location
        from: PathBuf,
        /// New location
        to: PathBuf,
    },
}

/// A notification as delivered to the capture pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// What happened
    pub change: FsChange,
    /// Whether the notification concerns a directory
    pub is_directory: bool,
}

impl RawEvent {
    /// Notification about a file
    pub fn file(change: FsChange) -> Self {
        Self { change, is_directory: false }
    }

    /// Notification about a directory
    pub fn directory(change: FsChange) -> Self {
        Self { change, is_directory: true }
    }
}

/// Summary of a rollback
#[derive(Debug, Clone, Default)]
pub struct RollbackResult {
    /// Cutoff instant the roots were restored to
    pub cutoff: f64,
    /// Roots that were in scope
    pub roots: Vec<PathBuf>,
    /// Files written with historical content
    pub files_restored: usize,
    /// Files removed because they did not exist at the cutoff
    pub files_deleted: usize,
    /// Paths left alone because of the keep list
    pub paths_kept: usize,
    /// Paths left alone because the history had no content to restore
    pub paths_skipped: usize,
    /// Total bytes written
    pub bytes_written: u64,
    /// Per-path failures, in the order they happened
    pub errors: Vec<(PathBuf, String)>,
    /// Time taken in milliseconds
    pub duration_ms: u64,
}

impl RollbackResult {
    /// Whether every path was handled without error
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Summary of a retention pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneResult {
    /// Logs rewritten with fewer events
    pub logs_rewritten: usize,
    /// Logs removed entirely
    pub logs_deleted: usize,
    /// Events dropped from rewritten or deleted logs
    pub events_removed: usize,
    /// Store size before pruning
    pub bytes_before: u64,
    /// Store size after pruning
    pub bytes_after: u64,
}

impl PruneResult {
    /// Fold another pass into this one
    pub fn merge(&mut self, other: &PruneResult) {
        self.logs_rewritten += other.logs_rewritten;
        self.logs_deleted += other.logs_deleted;
        self.events_removed += other.events_removed;
        self.bytes_before += other.bytes_before;
        self.bytes_after += other.bytes_after;
    }
}

/// Summary of an initial ingestion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestResult {
    /// Files that got a `created` entry
    pub files_recorded: usize,
    /// Files skipped because they already had history
    pub files_skipped: usize,
    /// Files skipped because they exceed the size ceiling
    pub files_too_large: usize,
    /// Files that could not be read or recorded
    pub errors: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_json_shape() {
        let event = SnapshotEvent::new(1.5, SnapshotKind::Modified, Some(b"hello world".to_vec()));
        let json = serde_json::to_string(&LogRecord::from_event(&event)).unwrap();
        assert!(json.contains("\"event\":\"modified\""));
        assert!(json.contains("\"content_b64\":\"aGVsbG8gd29ybGQ=\""));

        let deleted = SnapshotEvent::new(2.0, SnapshotKind::Deleted, None);
        let json = serde_json::to_string(&LogRecord::from_event(&deleted)).unwrap();
        assert!(!json.contains("content_b64"));
    }

    #[test]
    fn test_record_decodes_original_format() {
        let line = r#"{"timestamp": 1700000000.123, "event": "created", "content_b64": "YQ=="}"#;
        let record: LogRecord = serde_json::from_str(line).unwrap();
        let event = record.into_event().unwrap();
        assert_eq!(event.kind, SnapshotKind::Created);
        assert_eq!(event.content.as_deref(), Some(&b"a"[..]));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let line = r#"{"timestamp": 1.0, "event": "moved"}"#;
        assert!(serde_json::from_str::<LogRecord>(line).is_err());
    }

    #[test]
    fn test_recorded_at() {
        let event = SnapshotEvent::new(86_400.5, SnapshotKind::Deleted, None);
        let at = event.recorded_at().unwrap();
        assert_eq!(at.timestamp(), 86_400);
        assert_eq!(at.timestamp_subsec_millis(), 500);
    }
}
