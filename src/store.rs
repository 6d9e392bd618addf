//! Append-only snapshot log store
//!
//! Every relative path of a tracked root has its own log: a JSON-lines file
//! named after the percent-escaped relative path. Each line is one
//! [`LogRecord`]; lines are only ever appended, never edited in place.
//!
//! ```text
//! <data dir>/mirrors/
//! └── %2Fhome%2Fme%2Fproject/        # one namespace per tracked root
//!     ├── README.md.jsonl
//!     └── src%2Fmain.rs.jsonl
//! ```
//!
//! Readers never assume a log is sorted by timestamp. Append order is the
//! canonical order, and a malformed line only costs that line: the rest of the
//! history stays readable.
//!
//! A store assumes a single writer per path per process. Several processes
//! appending to the same namespace at once may interleave lines; that is a
//! known limitation.

use crate::error::{BlackMirrorError, Result};
use crate::types::{LogRecord, SnapshotEvent, SnapshotKind};
use crate::utils::{self, decode_rel_path, encode_rel_path};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Lines, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, trace, warn};

/// Suffix of every log file
pub const LOG_SUFFIX: &str = ".jsonl";

/// Anything the capture pipeline and ingestion can append history to
///
/// [`SnapshotStore`] is the production implementation; tests substitute
/// recorders.
pub trait SnapshotSink: Send + Sync {
    /// Append one event for `rel_path`, stamped with the current time
    fn record(&self, rel_path: &str, kind: SnapshotKind, content: Option<&[u8]>) -> Result<()>;

    /// Whether `rel_path` already has recorded history
    fn has_history(&self, rel_path: &str) -> bool;
}

/// One log file as seen by retention and status
#[derive(Debug, Clone)]
pub struct LogFile {
    /// Relative path the log belongs to
    pub rel_path: String,
    /// Location of the log on disk
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// Last modification time
    pub modified: SystemTime,
}

/// Snapshot log store for one tracked root
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    /// Open (creating if needed) the store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let root = dir.into();
        fs::create_dir_all(&root)?;
        debug!("Opened snapshot store at {:?}", root);
        Ok(Self { root })
    }

    /// Open the namespace for `tracked_root` inside the shared `mirrors_dir`
    pub fn for_root(mirrors_dir: &Path, tracked_root: &Path) -> Result<Self> {
        let name = encode_rel_path(&tracked_root.to_string_lossy());
        Self::open(mirrors_dir.join(name))
    }

    /// Directory holding the logs
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the log for `rel_path`
    pub fn log_path(&self, rel_path: &str) -> PathBuf {
        self.root.join(format!("{}{}", encode_rel_path(rel_path), LOG_SUFFIX))
    }

    /// Whether `rel_path` has a non-empty log
    pub fn has_log(&self, rel_path: &str) -> bool {
        fs::metadata(self.log_path(rel_path))
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    /// Append an event stamped with the current time
    pub fn record(&self, rel_path: &str, kind: SnapshotKind, content: Option<&[u8]>) -> Result<()> {
        self.record_at(rel_path, utils::now_timestamp(), kind, content)
    }

    /// Append an event with an explicit timestamp
    pub fn record_at(
        &self,
        rel_path: &str,
        timestamp: f64,
        kind: SnapshotKind,
        content: Option<&[u8]>,
    ) -> Result<()> {
        let event = SnapshotEvent::new(timestamp, kind, content.map(<[u8]>::to_vec));
        self.append(rel_path, &event)
    }

    /// Append a prepared event
    pub fn append(&self, rel_path: &str, event: &SnapshotEvent) -> Result<()> {
        // The directory may have been removed by retention or by hand.
        fs::create_dir_all(&self.root)?;

        let mut line = serde_json::to_vec(&LogRecord::from_event(event))?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(rel_path))?;
        file.write_all(&line)?;
        file.flush()?;

        trace!("Recorded {} for {}", event.kind, rel_path);
        Ok(())
    }

    /// Read a path's history in append order
    ///
    /// The returned iterator is lazy and finite. Calling `read_all` again
    /// starts over from the first line. A path without a log yields nothing.
    pub fn read_all(&self, rel_path: &str) -> Result<LogReader> {
        LogReader::open(&self.log_path(rel_path))
    }

    /// Last event in append order
    pub fn last_event(&self, rel_path: &str) -> Result<Option<SnapshotEvent>> {
        Ok(self.read_all(rel_path)?.last())
    }

    /// Last event in append order whose timestamp is at or before `cutoff`
    ///
    /// This is a full scan on purpose: a later line may carry an earlier
    /// timestamp after a clock adjustment, and the last qualifying line in
    /// file order is the one that counts.
    pub fn event_at(&self, rel_path: &str, cutoff: f64) -> Result<Option<SnapshotEvent>> {
        Ok(self
            .read_all(rel_path)?
            .filter(|event| event.timestamp <= cutoff)
            .last())
    }

    /// Every relative path with a non-empty log, sorted
    pub fn enumerate(&self) -> Result<Vec<String>> {
        Ok(self.log_files()?.into_iter().map(|log| log.rel_path).collect())
    }

    /// Every non-empty log file with its size and modification time, sorted by path
    pub fn log_files(&self) -> Result<Vec<LogFile>> {
        let mut logs = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(logs),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(stem) = name.strip_suffix(LOG_SUFFIX) else {
                continue;
            };
            let Some(rel_path) = decode_rel_path(stem) else {
                warn!("Skipping log with undecodable name: {}", name);
                continue;
            };

            let metadata = entry.metadata()?;
            if !metadata.is_file() || metadata.len() == 0 {
                continue;
            }

            logs.push(LogFile {
                rel_path,
                path: entry.path(),
                size: metadata.len(),
                modified: metadata.modified()?,
            });
        }

        logs.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        Ok(logs)
    }

    /// Combined size of every log in bytes
    pub fn total_size(&self) -> Result<u64> {
        Ok(self.log_files()?.iter().map(|log| log.size).sum())
    }
}

impl SnapshotSink for SnapshotStore {
    fn record(&self, rel_path: &str, kind: SnapshotKind, content: Option<&[u8]>) -> Result<()> {
        SnapshotStore::record(self, rel_path, kind, content)
    }

    fn has_history(&self, rel_path: &str) -> bool {
        self.has_log(rel_path)
    }
}

/// Lazy reader over one log file
///
/// Yields decoded events; lines that fail to decode are logged and skipped.
pub struct LogReader {
    lines: Option<Lines<BufReader<File>>>,
    path: PathBuf,
    line_no: usize,
}

impl LogReader {
    /// Open a log file; a missing file reads as empty
    pub fn open(path: &Path) -> Result<Self> {
        let lines = match File::open(path) {
            Ok(file) => Some(BufReader::new(file).lines()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            lines,
            path: path.to_path_buf(),
            line_no: 0,
        })
    }

    /// Decode a single log line
    pub fn parse_line(line: &str, line_no: usize) -> Result<SnapshotEvent> {
        let record: LogRecord = serde_json::from_str(line).map_err(|e| BlackMirrorError::MalformedRecord {
            line: line_no,
            reason: e.to_string(),
        })?;
        record.into_event().map_err(|e| BlackMirrorError::MalformedRecord {
            line: line_no,
            reason: format!("invalid base64 payload: {}", e),
        })
    }
}

impl Iterator for LogReader {
    type Item = SnapshotEvent;

    fn next(&mut self) -> Option<Self::Item> {
        let lines = self.lines.as_mut()?;
        loop {
            let line = match lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    // Non UTF-8 bytes or a read failure; skip what we can.
                    self.line_no += 1;
                    warn!("Unreadable line {} in {:?}: {}", self.line_no, self.path, e);
                    if e.kind() == std::io::ErrorKind::InvalidData {
                        continue;
                    }
                    return None;
                }
            };
            self.line_no += 1;

            if line.trim().is_empty() {
                continue;
            }

            match Self::parse_line(&line, self.line_no) {
                Ok(event) => return Some(event),
                Err(e) => warn!("Skipping record in {:?}: {}", self.path, e),
            }
        }
    }
}
