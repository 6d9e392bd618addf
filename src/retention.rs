//! Retention and pruning of snapshot history
//!
//! Two independent policies, usually applied age first and size second:
//!
//! - **Age**: drop events older than a window, rewriting each log atomically
//!   and deleting logs left empty.
//! - **Size**: delete whole logs, least recently written first, until the
//!   store fits a byte budget.

use crate::error::Result;
use crate::store::{LogReader, SnapshotStore};
use crate::types::{LogRecord, PruneResult};
use crate::utils;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Drop events older than `window`
///
/// Malformed lines do not survive a rewrite. Logs whose every event is
/// expired are removed.
pub fn prune_age(store: &SnapshotStore, window: Duration) -> Result<PruneResult> {
    let threshold = utils::now_timestamp() - window.as_secs_f64();
    prune_before(store, threshold)
}

/// Drop events stamped before `threshold` (seconds since the epoch)
pub fn prune_before(store: &SnapshotStore, threshold: f64) -> Result<PruneResult> {
    let logs = store.log_files()?;
    let mut result = PruneResult {
        bytes_before: logs.iter().map(|log| log.size).sum(),
        ..Default::default()
    };

    for log in logs {
        let file = match fs::File::open(&log.path) {
            Ok(file) => file,
            Err(e) => {
                warn!("Cannot open {:?} for pruning: {}", log.path, e);
                continue;
            }
        };

        let mut kept = Vec::new();
        let mut total = 0usize;
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let Ok(line) = line else {
                total += 1;
                continue;
            };
            if line.trim().is_empty() {
                continue;
            }
            total += 1;
            match LogReader::parse_line(&line, idx + 1) {
                Ok(event) if event.timestamp >= threshold => kept.push(event),
                Ok(_) => {}
                Err(e) => debug!("Dropping malformed record from {}: {}", log.rel_path, e),
            }
        }

        if kept.len() == total {
            continue;
        }
        result.events_removed += total - kept.len();

        if kept.is_empty() {
            match fs::remove_file(&log.path) {
                Ok(()) => {
                    debug!("Removed expired log for {}", log.rel_path);
                    result.logs_deleted += 1;
                }
                Err(e) => warn!("Cannot remove {:?}: {}", log.path, e),
            }
            continue;
        }

        let rewrite = || -> Result<()> {
            let mut temp = NamedTempFile::new_in(store.root())?;
            for event in &kept {
                serde_json::to_writer(&mut temp, &LogRecord::from_event(event))?;
                temp.write_all(b"\n")?;
            }
            temp.flush()?;
            temp.persist(&log.path).map_err(|e| e.error)?;
            Ok(())
        };

        match rewrite() {
            Ok(()) => {
                debug!("Rewrote log for {} keeping {} events", log.rel_path, kept.len());
                result.logs_rewritten += 1;
            }
            Err(e) => warn!("Cannot rewrite {:?}: {}", log.path, e),
        }
    }

    result.bytes_after = store.total_size()?;
    info!(
        "Age pruning of {:?}: {} events removed, {} logs rewritten, {} deleted",
        store.root(),
        result.events_removed,
        result.logs_rewritten,
        result.logs_deleted
    );
    Ok(result)
}

/// Delete whole logs, oldest modification first, until the store fits `budget` bytes
pub fn prune_size(store: &SnapshotStore, budget: u64) -> Result<PruneResult> {
    let mut logs = store.log_files()?;
    let mut total: u64 = logs.iter().map(|log| log.size).sum();
    let mut result = PruneResult {
        bytes_before: total,
        ..Default::default()
    };

    if total <= budget {
        result.bytes_after = total;
        return Ok(result);
    }

    logs.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.rel_path.cmp(&b.rel_path)));

    for log in logs {
        if total <= budget {
            break;
        }
        let events = LogReader::open(&log.path).map(|reader| reader.count()).unwrap_or(0);
        match fs::remove_file(&log.path) {
            Ok(()) => {
                debug!("Removed log for {} ({} bytes)", log.rel_path, log.size);
                total = total.saturating_sub(log.size);
                result.logs_deleted += 1;
                result.events_removed += events;
            }
            Err(e) => warn!("Cannot remove {:?}: {}", log.path, e),
        }
    }

    result.bytes_after = total;
    info!(
        "Size pruning of {:?}: {} logs deleted, {} now used of {} budget",
        store.root(),
        result.logs_deleted,
        utils::format_bytes(total),
        utils::format_bytes(budget)
    );
    Ok(result)
}
