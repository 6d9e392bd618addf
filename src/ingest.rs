//! Initial ingestion
//!
//! Records a baseline `created` event for every eligible file of a tracked
//! root, so that files which are never touched while watching still have
//! something to roll back to.

use crate::capture::DEFAULT_MAX_FILE_SIZE;
use crate::ignore_rules::IgnoreRuleSet;
use crate::store::SnapshotSink;
use crate::types::{IngestResult, SnapshotKind};
use crate::utils;
use ignore::WalkBuilder;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Options for [`ingest`]
#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    /// Record files even when they already have history
    pub force: bool,
    /// Files above this size are skipped
    pub max_file_size: u64,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            force: false,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

/// Every non-ignored regular file under `root`, with its relative path
///
/// Ignored directories are pruned, never descended into. Symlinks are not
/// followed. Walk errors are logged and skipped.
pub fn eligible_files(root: &Path, rules: &IgnoreRuleSet) -> Vec<(String, PathBuf)> {
    let filter_root = root.to_path_buf();
    let filter_rules = rules.clone();

    // Our own rules replace the walker's built-in ignore handling.
    let mut walker_builder = WalkBuilder::new(root);
    walker_builder
        .standard_filters(false)
        .hidden(false)
        .follow_links(false)
        .filter_entry(move |entry| {
            if entry.depth() == 0 {
                return true;
            }
            match utils::relative_to(entry.path(), &filter_root) {
                Some(rel) => !filter_rules.is_ignored(&rel),
                None => false,
            }
        });

    let mut files = Vec::new();
    for entry in walker_builder.build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Walk error under {:?}: {}", root, e);
                continue;
            }
        };
        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        if let Some(rel) = utils::relative_to(entry.path(), root) {
            files.push((rel, entry.into_path()));
        }
    }

    files.sort();
    files
}

/// Record a `created` baseline for every eligible file of `root`
///
/// Per-file failures are logged and counted; ingestion itself never fails.
pub fn ingest(
    root: &Path,
    rules: &IgnoreRuleSet,
    sink: &dyn SnapshotSink,
    options: IngestOptions,
) -> IngestResult {
    let mut result = IngestResult::default();

    for (rel, path) in eligible_files(root, rules) {
        if !options.force && sink.has_history(&rel) {
            result.files_skipped += 1;
            continue;
        }

        let size = match fs::metadata(&path) {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                warn!("Cannot stat {}: {}", rel, e);
                result.errors += 1;
                continue;
            }
        };
        if size > options.max_file_size {
            warn!(
                "Skipping {}: {} bytes exceeds the {} byte limit",
                rel, size, options.max_file_size
            );
            result.files_too_large += 1;
            continue;
        }

        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Cannot read {}: {}", rel, e);
                result.errors += 1;
                continue;
            }
        };

        match sink.record(&rel, SnapshotKind::Created, Some(&content)) {
            Ok(()) => {
                debug!("Ingested {}", rel);
                result.files_recorded += 1;
            }
            Err(e) => {
                warn!("Failed to record {}: {}", rel, e);
                result.errors += 1;
            }
        }
    }

    info!(
        "Ingested {:?}: {} recorded, {} already tracked, {} too large, {} errors",
        root, result.files_recorded, result.files_skipped, result.files_too_large, result.errors
    );
    result
}
