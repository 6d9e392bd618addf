//! Point-in-time rollback
//!
//! Restores tracked files to the state they had at a cutoff instant. For each
//! logged relative path the engine finds the last event at or before the
//! cutoff and makes the working tree agree with it:
//!
//! | Event at cutoff            | Action                                 |
//! |----------------------------|----------------------------------------|
//! | none                       | remove the file if one is there        |
//! | `deleted`                  | remove the file if one is there        |
//! | `created` / `modified`     | write the recorded content             |
//! | content missing            | leave the path alone                   |
//!
//! Scanning is done in parallel per path; the filesystem is then changed
//! sequentially. Rollback is not transactional: a path that fails is
//! reported in [`RollbackResult::errors`] and the rest still proceed.
//!
//! Running a rollback while a watcher captures the same root records the
//! restoration itself as new history. Callers are expected to serialize the
//! two.
//!
//! ## Example
//!
//! ```rust,ignore
//! use blackmirror::rollback::{jump_back, resolve_scope, RollbackOptions};
//! use std::time::Duration;
//!
//! let scopes = resolve_scope(&roots, &std::env::current_dir()?)?;
//! let result = jump_back(&mirrors_dir, &scopes, Duration::from_secs(600), &RollbackOptions::default())?;
//! println!("{} restored, {} deleted", result.files_restored, result.files_deleted);
//! ```

use crate::error::{BlackMirrorError, Result};
use crate::store::SnapshotStore;
use crate::types::{RollbackResult, SnapshotEvent, SnapshotKind};
use crate::utils;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Prefixes that are never touched by a rollback
pub const BUILTIN_KEEP: &[&str] = &[".git", ".env"];

/// One tracked root selected for a rollback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootScope {
    /// The tracked root
    pub root: PathBuf,
    /// Restrict the rollback to this relative sub-path, if any
    pub sub_path: Option<String>,
}

/// Filters applied on top of the scope
#[derive(Debug, Clone, Default)]
pub struct RollbackOptions {
    /// Extra relative prefixes to leave alone, merged with [`BUILTIN_KEEP`]
    pub keep: Vec<String>,
    /// When non-empty, only relative paths matching one of these globs are touched
    pub only: Vec<String>,
}

impl RollbackOptions {
    /// Add prefixes to the keep list
    pub fn with_keep<I, S>(mut self, keep: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keep.extend(keep.into_iter().map(Into::into));
        self
    }

    /// Add globs to the only list
    pub fn with_only<I, S>(mut self, only: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only.extend(only.into_iter().map(Into::into));
        self
    }

    fn keep_prefixes(&self) -> Vec<String> {
        BUILTIN_KEEP
            .iter()
            .map(|s| s.to_string())
            .chain(self.keep.iter().map(|k| k.trim_matches('/').to_string()))
            .filter(|k| !k.is_empty())
            .collect()
    }

    fn only_set(&self) -> Result<Option<GlobSet>> {
        if self.only.is_empty() {
            return Ok(None);
        }
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.only {
            let glob = GlobBuilder::new(pattern)
                .build()
                .map_err(|e| BlackMirrorError::InvalidPattern(format!("{}: {}", pattern, e)))?;
            builder.add(glob);
        }
        builder
            .build()
            .map(Some)
            .map_err(|e| BlackMirrorError::InvalidPattern(e.to_string()))
    }
}

/// Select the tracked roots a rollback at `target` applies to
///
/// Every root that equals `target` or contains it is selected. When
/// `target` lies strictly inside a root, only that sub-path of the root is
/// in scope. A relative `target` is taken from the current directory, and
/// it may name a path that no longer exists.
pub fn resolve_scope(roots: &[PathBuf], target: &Path) -> Result<Vec<RootScope>> {
    if roots.is_empty() {
        return Err(BlackMirrorError::scope("No folders are tracked"));
    }

    let target = utils::absolutize(target)?;

    let scopes: Vec<RootScope> = roots
        .iter()
        .filter_map(|root| {
            let rest = target.strip_prefix(root).ok()?;
            Some(RootScope {
                root: root.clone(),
                sub_path: utils::rel_path_string(rest),
            })
        })
        .collect();

    if scopes.is_empty() {
        return Err(BlackMirrorError::scope(format!(
            "{} is not inside any tracked folder",
            target.display()
        )));
    }
    Ok(scopes)
}

/// Roll the scoped roots back by `delta` from now
pub fn jump_back(
    mirrors_dir: &Path,
    scopes: &[RootScope],
    delta: Duration,
    options: &RollbackOptions,
) -> Result<RollbackResult> {
    let cutoff = utils::now_timestamp() - delta.as_secs_f64();
    rollback(mirrors_dir, scopes, cutoff, options)
}

/// Restore the scoped roots to their state at `cutoff`
///
/// Fails before touching anything when a glob in `options.only` is invalid
/// or a store cannot be opened. Per-path failures are collected instead.
pub fn rollback(
    mirrors_dir: &Path,
    scopes: &[RootScope],
    cutoff: f64,
    options: &RollbackOptions,
) -> Result<RollbackResult> {
    let start = Instant::now();
    let only = options.only_set()?;
    let keep = options.keep_prefixes();

    let stores = scopes
        .iter()
        .map(|scope| SnapshotStore::for_root(mirrors_dir, &scope.root).map(|store| (scope, store)))
        .collect::<Result<Vec<_>>>()?;

    info!("Rolling back {} root(s) to {:.3}", scopes.len(), cutoff);

    let mut result = RollbackResult {
        cutoff,
        roots: scopes.iter().map(|s| s.root.clone()).collect(),
        ..Default::default()
    };

    for (scope, store) in stores {
        let rels = match store.enumerate() {
            Ok(rels) => rels,
            Err(e) => {
                warn!("Cannot list history for {:?}: {}", scope.root, e);
                result.errors.push((scope.root.clone(), e.to_string()));
                continue;
            }
        };

        let protected = utils::relative_to(mirrors_dir, &scope.root);

        let mut candidates = Vec::with_capacity(rels.len());
        for rel in rels {
            if !utils::is_safe_rel_path(&rel) {
                warn!("Refusing to touch unsafe history path {:?}", rel);
                result
                    .errors
                    .push((scope.root.clone(), format!("unsafe relative path {:?}", rel)));
                continue;
            }
            if let Some(sub) = &scope.sub_path {
                if !utils::is_under_prefix(&rel, sub) {
                    continue;
                }
            }
            if let Some(only) = &only {
                if !only.is_match(&rel) {
                    continue;
                }
            }
            let is_store = protected
                .as_deref()
                .is_some_and(|store_rel| utils::is_under_prefix(&rel, store_rel));
            if is_store || keep.iter().any(|prefix| utils::is_under_prefix(&rel, prefix)) {
                trace!("Keeping {}", rel);
                result.paths_kept += 1;
                continue;
            }
            candidates.push(rel);
        }

        debug!("Scanning {} logs under {:?}", candidates.len(), scope.root);

        let decisions: Vec<(String, Result<Option<SnapshotEvent>>)> = candidates
            .into_par_iter()
            .map(|rel| {
                let event = store.event_at(&rel, cutoff);
                (rel, event)
            })
            .collect();

        for (rel, decision) in decisions {
            let target = scope.root.join(&rel);
            match decision {
                Ok(event) => apply(&target, event, &mut result),
                Err(e) => {
                    warn!("Cannot read history of {}: {}", rel, e);
                    result.errors.push((target, e.to_string()));
                }
            }
        }
    }

    result.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "Rollback finished in {}ms: {} restored, {} deleted, {} kept, {} skipped, {} errors",
        result.duration_ms,
        result.files_restored,
        result.files_deleted,
        result.paths_kept,
        result.paths_skipped,
        result.errors.len()
    );
    Ok(result)
}

fn apply(target: &Path, event: Option<SnapshotEvent>, result: &mut RollbackResult) {
    match event {
        None => remove_file_at(target, result),
        Some(event) if event.kind == SnapshotKind::Deleted => remove_file_at(target, result),
        Some(SnapshotEvent { content: Some(content), .. }) => match restore_file(target, &content) {
            Ok(()) => {
                trace!("Restored {:?}", target);
                result.files_restored += 1;
                result.bytes_written += content.len() as u64;
            }
            Err(e) => {
                warn!("Failed to restore {:?}: {}", target, e);
                result.errors.push((target.to_path_buf(), e.to_string()));
            }
        },
        Some(_) => {
            debug!("No content recorded for {:?}, leaving it alone", target);
            result.paths_skipped += 1;
        }
    }
}

/// Remove a regular file or symlink; directories are left alone
fn remove_file_at(target: &Path, result: &mut RollbackResult) {
    let metadata = match fs::symlink_metadata(target) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return,
        Err(e) => {
            result.errors.push((target.to_path_buf(), e.to_string()));
            return;
        }
    };

    if !(metadata.is_file() || metadata.file_type().is_symlink()) {
        trace!("Not a file, leaving {:?}", target);
        return;
    }

    match fs::remove_file(target) {
        Ok(()) => {
            trace!("Deleted {:?}", target);
            result.files_deleted += 1;
        }
        Err(e) => {
            warn!("Failed to delete {:?}: {}", target, e);
            result.errors.push((target.to_path_buf(), e.to_string()));
        }
    }
}

fn restore_file(target: &Path, content: &[u8]) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    // Replace a symlink instead of writing through it.
    if let Ok(metadata) = fs::symlink_metadata(target) {
        if metadata.file_type().is_symlink() {
            fs::remove_file(target)?;
        }
    }
    fs::write(target, content)
}
