//! Change capture pipeline
//!
//! Turns raw filesystem notifications for one tracked root into snapshot
//! events. Creates and modifications are debounced per path and deduplicated
//! by content fingerprint; deletes and renames are recorded immediately.
//!
//! ## Flow
//!
//! ```text
//! RawEvent ──► directory? drop
//!          ──► outside root / ignored? drop
//!          ──► Renamed  ──► deleted(old) + created(new), now
//!          ──► Deleted  ──► deleted, now
//!          ──► Created/Modified ──► (re)arm timer ──► flush:
//!                  stat ─► over ceiling? warn, drop
//!                  read ─► same fingerprint? drop
//!                  record created|modified, remember fingerprint
//! ```
//!
//! Timers are tokio tasks on the ambient runtime. Without a runtime, or
//! with a zero debounce interval, the flush runs inline on the caller.
//!
//! Every event bumps its path's generation. A timer records only while its
//! generation is still the newest, checked under the same lock that guards
//! the fingerprint table, so a delete that lands mid-flush always wins.
//!
//! ## Example
//!
//! ```rust,ignore
//! use blackmirror::{ChangeCapture, CaptureOptions, IgnoreRuleSet, SnapshotStore};
//! use std::sync::Arc;
//!
//! let store = Arc::new(SnapshotStore::open("/tmp/mirror")?);
//! let capture = ChangeCapture::new("/work/project", IgnoreRuleSet::defaults(), store.clone(), CaptureOptions::default());
//! capture.seed_fingerprints(&store)?;
//! capture.handle(event);
//! ```

use crate::error::Result;
use crate::ignore_rules::IgnoreRuleSet;
use crate::store::{SnapshotSink, SnapshotStore};
use crate::types::{FsChange, RawEvent, SnapshotKind};
use crate::utils;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Default quiet interval before a changed file is recorded
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Default size ceiling for recorded content (100 MiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Tuning for a [`ChangeCapture`]
#[derive(Debug, Clone, Copy)]
pub struct CaptureOptions {
    /// Quiet interval per path; zero records synchronously
    pub debounce: Duration,
    /// Files larger than this are never recorded
    pub max_file_size: u64,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl CaptureOptions {
    /// Set the debounce interval
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Set the size ceiling
    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }
}

struct PendingTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct PathTable {
    fingerprints: HashMap<String, String>,
    /// Generation of the newest event per path
    epochs: HashMap<String, u64>,
}

struct CaptureState {
    root: PathBuf,
    rules: IgnoreRuleSet,
    sink: Arc<dyn SnapshotSink>,
    options: CaptureOptions,
    pending: DashMap<String, PendingTimer>,
    table: Mutex<PathTable>,
    generation: AtomicU64,
}

/// Capture pipeline for one tracked root
///
/// Cheap to clone; clones share timers and fingerprints.
#[derive(Clone)]
pub struct ChangeCapture {
    state: Arc<CaptureState>,
}

impl ChangeCapture {
    /// Create a pipeline writing to `sink`
    pub fn new(
        root: impl Into<PathBuf>,
        rules: IgnoreRuleSet,
        sink: Arc<dyn SnapshotSink>,
        options: CaptureOptions,
    ) -> Self {
        Self {
            state: Arc::new(CaptureState {
                root: root.into(),
                rules,
                sink,
                options,
                pending: DashMap::new(),
                table: Mutex::new(PathTable::default()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Root this pipeline serves
    pub fn root(&self) -> &Path {
        &self.state.root
    }

    /// Load fingerprints from the last recorded content of every logged path
    ///
    /// Returns how many paths were seeded. Paths whose last event is a
    /// deletion stay unseeded.
    pub fn seed_fingerprints(&self, store: &SnapshotStore) -> Result<usize> {
        let mut seeded = HashMap::new();
        for rel in store.enumerate()? {
            match store.last_event(&rel) {
                Ok(Some(event)) => {
                    if let Some(content) = event.content {
                        if event.kind.carries_content() {
                            seeded.insert(rel, utils::hash_data(&content));
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Cannot read history of {}: {}", rel, e),
            }
        }

        let count = seeded.len();
        self.state.table.lock().fingerprints.extend(seeded);
        debug!("Seeded {} fingerprints for {:?}", count, self.state.root);
        Ok(count)
    }

    /// Feed one notification through the pipeline
    pub fn handle(&self, event: RawEvent) {
        if event.is_directory {
            trace!("Dropping directory event {:?}", event.change);
            return;
        }

        match event.change {
            FsChange::Created(path) | FsChange::Modified(path) => {
                if let Some(rel) = self.state.relevant(&path) {
                    self.schedule(rel, path);
                }
            }
            FsChange::Deleted(path) => {
                if let Some(rel) = self.state.relevant(&path) {
                    self.state.record_deleted(&rel);
                }
            }
            FsChange::Renamed { from, to } => {
                if let Some(rel) = self.state.relevant(&from) {
                    self.state.record_deleted(&rel);
                }
                if let Some(rel) = self.state.relevant(&to) {
                    self.state.cancel(&rel);
                    self.state.capture(&rel, &to, Some(SnapshotKind::Created), None);
                }
            }
        }
    }

    /// Number of paths waiting for their debounce interval to expire
    pub fn pending_count(&self) -> usize {
        self.state.pending.len()
    }

    /// Current fingerprint of a path, if any
    pub fn fingerprint(&self, rel_path: &str) -> Option<String> {
        self.state.table.lock().fingerprints.get(rel_path).cloned()
    }

    /// Cancel every pending timer and flush its path right away
    pub fn flush_pending(&self) {
        let keys: Vec<String> = self.state.pending.iter().map(|e| e.key().clone()).collect();
        for rel in keys {
            if let Some((_, timer)) = self.state.pending.remove(&rel) {
                timer.handle.abort();
                let path = self.state.root.join(&rel);
                self.state.capture(&rel, &path, None, None);
            }
        }
    }

    fn schedule(&self, rel: String, path: PathBuf) {
        self.state.cancel(&rel);

        let debounce = self.state.options.debounce;
        if debounce.is_zero() {
            self.state.capture(&rel, &path, None, None);
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                self.state.capture(&rel, &path, None, None);
                return;
            }
        };

        let generation = self.state.arm(&rel);

        // The entry keeps its shard locked until the timer is stored, so the
        // task cannot look for itself before it is there.
        let entry = self.state.pending.entry(rel.clone());
        let state = Arc::clone(&self.state);
        let key = rel.clone();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(debounce).await;
            let current = state
                .pending
                .remove_if(&key, |_, timer| timer.generation == generation)
                .is_some();
            if current {
                state.capture(&key, &path, None, Some(generation));
            }
        });

        let timer = PendingTimer { generation, handle };
        match entry {
            Entry::Occupied(mut occupied) => occupied.insert(timer).handle.abort(),
            Entry::Vacant(vacant) => {
                vacant.insert(timer);
            }
        }
        trace!("Armed debounce timer for {}", rel);
    }
}

impl CaptureState {
    /// Relative path of `path` when it is inside the root and not ignored
    fn relevant(&self, path: &Path) -> Option<String> {
        let Some(rel) = utils::relative_to(path, &self.root) else {
            trace!("Dropping event outside {:?}: {:?}", self.root, path);
            return None;
        };
        if self.rules.is_ignored(&rel) {
            trace!("Dropping event for ignored path {}", rel);
            return None;
        }
        Some(rel)
    }

    /// Start a new generation for `rel`, superseding any running timer
    fn arm(&self, rel: &str) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.table.lock().epochs.insert(rel.to_string(), generation);
        generation
    }

    fn cancel(&self, rel: &str) {
        self.arm(rel);
        if let Some((_, timer)) = self.pending.remove(rel) {
            timer.handle.abort();
            trace!("Cancelled pending timer for {}", rel);
        }
    }

    fn record_deleted(&self, rel: &str) {
        self.cancel(rel);
        let mut table = self.table.lock();
        table.fingerprints.remove(rel);
        match self.sink.record(rel, SnapshotKind::Deleted, None) {
            Ok(()) => debug!("Recorded deletion of {}", rel),
            Err(e) => warn!("Failed to record deletion of {}: {}", rel, e),
        }
    }

    /// Read the current bytes of `path` and record them
    ///
    /// With `forced` unset the kind follows the fingerprint table and
    /// unchanged content is dropped. A timer passes its generation as
    /// `expected`; nothing is recorded once a newer event has arrived.
    fn capture(&self, rel: &str, path: &Path, forced: Option<SnapshotKind>, expected: Option<u64>) {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{} vanished before it could be recorded", rel);
                return;
            }
            Err(e) => {
                warn!("Cannot stat {}: {}", rel, e);
                return;
            }
        };

        if !metadata.is_file() {
            trace!("Not a regular file, skipping {}", rel);
            return;
        }

        let limit = self.options.max_file_size;
        if metadata.len() > limit {
            warn!(
                "Skipping {}: {} bytes exceeds the {} byte limit",
                rel,
                metadata.len(),
                limit
            );
            return;
        }

        let content = match fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{} vanished before it could be recorded", rel);
                return;
            }
            Err(e) => {
                warn!("Cannot read {}: {}", rel, e);
                return;
            }
        };

        let digest = utils::hash_data(&content);
        let mut table = self.table.lock();
        if let Some(generation) = expected {
            if table.epochs.get(rel) != Some(&generation) {
                trace!("Timer for {} was superseded", rel);
                return;
            }
        }
        let kind = match forced {
            Some(kind) => kind,
            None => match table.fingerprints.get(rel) {
                Some(previous) if *previous == digest => {
                    trace!("Content of {} unchanged", rel);
                    return;
                }
                Some(_) => SnapshotKind::Modified,
                None => SnapshotKind::Created,
            },
        };

        match self.sink.record(rel, kind, Some(&content)) {
            Ok(()) => {
                table.fingerprints.insert(rel.to_string(), digest);
                debug!("Recorded {} for {} ({} bytes)", kind, rel, content.len());
            }
            Err(e) => warn!("Failed to record {} for {}: {}", kind, rel, e),
        }
    }
}

impl Drop for CaptureState {
    fn drop(&mut self) {
        for entry in self.pending.iter() {
            entry.value().handle.abort();
        }
    }
}
