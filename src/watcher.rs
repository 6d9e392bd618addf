//! Filesystem notification plumbing
//!
//! Bridges the `notify` backend to the capture pipelines: one recursive
//! watcher per tracked root delivers events from its own thread over a
//! tokio channel, and an async loop translates them into [`RawEvent`]s for
//! the matching [`ChangeCapture`].

use crate::capture::ChangeCapture;
use crate::error::Result;
use crate::types::{FsChange, RawEvent};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::future::Future;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

/// Capacity of the notification channel
const CHANNEL_CAPACITY: usize = 1024;

/// Translate one backend event into pipeline events
///
/// Access and unclassified events produce nothing.
pub fn translate(event: &Event) -> Vec<RawEvent> {
    let paths = &event.paths;
    match &event.kind {
        EventKind::Create(kind) => paths
            .iter()
            .map(|p| RawEvent {
                change: FsChange::Created(p.clone()),
                is_directory: matches!(kind, CreateKind::Folder) || p.is_dir(),
            })
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() == 2 => {
            let (from, to) = (paths[0].clone(), paths[1].clone());
            let is_directory = to.is_dir();
            vec![RawEvent {
                change: FsChange::Renamed { from, to },
                is_directory,
            }]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => paths
            .iter()
            .map(|p| RawEvent::file(FsChange::Deleted(p.clone())))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => paths
            .iter()
            .map(|p| RawEvent {
                change: FsChange::Created(p.clone()),
                is_directory: p.is_dir(),
            })
            .collect(),
        // Backends that cannot pair rename halves report either side alone.
        EventKind::Modify(ModifyKind::Name(_)) => paths
            .iter()
            .map(|p| {
                if p.exists() {
                    RawEvent {
                        change: FsChange::Created(p.clone()),
                        is_directory: p.is_dir(),
                    }
                } else {
                    RawEvent::file(FsChange::Deleted(p.clone()))
                }
            })
            .collect(),
        EventKind::Modify(_) => paths
            .iter()
            .map(|p| RawEvent {
                change: FsChange::Modified(p.clone()),
                is_directory: p.is_dir(),
            })
            .collect(),
        EventKind::Remove(kind) => paths
            .iter()
            .map(|p| RawEvent {
                change: FsChange::Deleted(p.clone()),
                is_directory: matches!(kind, RemoveKind::Folder),
            })
            .collect(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

/// Live watchers feeding a set of capture pipelines
pub struct WatchSession {
    watchers: Vec<RecommendedWatcher>,
    captures: Vec<ChangeCapture>,
    rx: mpsc::Receiver<(usize, notify::Result<Event>)>,
}

impl WatchSession {
    /// Start a recursive watcher for the root of every pipeline
    pub fn start(captures: Vec<ChangeCapture>) -> Result<Self> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut watchers = Vec::with_capacity(captures.len());

        for (idx, capture) in captures.iter().enumerate() {
            let tx = tx.clone();
            let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
                if let Err(e) = tx.blocking_send((idx, res)) {
                    error!("Failed to forward filesystem event: {}", e);
                }
            })?;
            watcher.watch(capture.root(), RecursiveMode::Recursive)?;
            info!("Watching {:?}", capture.root());
            watchers.push(watcher);
        }

        Ok(Self { watchers, captures, rx })
    }

    /// Number of watched roots
    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    /// Whether no roots are watched
    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    /// Dispatch events until `shutdown` completes
    ///
    /// On shutdown the watchers are dropped and every pending change is
    /// flushed before returning.
    pub async fn run_until<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    debug!("Shutdown requested");
                    break;
                }
                received = self.rx.recv() => {
                    let Some((idx, res)) = received else {
                        debug!("Notification channel closed");
                        break;
                    };
                    match res {
                        Ok(event) => {
                            trace!("Filesystem event: {:?}", event);
                            if let Some(capture) = self.captures.get(idx) {
                                for raw in translate(&event) {
                                    capture.handle(raw);
                                }
                            }
                        }
                        Err(e) => error!("Watch error: {}", e),
                    }
                }
            }
        }

        self.watchers.clear();
        for capture in &self.captures {
            capture.flush_pending();
        }
        info!("Stopped watching");
    }
}
