//! # BlackMirror - a filesystem time machine
//!
//! Watches directory trees, keeps an append-only history of every tracked
//! file, and can roll a tree back to how it looked at any earlier instant.
//!
//! ## Overview
//!
//! BlackMirror records full file contents rather than diffs:
//! - Every change to a tracked file appends one event to that file's log
//! - Bursts of writes collapse into one event (debounce) and identical
//!   content is never recorded twice (fingerprints)
//! - Deletes and renames are captured immediately
//! - Rollback replays each log up to a cutoff and makes the tree agree
//! - Retention bounds the history by age or by total size
//!
//! ## Architecture
//!
//! - **Ignore rules** ([`ignore_rules`]): defaults plus `.bmlignore` and
//!   `.gitignore` files decide what is never recorded
//! - **Capture** ([`capture`]): per-root pipeline from raw notifications to
//!   snapshot events
//! - **Store** ([`store`]): one JSON-lines log per relative path, one
//!   namespace per tracked root
//! - **Ingestion** ([`ingest`]): baseline `created` events for files that
//!   existed before watching began
//! - **Rollback** ([`rollback`]): point-in-time restore
//! - **Retention** ([`retention`]): age and size pruning
//! - **Watching** ([`watcher`]): `notify` backend bridged onto tokio
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use blackmirror::{ingest, IngestOptions, RollbackOptions, TrackedRoots};
//! use blackmirror::rollback::{jump_back, resolve_scope};
//! use std::path::Path;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut tracked = TrackedRoots::load_default()?;
//! let (root, _) = tracked.add(Path::new("./my_project"))?;
//!
//! // Record a baseline for everything already there
//! let store = tracked.store_for(&root)?;
//! let rules = blackmirror::ignore_rules::resolve(&root);
//! ingest::ingest(&root, &rules, &store, IngestOptions::default());
//!
//! // ... later: undo the last ten minutes
//! let scopes = resolve_scope(tracked.roots(), &root)?;
//! let result = jump_back(&tracked.mirrors_dir(), &scopes, Duration::from_secs(600), &RollbackOptions::default())?;
//! println!("Restored {} files, deleted {}", result.files_restored, result.files_deleted);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Operations return `Result<T, BlackMirrorError>`. Problems with a single
//! path (unreadable file, malformed log line, oversized file) are logged and
//! counted in the operation's summary; only precondition failures abort.

// Public API modules
pub mod capture;
pub mod config;
pub mod error;
pub mod ignore_rules;
pub mod ingest;
pub mod retention;
pub mod rollback;
pub mod store;
pub mod types;
pub mod utils;
pub mod watcher;

// Re-export main types for convenience
pub use capture::{CaptureOptions, ChangeCapture};
pub use config::{Settings, TrackedRoots};
pub use error::{BlackMirrorError, Result};
pub use ignore_rules::{Bootstrap, IgnoreRuleSet, TemplateSource};
pub use ingest::IngestOptions;
pub use rollback::{RollbackOptions, RootScope};
pub use store::{SnapshotSink, SnapshotStore};
pub use types::*;
pub use watcher::WatchSession;
