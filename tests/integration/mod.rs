//! Integration tests for BlackMirror
//!
//! Drives the capture pipeline the way a watcher would, then rolls back to
//! marks taken along the way.

use ::blackmirror::rollback::{resolve_scope, rollback};
use ::blackmirror::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;
use walkdir::WalkDir;

/// Test harness feeding synthetic notifications through a real pipeline
pub struct MirrorHarness {
    pub data_dir: TempDir,
    pub project_dir: TempDir,
    pub tracked: TrackedRoots,
    pub root: PathBuf,
    pub store: Arc<SnapshotStore>,
    pub capture: ChangeCapture,
}

impl MirrorHarness {
    /// Create a harness tracking an empty project
    pub fn new() -> Self {
        let data_dir = TempDir::new().unwrap();
        let project_dir = TempDir::new().unwrap();
        let mut tracked = TrackedRoots::load(data_dir.path()).unwrap();
        let (root, _) = tracked.add(project_dir.path()).unwrap();
        let store = Arc::new(tracked.store_for(&root).unwrap());
        let capture = Self::pipeline(&tracked, &root, &store);

        Self { data_dir, project_dir, tracked, root, store, capture }
    }

    fn pipeline(tracked: &TrackedRoots, root: &Path, store: &Arc<SnapshotStore>) -> ChangeCapture {
        let options = tracked.capture_options().with_debounce(Duration::ZERO);
        ChangeCapture::new(root, ignore_rules::resolve(root), store.clone(), options)
    }

    /// Simulate a watcher restart: fresh pipeline, seeded from history
    pub fn restart(&mut self) {
        self.capture = Self::pipeline(&self.tracked, &self.root, &self.store);
        self.capture.seed_fingerprints(&self.store).unwrap();
    }

    pub fn write(&self, rel: &str, content: &[u8]) {
        let path = self.root.join(rel);
        let existed = path.exists();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        let change = if existed { FsChange::Modified(path) } else { FsChange::Created(path) };
        self.capture.handle(RawEvent::file(change));
    }

    pub fn delete(&self, rel: &str) {
        let path = self.root.join(rel);
        fs::remove_file(&path).unwrap();
        self.capture.handle(RawEvent::file(FsChange::Deleted(path)));
    }

    pub fn rename(&self, from: &str, to: &str) {
        let from = self.root.join(from);
        let to = self.root.join(to);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::rename(&from, &to).unwrap();
        self.capture.handle(RawEvent::file(FsChange::Renamed { from, to }));
    }

    /// A cutoff strictly between everything before and after this call
    pub fn mark(&self) -> f64 {
        thread::sleep(Duration::from_millis(15));
        let mark = utils::now_timestamp();
        thread::sleep(Duration::from_millis(15));
        mark
    }

    pub fn rollback_to(&self, cutoff: f64, options: &RollbackOptions) -> RollbackResult {
        let scopes = resolve_scope(self.tracked.roots(), &self.root).unwrap();
        rollback(&self.tracked.mirrors_dir(), &scopes, cutoff, options).unwrap()
    }

    /// Every regular file under the root with its content
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let rel = utils::relative_to(e.path(), &self.root).unwrap();
                (rel, fs::read(e.path()).unwrap())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeline_of_marks() {
        let harness = MirrorHarness::new();

        harness.write("README.md", b"v1");
        harness.write("src/lib.rs", b"pub fn a() {}");
        let first = harness.mark();
        let state_first = harness.snapshot();

        harness.write("README.md", b"v2");
        harness.write("src/extra.rs", b"fn extra() {}");
        harness.delete("src/lib.rs");
        let second = harness.mark();
        let state_second = harness.snapshot();

        harness.write("README.md", b"v3");
        harness.rename("src/extra.rs", "src/moved.rs");

        harness.rollback_to(first, &RollbackOptions::default());
        assert_eq!(harness.snapshot(), state_first);

        // Going forward again works because rollback does not erase history.
        harness.rollback_to(second, &RollbackOptions::default());
        assert_eq!(harness.snapshot(), state_second);
    }

    #[test]
    fn test_rename_history() {
        let harness = MirrorHarness::new();
        harness.write("old.txt", b"payload");
        let before = harness.mark();
        harness.rename("old.txt", "new.txt");

        let kinds: Vec<_> = harness.store.read_all("old.txt").unwrap().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![SnapshotKind::Created, SnapshotKind::Deleted]);

        harness.rollback_to(before, &RollbackOptions::default());
        assert_eq!(fs::read(harness.root.join("old.txt")).unwrap(), b"payload");
        assert!(!harness.root.join("new.txt").exists());
    }

    #[test]
    fn test_ignored_paths_are_never_recorded_or_touched() {
        let harness = MirrorHarness::new();
        fs::write(harness.root.join(".bmlignore"), "*.log\n").unwrap();
        let mut harness = harness;
        harness.restart();

        harness.write("app.log", b"noise");
        harness.write("node_modules/pkg/index.js", b"dep");
        harness.write("kept.txt", b"kept");
        let cutoff = harness.mark();
        harness.write("app.log", b"more noise");

        assert_eq!(harness.store.enumerate().unwrap(), vec!["kept.txt"]);

        harness.rollback_to(cutoff, &RollbackOptions::default());
        assert_eq!(fs::read(harness.root.join("app.log")).unwrap(), b"more noise");
        assert!(harness.root.join("node_modules/pkg/index.js").exists());
    }

    #[test]
    fn test_restart_does_not_duplicate_history() {
        let mut harness = MirrorHarness::new();
        harness.write("a.txt", b"same");
        harness.restart();

        harness.write("a.txt", b"same");
        assert_eq!(harness.store.read_all("a.txt").unwrap().count(), 1);

        harness.write("a.txt", b"different");
        let kinds: Vec<_> = harness.store.read_all("a.txt").unwrap().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![SnapshotKind::Created, SnapshotKind::Modified]);
    }

    #[test]
    fn test_only_and_keep_filters_combined() {
        let harness = MirrorHarness::new();
        let cutoff = harness.mark();
        harness.write("src/a.py", b"a");
        harness.write("src/vendor/b.py", b"b");
        harness.write("notes.md", b"n");

        let options = RollbackOptions::default()
            .with_only(["**/*.py"])
            .with_keep(["src/vendor"]);
        let result = harness.rollback_to(cutoff, &options);

        assert_eq!(result.files_deleted, 1);
        assert_eq!(result.paths_kept, 1);
        assert!(!harness.root.join("src/a.py").exists());
        assert!(harness.root.join("src/vendor/b.py").exists());
        assert!(harness.root.join("notes.md").exists());
    }

    #[test]
    fn test_ingest_then_capture_classifies_modified() {
        let mut harness = MirrorHarness::new();
        fs::write(harness.root.join("pre.txt"), b"existing").unwrap();
        ingest::ingest(
            &harness.root,
            &ignore_rules::resolve(&harness.root),
            harness.store.as_ref(),
            IngestOptions::default(),
        );
        harness.restart();

        harness.write("pre.txt", b"edited");
        let last = harness.store.last_event("pre.txt").unwrap().unwrap();
        assert_eq!(last.kind, SnapshotKind::Modified);
        assert!(harness.data_dir.path().join("config.json").exists());
    }
}
