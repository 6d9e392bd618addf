//! Property-based testing for BlackMirror
//!
//! Uses proptest to check the history and rollback laws across randomly
//! generated operation sequences.

use ::blackmirror::rollback::{rollback, RootScope};
use ::blackmirror::*;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use walkdir::WalkDir;

/// One step of a synthetic editing session
#[derive(Debug, Clone)]
pub enum FileOperation {
    Write { path: String, content: Vec<u8> },
    Delete { path: String },
}

/// Paths from a small pool so operations collide often
///
/// Directory names (`d*`) and file names (`f*.txt`) never overlap.
fn path_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "f[0-3]\\.txt",
        "d[0-1]/f[0-2]\\.txt",
        "d[0-1]/d[0-1]/f[0-1]\\.txt",
    ]
}

fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        "[a-zA-Z0-9 \n]{0,200}".prop_map(|s| s.into_bytes()),
        prop::collection::vec(any::<u8>(), 0..512),
    ]
}

fn file_operation_strategy() -> impl Strategy<Value = FileOperation> {
    prop_oneof![
        3 => (path_strategy(), content_strategy())
            .prop_map(|(path, content)| FileOperation::Write { path, content }),
        1 => path_strategy().prop_map(|path| FileOperation::Delete { path }),
    ]
}

/// Apply `op` to the tree, the store (at `timestamp`) and the model
fn apply_operation(
    root: &Path,
    store: &SnapshotStore,
    model: &mut BTreeMap<String, Vec<u8>>,
    op: &FileOperation,
    timestamp: f64,
) {
    match op {
        FileOperation::Write { path, content } => {
            let full = root.join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(&full, content).unwrap();
            let kind = if store.has_log(path) { SnapshotKind::Modified } else { SnapshotKind::Created };
            store.record_at(path, timestamp, kind, Some(content)).unwrap();
            model.insert(path.clone(), content.clone());
        }
        FileOperation::Delete { path } => {
            if model.remove(path).is_some() {
                fs::remove_file(root.join(path)).unwrap();
                store.record_at(path, timestamp, SnapshotKind::Deleted, None).unwrap();
            }
        }
    }
}

/// Every regular file under `root` with its content
fn tree_state(root: &Path) -> BTreeMap<String, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = utils::relative_to(e.path(), root).unwrap();
            (rel, fs::read(e.path()).unwrap())
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(40))]

    /// Rolling back to the instant after the k-th operation reproduces the
    /// tree as it was after exactly k operations
    #[test]
    fn rollback_reproduces_prefix_state(
        operations in prop::collection::vec(file_operation_strategy(), 1..40),
        pick in any::<prop::sample::Index>(),
    ) {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        fs::create_dir_all(&root).unwrap();
        let root = root.canonicalize().unwrap();
        let mirrors = temp.path().join("mirrors");
        let store = SnapshotStore::for_root(&mirrors, &root).unwrap();

        let mut model = BTreeMap::new();
        let mut states = vec![model.clone()];
        for (i, op) in operations.iter().enumerate() {
            apply_operation(&root, &store, &mut model, op, (i + 1) as f64);
            states.push(model.clone());
        }
        prop_assert_eq!(tree_state(&root), model);

        let k = pick.index(states.len());
        let scopes = vec![RootScope { root: root.clone(), sub_path: None }];
        let result = rollback(&mirrors, &scopes, k as f64, &RollbackOptions::default()).unwrap();

        prop_assert!(result.is_clean());
        prop_assert_eq!(&tree_state(&root), &states[k]);

        // A second rollback to the same instant changes nothing.
        rollback(&mirrors, &scopes, k as f64, &RollbackOptions::default()).unwrap();
        prop_assert_eq!(&tree_state(&root), &states[k]);
    }

    /// The last event is always the one appended last
    #[test]
    fn last_event_is_last_appended(
        contents in prop::collection::vec(content_strategy(), 1..20),
    ) {
        let temp = TempDir::new().unwrap();
        let store = SnapshotStore::open(temp.path()).unwrap();
        for (i, content) in contents.iter().enumerate() {
            store.record_at("f.txt", i as f64, SnapshotKind::Modified, Some(content)).unwrap();
        }

        let last = store.last_event("f.txt").unwrap().unwrap();
        prop_assert_eq!(last.content.as_ref(), contents.last());
        prop_assert_eq!(store.read_all("f.txt").unwrap().count(), contents.len());
    }

    /// Log names never contain a separator and always decode back
    #[test]
    fn log_name_encoding_roundtrips(rel in "[a-zA-Z0-9 %._/\\-\u{e9}\u{2713}]{1,40}") {
        let encoded = utils::encode_rel_path(&rel);
        prop_assert!(!encoded.contains('/'));
        prop_assert!(!encoded.contains('\\'));
        prop_assert_eq!(utils::decode_rel_path(&encoded), Some(rel));
    }

    /// Anything under an ignored directory is ignored too
    #[test]
    fn ignored_directories_cover_descendants(
        dir in prop_oneof![
            Just("node_modules".to_string()),
            Just(".git".to_string()),
            Just("target".to_string()),
            "[a-z]{1,8}",
        ],
        child in "[a-z]{1,8}(/[a-z]{1,8}){0,3}",
        extra in prop::collection::vec("[a-z]{1,6}", 0..3),
    ) {
        let mut rules = IgnoreRuleSet::defaults();
        for pattern in extra {
            rules.add(pattern);
        }
        if rules.is_ignored(&dir) {
            let nested = format!("{}/{}", dir, child);
            prop_assert!(rules.is_ignored(&nested));
        }
    }

    /// `is_under_prefix` agrees with component-wise path prefixes
    #[test]
    fn prefix_matches_components(
        parts in prop::collection::vec("[a-c]{1,2}", 1..5),
        cut in any::<prop::sample::Index>(),
    ) {
        let rel = parts.join("/");
        let prefix = parts[..=cut.index(parts.len())].join("/");
        prop_assert!(utils::is_under_prefix(&rel, &prefix));
        prop_assert_eq!(
            utils::is_under_prefix(&rel, &format!("{}x", prefix)),
            Path::new(&rel).starts_with(format!("{}x", prefix))
        );
    }
}
