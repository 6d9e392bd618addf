//! Main test module for BlackMirror
//!
//! This module includes all test suites:
//! - Integration tests for multi-step capture and rollback scenarios
//! - Property-based tests for invariants
//! - Edge cases below

pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::blackmirror::rollback::{rollback, RootScope};
    use ::blackmirror::*;
    use std::fs;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Env {
        _temp: TempDir,
        root: PathBuf,
        mirrors: PathBuf,
        store: SnapshotStore,
    }

    fn env() -> Env {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        fs::create_dir_all(&root).unwrap();
        let root = root.canonicalize().unwrap();
        let mirrors = temp.path().join("mirrors");
        let store = SnapshotStore::for_root(&mirrors, &root).unwrap();
        Env { _temp: temp, root, mirrors, store }
    }

    fn scope(env: &Env) -> Vec<RootScope> {
        vec![RootScope { root: env.root.clone(), sub_path: None }]
    }

    #[test]
    fn test_special_filenames() {
        let env = env();
        let special_names = vec![
            "file with spaces.txt",
            "100% done.txt",
            "a__b.txt",
            "a%2Fb.txt",
            "unicodé ✓.md",
            "file[with]brackets.txt",
            "nested dir/inner file.txt",
        ];

        for (idx, name) in special_names.iter().enumerate() {
            env.store
                .record_at(name, 1.0, SnapshotKind::Created, Some(format!("content {}", idx).as_bytes()))
                .unwrap();
        }

        let mut listed = env.store.enumerate().unwrap();
        listed.sort();
        let mut expected: Vec<String> = special_names.iter().map(|s| s.to_string()).collect();
        expected.sort();
        assert_eq!(listed, expected);

        let result = rollback(&env.mirrors, &scope(&env), 5.0, &RollbackOptions::default()).unwrap();
        assert_eq!(result.files_restored, special_names.len());
        for (idx, name) in special_names.iter().enumerate() {
            assert_eq!(
                fs::read_to_string(env.root.join(name)).unwrap(),
                format!("content {}", idx)
            );
        }
    }

    #[test]
    fn test_empty_file_is_restored() {
        let env = env();
        env.store.record_at("empty", 1.0, SnapshotKind::Created, Some(b"")).unwrap();
        env.store.record_at("empty", 2.0, SnapshotKind::Modified, Some(b"filled")).unwrap();
        fs::write(env.root.join("empty"), "filled").unwrap();

        rollback(&env.mirrors, &scope(&env), 1.5, &RollbackOptions::default()).unwrap();
        assert_eq!(fs::read(env.root.join("empty")).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_binary_content_survives() {
        let env = env();
        let binary: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        env.store.record_at("blob.bin", 1.0, SnapshotKind::Created, Some(&binary)).unwrap();

        rollback(&env.mirrors, &scope(&env), 1.0, &RollbackOptions::default()).unwrap();
        assert_eq!(fs::read(env.root.join("blob.bin")).unwrap(), binary);
    }

    #[test]
    fn test_cutoff_equal_to_timestamp_is_included() {
        let env = env();
        env.store.record_at("f", 10.0, SnapshotKind::Created, Some(b"at ten")).unwrap();

        rollback(&env.mirrors, &scope(&env), 10.0, &RollbackOptions::default()).unwrap();
        assert_eq!(fs::read_to_string(env.root.join("f")).unwrap(), "at ten");
    }

    #[test]
    fn test_malformed_log_lines_do_not_break_rollback() {
        let env = env();
        env.store.record_at("f", 1.0, SnapshotKind::Created, Some(b"good")).unwrap();
        let mut log = fs::OpenOptions::new().append(true).open(env.store.log_path("f")).unwrap();
        writeln!(log, "{{\"timestamp\": 2.0, \"event\": \"exploded\"}}").unwrap();
        writeln!(log, "\u{0}\u{0}").unwrap();
        drop(log);

        let result = rollback(&env.mirrors, &scope(&env), 3.0, &RollbackOptions::default()).unwrap();
        assert!(result.is_clean());
        assert_eq!(fs::read_to_string(env.root.join("f")).unwrap(), "good");
    }

    #[test]
    fn test_rollback_of_empty_history_is_noop() {
        let env = env();
        fs::write(env.root.join("untracked.txt"), "stays").unwrap();

        let result = rollback(&env.mirrors, &scope(&env), 100.0, &RollbackOptions::default()).unwrap();
        assert_eq!(result.files_restored + result.files_deleted, 0);
        assert!(env.root.join("untracked.txt").exists());
    }

    #[test]
    fn test_restore_replaces_directory_parent_chain() {
        let env = env();
        env.store.record_at("a/b/c/deep.txt", 1.0, SnapshotKind::Created, Some(b"deep")).unwrap();

        let result = rollback(&env.mirrors, &scope(&env), 2.0, &RollbackOptions::default()).unwrap();
        assert_eq!(result.files_restored, 1);
        assert_eq!(fs::read_to_string(env.root.join("a/b/c/deep.txt")).unwrap(), "deep");
    }

    #[test]
    fn test_restore_onto_directory_is_reported() {
        let env = env();
        env.store.record_at("clash", 1.0, SnapshotKind::Created, Some(b"file")).unwrap();
        fs::create_dir_all(env.root.join("clash")).unwrap();

        let result = rollback(&env.mirrors, &scope(&env), 2.0, &RollbackOptions::default()).unwrap();
        assert_eq!(result.errors.len(), 1);
        assert!(env.root.join("clash").is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_is_replaced_not_followed() {
        let env = env();
        let outside = env._temp.path().join("outside.txt");
        fs::write(&outside, "outside").unwrap();
        std::os::unix::fs::symlink(&outside, env.root.join("link")).unwrap();
        env.store.record_at("link", 1.0, SnapshotKind::Created, Some(b"inside")).unwrap();

        rollback(&env.mirrors, &scope(&env), 2.0, &RollbackOptions::default()).unwrap();
        assert_eq!(fs::read_to_string(&outside).unwrap(), "outside");
        assert_eq!(fs::read_to_string(env.root.join("link")).unwrap(), "inside");
        assert!(!fs::symlink_metadata(env.root.join("link")).unwrap().file_type().is_symlink());
    }
}
