//! Tracked roots and settings
//!
//! Everything BlackMirror persists lives under one data directory:
//!
//! ```text
//! <data dir>/
//! ├── config.json     # {"paths": [...], "debounce_ms": 500, "max_file_size": 104857600}
//! └── mirrors/        # one snapshot store namespace per tracked root
//! ```
//!
//! The data directory is `$BML_HOME` when set, otherwise
//! `%LOCALAPPDATA%\blackmirror` on Windows and `~/.blackmirror` elsewhere.
//!
//! Tracked roots are absolute, canonical and never nested inside one
//! another. Config writes are atomic.

use crate::capture::{CaptureOptions, DEFAULT_DEBOUNCE_MS, DEFAULT_MAX_FILE_SIZE};
use crate::error::{BlackMirrorError, Result};
use crate::ignore_rules::{self, IgnoreRuleSet};
use crate::store::SnapshotStore;
use crate::utils;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Environment variable overriding the data directory
pub const HOME_ENV: &str = "BML_HOME";

/// Name of the config file inside the data directory
pub const CONFIG_FILE: &str = "config.json";

/// Name of the directory holding every store namespace
pub const MIRRORS_DIR: &str = "mirrors";

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

/// Contents of `config.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Tracked roots, absolute and canonical
    #[serde(default)]
    pub paths: Vec<PathBuf>,
    /// Debounce interval for the watcher in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Size ceiling for recorded files in bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

/// Resolve the data directory from the environment
pub fn data_dir() -> Result<PathBuf> {
    if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(home));
    }

    let base = if cfg!(windows) {
        dirs::data_local_dir().map(|dir| dir.join("blackmirror"))
    } else {
        dirs::home_dir().map(|dir| dir.join(".blackmirror"))
    };
    base.ok_or_else(|| BlackMirrorError::internal("Cannot determine a home directory; set BML_HOME"))
}

/// The persisted set of tracked roots plus settings
#[derive(Debug, Clone)]
pub struct TrackedRoots {
    data_dir: PathBuf,
    settings: Settings,
}

impl TrackedRoots {
    /// Load the config from `data_dir`, creating the directory if needed
    ///
    /// A missing config is an empty one. A corrupt config is logged and
    /// treated as empty; it is only replaced on the next save.
    pub fn load(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;

        let config_path = data_dir.join(CONFIG_FILE);
        let settings = match fs::read(&config_path) {
            Ok(bytes) => match serde_json::from_slice::<Settings>(&bytes) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!("Ignoring unreadable config {:?}: {}", config_path, e);
                    Settings::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Settings::default(),
            Err(e) => {
                warn!("Cannot read config {:?}: {}", config_path, e);
                Settings::default()
            }
        };

        debug!("Loaded {} tracked roots from {:?}", settings.paths.len(), config_path);
        Ok(Self { data_dir, settings })
    }

    /// Load from the directory named by [`data_dir`]
    pub fn load_default() -> Result<Self> {
        Self::load(data_dir()?)
    }

    /// The data directory
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Where every store namespace lives
    pub fn mirrors_dir(&self) -> PathBuf {
        self.data_dir.join(MIRRORS_DIR)
    }

    /// Location of `config.json`
    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE)
    }

    /// Tracked roots in insertion order
    pub fn roots(&self) -> &[PathBuf] {
        &self.settings.paths
    }

    /// Current settings
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Capture tuning derived from the settings
    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions::default()
            .with_debounce(Duration::from_millis(self.settings.debounce_ms))
            .with_max_file_size(self.settings.max_file_size)
    }

    /// Open the store namespace of `root`
    pub fn store_for(&self, root: &Path) -> Result<SnapshotStore> {
        SnapshotStore::for_root(&self.mirrors_dir(), root)
    }

    /// Effective ignore rules for `root`
    ///
    /// When the data directory lives inside `root` it is excluded, so the
    /// history never records its own logs.
    pub fn rules_for(&self, root: &Path) -> IgnoreRuleSet {
        let mut rules = IgnoreRuleSet::defaults();
        if let Some(rel) = utils::relative_to(&self.data_dir, root) {
            rules.exclude(rel);
        }
        ignore_rules::resolve_from(root, rules)
    }

    /// Start tracking a directory
    ///
    /// Returns the canonical root and whether it was newly added; tracking
    /// an already tracked root is a no-op. Fails without saving when the
    /// directory would nest with an existing root in either direction.
    pub fn add(&mut self, path: &Path) -> Result<(PathBuf, bool)> {
        let root = path.canonicalize()?;
        if !root.is_dir() {
            return Err(BlackMirrorError::NotADirectory(root));
        }

        for existing in &self.settings.paths {
            if *existing == root {
                debug!("{:?} is already tracked", root);
                return Ok((root, false));
            }
            if root.starts_with(existing) {
                return Err(BlackMirrorError::NestedRoot {
                    path: root,
                    existing: existing.clone(),
                    relation: "is already under tracked folder",
                });
            }
            if existing.starts_with(&root) {
                return Err(BlackMirrorError::NestedRoot {
                    path: root,
                    existing: existing.clone(),
                    relation: "has a tracked folder nested under it:",
                });
            }
        }

        self.settings.paths.push(root.clone());
        self.save()?;
        info!("Now tracking {:?}", root);
        Ok((root, true))
    }

    /// Stop tracking a directory; its history is kept
    ///
    /// Returns whether anything was removed.
    pub fn remove(&mut self, path: &Path) -> Result<bool> {
        let root = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let before = self.settings.paths.len();
        self.settings.paths.retain(|p| *p != root);
        if self.settings.paths.len() == before {
            return Ok(false);
        }
        self.save()?;
        info!("Stopped tracking {:?}", root);
        Ok(true)
    }

    /// Write `config.json` atomically
    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_vec_pretty(&self.settings)?;
        utils::atomic_write(&self.config_path(), &json)
    }
}
