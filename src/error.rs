//! Error types for the BlackMirror library
//!
//! This module defines all error types that can occur during BlackMirror
//! operations. Errors fall into two groups: precondition errors (bad input,
//! unresolvable scope) which abort an operation before anything is touched,
//! and per-path errors which are logged and collected while the rest of the
//! operation continues.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the BlackMirror library
pub type Result<T> = std::result::Result<T, BlackMirrorError>;

/// Main error type for all BlackMirror operations
#[derive(Debug, Error)]
pub enum BlackMirrorError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Walk directory error from walkdir crate
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// Error raised by the filesystem notification backend
    #[error("Watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// Rollback target does not resolve to any tracked root
    #[error("Scope error: {0}")]
    Scope(String),

    /// A log line could not be decoded
    #[error("Malformed record at line {line}: {reason}")]
    MalformedRecord {
        /// One-based line number within the log file
        line: usize,
        /// What was wrong with the line
        reason: String,
    },

    /// File too large for the configured ceiling
    #[error("File too large: {path:?} ({size} bytes exceeds limit of {limit} bytes)")]
    FileTooLarge {
        /// Path to the file
        path: PathBuf,
        /// Actual file size
        size: u64,
        /// Configured size limit
        limit: u64,
    },

    /// Unparseable time delta such as `"10x"`
    #[error("Invalid time delta: {0}")]
    InvalidDelta(String),

    /// Unparseable size such as `"12MB"`
    #[error("Invalid size: {0}")]
    InvalidSize(String),

    /// Glob pattern could not be compiled
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    /// Tracking the path would nest two tracked roots
    #[error("{path:?} {relation} {existing:?}")]
    NestedRoot {
        /// Path the user asked to track
        path: PathBuf,
        /// Already tracked root it conflicts with
        existing: PathBuf,
        /// How the two paths relate, phrased to sit between them
        relation: &'static str,
    },

    /// Expected a directory
    #[error("Not a directory: {0:?}")]
    NotADirectory(PathBuf),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BlackMirrorError {
    /// Create a scope error with a custom message
    pub fn scope(msg: impl Into<String>) -> Self {
        BlackMirrorError::Scope(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        BlackMirrorError::Internal(msg.into())
    }

    /// Check whether this error is local to a single path
    ///
    /// Path-local errors are skipped and reported; everything else aborts
    /// the operation that raised it.
    pub fn is_path_local(&self) -> bool {
        matches!(
            self,
            BlackMirrorError::Io(_)
                | BlackMirrorError::MalformedRecord { .. }
                | BlackMirrorError::FileTooLarge { .. }
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            BlackMirrorError::Scope(msg) => {
                format!("{}. Use 'bml list' to see tracked folders or 'bml track <path>' to add one.", msg)
            }
            BlackMirrorError::InvalidDelta(delta) => {
                format!("Invalid time delta '{}'. Use forms like 30s, 15m, 2h or 1d.", delta)
            }
            BlackMirrorError::InvalidSize(size) => {
                format!("Invalid size '{}'. Use a byte count optionally suffixed with K, M, G or T.", size)
            }
            BlackMirrorError::NestedRoot { path, existing, relation } => {
                format!(
                    "Cannot track {}: it {} {}. Tracked folders must not be nested.",
                    path.display(),
                    relation,
                    existing.display()
                )
            }
            _ => self.to_string(),
        }
    }
}
