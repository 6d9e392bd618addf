//! Utility functions for BlackMirror
//!
//! Hashing, log file name encoding, relative path handling, atomic writes and
//! parsing of the human-readable sizes and deltas accepted by the CLI.
//!
//! ## Log file names
//!
//! A relative path is the identity of a file's history, so the name of its log
//! must decode back to exactly the same string. Every byte outside
//! `[A-Za-z0-9._~-]` is percent-escaped, including `/` and `%` itself:
//!
//! ```rust
//! use blackmirror::utils::{encode_rel_path, decode_rel_path};
//!
//! let encoded = encode_rel_path("src/100%_done.txt");
//! assert_eq!(encoded, "src%2F100%25_done.txt");
//! assert_eq!(decode_rel_path(&encoded).as_deref(), Some("src/100%_done.txt"));
//! ```

use crate::error::{BlackMirrorError, Result};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::trace;

/// Bytes left unescaped in log file names
const LOG_NAME_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'.').remove(b'_').remove(b'-').remove(b'~');

/// Hash arbitrary data using SHA-256
///
/// Returns the digest as a 64-character hexadecimal string. Used as the
/// content fingerprint by the capture pipeline.
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Current time as seconds since the Unix epoch
pub fn now_timestamp() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}

/// Encode a relative path into a log file stem
pub fn encode_rel_path(rel: &str) -> String {
    utf8_percent_encode(rel, LOG_NAME_SET).to_string()
}

/// Decode a log file stem back into the relative path
///
/// Returns `None` when the stem does not decode to valid UTF-8.
pub fn decode_rel_path(stem: &str) -> Option<String> {
    percent_decode_str(stem)
        .decode_utf8()
        .ok()
        .map(|cow| cow.into_owned())
}

/// Turn a relative `Path` into the `/`-separated identity string
///
/// Returns `None` for empty paths, paths escaping their base (`..`), absolute
/// paths and non UTF-8 names.
pub fn rel_path_string(path: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Make `path` relative to `base` and return its identity string
///
/// Tries a lexical strip first so symlinked paths keep their own identity,
/// then falls back to canonicalized paths.
pub fn relative_to(path: &Path, base: &Path) -> Option<String> {
    if let Ok(relative) = path.strip_prefix(base) {
        return rel_path_string(relative);
    }

    let path_canon = path.canonicalize().ok()?;
    let base_canon = base.canonicalize().ok()?;
    path_canon
        .strip_prefix(&base_canon)
        .ok()
        .and_then(rel_path_string)
}

/// Whether `rel` is already in identity form and stays below its base
///
/// Names decoded from a store are checked with this before being joined
/// onto a root.
pub fn is_safe_rel_path(rel: &str) -> bool {
    rel_path_string(Path::new(rel)).as_deref() == Some(rel)
}

/// Absolute, canonical form of `path`, even when its tail does not exist
///
/// Relative paths start from the current directory and `..` is resolved
/// lexically. The deepest existing ancestor is canonicalized and the missing
/// components are appended to it again.
pub fn absolutize(path: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }

    let mut missing = Vec::new();
    let mut existing = normalized.as_path();
    let base = loop {
        match existing.canonicalize() {
            Ok(canonical) => break canonical,
            Err(e) => match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    missing.push(name.to_os_string());
                    existing = parent;
                }
                _ => return Err(e.into()),
            },
        }
    };

    Ok(missing.into_iter().rev().fold(base, |path, name| path.join(name)))
}

/// Whether `rel` equals `prefix` or lies underneath it
pub fn is_under_prefix(rel: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        return true;
    }
    rel == prefix
        || (rel.len() > prefix.len()
            && rel.starts_with(prefix)
            && rel.as_bytes()[prefix.len()] == b'/')
}

/// Atomic file write (write to temp file then rename)
///
/// The target is either fully written or left as it was.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");

    fs::write(&temp_path, content)?;
    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }

    trace!("Atomically wrote {:?}", path);
    Ok(())
}

/// Format bytes in human-readable form
///
/// ```rust
/// use blackmirror::utils::format_bytes;
///
/// assert_eq!(format_bytes(1023), "1023 B");
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Parse a size such as `500`, `10K`, `2M`, `3G` or `1T` into bytes
///
/// Suffixes are 1024-based and case-insensitive. Anything else, including
/// two-letter suffixes like `MB`, is rejected.
pub fn parse_size(input: &str) -> Result<u64> {
    let invalid = || BlackMirrorError::InvalidSize(input.to_string());
    let trimmed = input.trim();

    let (digits, multiplier) = match trimmed.chars().last() {
        Some(c) if c.is_ascii_digit() => (trimmed, 1u64),
        Some(c) => {
            let multiplier = match c.to_ascii_uppercase() {
                'K' => 1u64 << 10,
                'M' => 1u64 << 20,
                'G' => 1u64 << 30,
                'T' => 1u64 << 40,
                _ => return Err(invalid()),
            };
            (&trimmed[..trimmed.len() - c.len_utf8()], multiplier)
        }
        None => return Err(invalid()),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(invalid)
}

/// Parse a time delta such as `30s`, `15m`, `2h` or `1d`
///
/// Bare numbers are rejected so that `jump-back 5` cannot silently mean
/// five seconds.
pub fn parse_delta(input: &str) -> Result<Duration> {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(BlackMirrorError::InvalidDelta(input.to_string()));
    }
    humantime::parse_duration(trimmed).map_err(|_| BlackMirrorError::InvalidDelta(input.to_string()))
}
