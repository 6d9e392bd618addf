//! Ignore-rule resolution
//!
//! Computes which relative paths of a tracked root are never recorded. The
//! effective rule set starts from built-in defaults (version control
//! metadata, secrets, dependency and cache directories) and is extended by
//! every `.bmlignore` and `.gitignore` found in the tree.
//!
//! ## Matching
//!
//! A relative path is ignored when it equals a pattern, glob-matches it, or
//! one of its ancestor directories does. Patterns without a `/` also match
//! any single path component, so `node_modules` hides `web/node_modules/x`.
//!
//! ```text
//! # .bmlignore
//! *.log
//! build/
//! docs/generated
//! ```
//!
//! Patterns read from `sub/.bmlignore` are added twice: qualified as
//! `sub/<pattern>` and as written.
//!
//! Negation (`!pattern`) is not supported; such lines are skipped.

use crate::utils;
use globset::{GlobBuilder, GlobMatcher};
use std::fs;
use std::path::Path;
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

/// The tool's own ignore file
pub const IGNORE_FILE: &str = ".bmlignore";

/// Foreign ignore file also honored
pub const FOREIGN_IGNORE_FILE: &str = ".gitignore";

/// Patterns every rule set starts from
pub const DEFAULT_PATTERNS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".env",
    ".env.*",
    "*.pem",
    "*.key",
    IGNORE_FILE,
    "node_modules",
    "__pycache__",
    ".venv",
    "venv",
    "target",
    ".mypy_cache",
    ".pytest_cache",
    ".tox",
    ".cache",
    ".DS_Store",
];

#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    matcher: Option<GlobMatcher>,
    per_component: bool,
}

impl Rule {
    fn new(pattern: String) -> Self {
        let matcher = match GlobBuilder::new(&pattern).literal_separator(true).build() {
            Ok(glob) => Some(glob.compile_matcher()),
            Err(e) => {
                warn!("Invalid ignore pattern '{}', matching literally: {}", pattern, e);
                None
            }
        };
        let per_component = !pattern.contains('/');
        Self { pattern, matcher, per_component }
    }

    fn matches(&self, candidate: &str) -> bool {
        candidate == self.pattern
            || self
                .matcher
                .as_ref()
                .map(|m| m.is_match(candidate))
                .unwrap_or(false)
    }
}

/// Ordered set of exclusion patterns for one tracked root
#[derive(Debug, Clone, Default)]
pub struct IgnoreRuleSet {
    rules: Vec<Rule>,
    excluded: Vec<String>,
}

impl IgnoreRuleSet {
    /// An empty rule set that ignores nothing
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in defaults only
    pub fn defaults() -> Self {
        Self::from_patterns(DEFAULT_PATTERNS.iter().copied())
    }

    /// Rule set made of exactly `patterns`
    pub fn from_patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::empty();
        for pattern in patterns {
            set.add(pattern);
        }
        set
    }

    /// Append a pattern; duplicates are dropped
    pub fn add(&mut self, pattern: impl Into<String>) {
        let pattern = pattern.into();
        let pattern = pattern.trim().trim_matches('/').to_string();
        if pattern.is_empty() || self.rules.iter().any(|r| r.pattern == pattern) {
            return;
        }
        self.rules.push(Rule::new(pattern));
    }

    /// Exclude everything at or below the relative path `rel_prefix`
    ///
    /// Unlike patterns, exclusions are literal prefixes and never glob.
    pub fn exclude(&mut self, rel_prefix: impl Into<String>) {
        let prefix = rel_prefix.into().trim_matches('/').to_string();
        if !prefix.is_empty() && !self.excluded.contains(&prefix) {
            debug!("Excluding {} from recording", prefix);
            self.excluded.push(prefix);
        }
    }

    /// The patterns in insertion order
    pub fn patterns(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.pattern.as_str()).collect()
    }

    /// Number of patterns
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the set has no patterns
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether the relative path (`/`-separated) is excluded
    pub fn is_ignored(&self, rel: &str) -> bool {
        let rel = rel.trim_matches('/');
        if rel.is_empty() {
            return false;
        }
        if self.excluded.iter().any(|prefix| utils::is_under_prefix(rel, prefix)) {
            return true;
        }

        // Ancestor prefixes first, ending with the full path.
        let mut prefixes = rel
            .match_indices('/')
            .map(|(idx, _)| &rel[..idx])
            .collect::<Vec<_>>();
        prefixes.push(rel);

        self.rules.iter().any(|rule| {
            if rule.per_component && rel.split('/').any(|part| rule.matches(part)) {
                return true;
            }
            prefixes.iter().any(|prefix| rule.matches(prefix))
        })
    }

    /// Whether an absolute path under `root` is excluded
    ///
    /// Paths outside `root` count as ignored.
    pub fn is_path_ignored(&self, root: &Path, path: &Path) -> bool {
        match utils::relative_to(path, root) {
            Some(rel) => self.is_ignored(&rel),
            None => true,
        }
    }

    /// Add the patterns of an ignore file found in directory `dir_rel`
    ///
    /// `dir_rel` is the directory's relative path, empty for the root.
    pub fn add_ignore_file(&mut self, dir_rel: &str, content: &str) {
        for pattern in parse_ignore_file(content) {
            if !dir_rel.is_empty() {
                self.add(format!("{}/{}", dir_rel, pattern));
            }
            self.add(pattern);
        }
    }
}

/// Patterns of an ignore file: one per non-empty, non-comment line
pub fn parse_ignore_file(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| {
            if line.starts_with('!') {
                debug!("Negated ignore pattern not supported, skipping: {}", line);
                false
            } else {
                true
            }
        })
        .map(|line| line.trim_matches('/').to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Compute the effective rule set for `root`
///
/// Walks the tree, skipping directories that are already ignored, and folds
/// in every ignore file encountered. Unreadable entries are logged and
/// skipped; resolution itself never fails.
pub fn resolve(root: &Path) -> IgnoreRuleSet {
    resolve_from(root, IgnoreRuleSet::defaults())
}

/// Like [`resolve`], starting from `rules` instead of the defaults
///
/// Exclusions already in `rules` prune the walk.
pub fn resolve_from(root: &Path, mut rules: IgnoreRuleSet) -> IgnoreRuleSet {

    // Root-level files first so they can prune the walk below.
    for name in [IGNORE_FILE, FOREIGN_IGNORE_FILE] {
        if let Ok(content) = fs::read_to_string(root.join(name)) {
            rules.add_ignore_file("", &content);
        }
    }

    let mut walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter();

    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Walk error while resolving ignore rules: {}", e);
                continue;
            }
        };

        let Some(rel) = utils::relative_to(entry.path(), root) else {
            continue;
        };

        if entry.file_type().is_dir() {
            if rules.is_ignored(&rel) {
                trace!("Pruning ignored directory {}", rel);
                walker.skip_current_dir();
            }
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if entry.depth() > 1 && (name == IGNORE_FILE || name == FOREIGN_IGNORE_FILE) {
            let dir_rel = rel.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
            match fs::read_to_string(entry.path()) {
                Ok(content) => {
                    debug!("Reading ignore file {}", rel);
                    rules.add_ignore_file(dir_rel, &content);
                }
                Err(e) => warn!("Cannot read ignore file {}: {}", rel, e),
            }
        }
    }

    debug!("Resolved {} ignore patterns for {:?}", rules.len(), root);
    rules
}

/// Source of language-specific ignore templates
///
/// Injected into [`bootstrap`]; the core runs without one.
pub trait TemplateSource {
    /// Template content for a language name such as `"Python"`
    fn fetch(&self, language: &str) -> anyhow::Result<String>;
}

/// What [`bootstrap`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bootstrap {
    /// The root already had its own ignore file
    AlreadyPresent,
    /// A root-level `.gitignore` was copied
    CopiedForeign,
    /// Templates for these languages were fetched and written
    FetchedTemplates(Vec<String>),
    /// Nothing was written
    Skipped,
}

/// Make sure `root` has an ignore file, best effort
///
/// Copies a root-level `.gitignore` when there is one; otherwise, given a
/// template source, writes templates for the languages sniffed from the
/// top-level file extensions. Errors are logged and swallowed.
pub fn bootstrap(root: &Path, templates: Option<&dyn TemplateSource>) -> Bootstrap {
    let own = root.join(IGNORE_FILE);
    if own.exists() {
        return Bootstrap::AlreadyPresent;
    }

    let foreign = root.join(FOREIGN_IGNORE_FILE);
    if foreign.is_file() {
        return match fs::copy(&foreign, &own) {
            Ok(_) => {
                info!("Created {} from {}", IGNORE_FILE, FOREIGN_IGNORE_FILE);
                Bootstrap::CopiedForeign
            }
            Err(e) => {
                warn!("Could not copy {} to {}: {}", FOREIGN_IGNORE_FILE, IGNORE_FILE, e);
                Bootstrap::Skipped
            }
        };
    }

    let Some(source) = templates else {
        return Bootstrap::Skipped;
    };

    let mut content = String::new();
    let mut fetched = Vec::new();
    for language in sniff_languages(root) {
        match source.fetch(language) {
            Ok(template) => {
                content.push_str(&format!("# {}\n{}\n", language, template.trim_end()));
                fetched.push(language.to_string());
            }
            Err(e) => warn!("Could not fetch ignore template for {}: {}", language, e),
        }
    }

    if fetched.is_empty() {
        return Bootstrap::Skipped;
    }

    match fs::write(&own, content) {
        Ok(()) => {
            info!("Created {} from templates: {}", IGNORE_FILE, fetched.join(", "));
            Bootstrap::FetchedTemplates(fetched)
        }
        Err(e) => {
            warn!("Could not write {}: {}", IGNORE_FILE, e);
            Bootstrap::Skipped
        }
    }
}

/// Template names for the languages found among the top-level files
pub fn sniff_languages(root: &Path) -> Vec<&'static str> {
    let mut languages = Vec::new();
    let Ok(entries) = fs::read_dir(root) else {
        return languages;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let language = match ext.as_deref() {
            Some("py") => "Python",
            Some("rs") => "Rust",
            Some("js" | "jsx" | "ts" | "tsx" | "mjs") => "Node",
            Some("go") => "Go",
            Some("java" | "kt") => "Java",
            Some("rb") => "Ruby",
            Some("c" | "h") => "C",
            Some("cpp" | "cc" | "hpp") => "C++",
            Some("swift") => "Swift",
            Some("php") => "Composer",
            _ => continue,
        };
        if !languages.contains(&language) {
            languages.push(language);
        }
    }

    languages.sort_unstable();
    languages
}

/// Templates from the `github/gitignore` repository
#[cfg(feature = "templates")]
pub struct GithubTemplates {
    client: reqwest::blocking::Client,
    base_url: String,
}

#[cfg(feature = "templates")]
impl GithubTemplates {
    /// Client for the public template repository
    pub fn new() -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            base_url: "https://raw.githubusercontent.com/github/gitignore/main".to_string(),
        }
    }
}

#[cfg(feature = "templates")]
impl Default for GithubTemplates {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "templates")]
impl TemplateSource for GithubTemplates {
    fn fetch(&self, language: &str) -> anyhow::Result<String> {
        let url = format!("{}/{}.gitignore", self.base_url, language);
        let text = self
            .client
            .get(&url)
            .timeout(std::time::Duration::from_secs(10))
            .send()?
            .error_for_status()?
            .text()?;
        Ok(text)
    }
}
