//! # bml - BlackMirror command line
//!
//! Track folders, keep their history while watching, and jump back in time.
//!
//! ## Usage
//! ```bash
//! # Track the current directory
//! bml track me
//!
//! # Record changes until Ctrl-C
//! bml watch
//!
//! # Undo the last fifteen minutes below the current directory
//! bml jump-back 15m
//!
//! # Keep at most a week of history and 2 GiB per folder
//! bml prune --max-age 7d --max-size 2G
//! ```

use blackmirror::ignore_rules::{self, Bootstrap, IgnoreRuleSet};
use blackmirror::rollback::{self, RollbackOptions};
use blackmirror::utils::{format_bytes, parse_delta, parse_size};
use blackmirror::{
    ingest, retention, BlackMirrorError, ChangeCapture, IngestOptions, PruneResult, Result,
    SnapshotKind, TrackedRoots, WatchSession,
};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// BlackMirror - a time machine for your folders
#[derive(Parser)]
#[command(name = "bml")]
#[command(author = "Mufeed VH <mufeed@asterisk.so>")]
#[command(version)]
#[command(about = "Record every change to your folders and jump back in time")]
#[command(long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start tracking a folder ("me" for the current directory)
    Track {
        /// Folder to track
        path: String,
    },

    /// Stop tracking a folder (its history is kept)
    Untrack {
        /// Folder to stop tracking
        path: PathBuf,
    },

    /// List tracked folders
    #[command(alias = "ls")]
    List,

    /// Watch every tracked folder and record changes until Ctrl-C
    Watch {
        /// Quiet interval before a changed file is recorded
        #[arg(long)]
        debounce_ms: Option<u64>,
    },

    /// Record a baseline for files without history
    Ingest {
        /// Record every file again, even with existing history
        #[arg(long)]
        force: bool,
    },

    /// Restore files to how they were some time ago
    ///
    /// Stop `bml watch` first: restored files would otherwise be recorded
    /// as new changes.
    #[command(alias = "jb")]
    JumpBack {
        /// How far back, e.g. 30s, 15m, 2h, 1d
        delta: String,

        /// Folder to roll back (defaults to the current directory)
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Relative path prefix to leave untouched (repeatable)
        #[arg(short, long)]
        keep: Vec<String>,

        /// Only touch relative paths matching this glob (repeatable)
        #[arg(short, long)]
        only: Vec<String>,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Drop old history
    Prune {
        /// Drop events older than this, e.g. 7d
        #[arg(long)]
        max_age: Option<String>,

        /// Keep each folder's history under this size, e.g. 500M or 2G
        #[arg(long)]
        max_size: Option<String>,
    },

    /// Show tracked folders and their recorded files
    Status,
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var_os("NO_COLOR").is_some() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red().bold(), e.user_message());
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> Result<()> {
    let mut tracked = TrackedRoots::load_default()?;

    match cli.command {
        Commands::Track { path } => cmd_track(&mut tracked, &path),
        Commands::Untrack { path } => cmd_untrack(&mut tracked, &path),
        Commands::List => cmd_list(&tracked),
        Commands::Watch { debounce_ms } => cmd_watch(&tracked, debounce_ms),
        Commands::Ingest { force } => cmd_ingest(&tracked, force),
        Commands::JumpBack { delta, path, keep, only, yes } => {
            cmd_jump_back(&tracked, &delta, path, keep, only, yes)
        }
        Commands::Prune { max_age, max_size } => cmd_prune(&tracked, max_age, max_size),
        Commands::Status => cmd_status(&tracked),
    }
}

/// Track a folder, bootstrap its ignore file and record a baseline
fn cmd_track(tracked: &mut TrackedRoots, path: &str) -> Result<()> {
    let path = if path == "me" {
        std::env::current_dir()?
    } else {
        PathBuf::from(path)
    };

    let (root, added) = tracked.add(&path)?;
    if !added {
        println!("{} Already tracking {}", "•".yellow(), root.display().to_string().cyan());
        return Ok(());
    }
    println!("{} Tracking {}", "✓".green().bold(), root.display().to_string().cyan());

    let tracked: &TrackedRoots = tracked;
    let rules = prepare_rules(tracked, &root);
    let result = with_spinner("Recording baseline...", || {
        let store = tracked.store_for(&root)?;
        Ok(ingest::ingest(&root, &rules, &store, ingest_options(tracked, false)))
    })?;
    println!("  Baseline: {} files", result.files_recorded.to_string().cyan());
    if result.files_too_large > 0 {
        println!("  Skipped (too large): {}", result.files_too_large.to_string().yellow());
    }
    println!("\nNext: {}", "bml watch".yellow());
    Ok(())
}

fn cmd_untrack(tracked: &mut TrackedRoots, path: &Path) -> Result<()> {
    if tracked.remove(path)? {
        println!("{} No longer tracking {}", "✓".green().bold(), path.display().to_string().cyan());
    } else {
        println!("{} {} was not tracked", "•".yellow(), path.display());
    }
    Ok(())
}

fn cmd_list(tracked: &TrackedRoots) -> Result<()> {
    if tracked.roots().is_empty() {
        println!("{}", "No tracked folders. Use 'bml track <path>' to add one.".yellow());
        return Ok(());
    }
    println!("{}", "Tracked folders:".blue().bold());
    for root in tracked.roots() {
        let marker = if root.is_dir() { "•".green() } else { "✗".red() };
        println!("  {} {}", marker, root.display());
    }
    Ok(())
}

/// Watch every tracked root until Ctrl-C
///
/// Ignore bootstrap may fetch templates over blocking HTTP, so everything
/// before the event loop runs outside the async runtime.
fn cmd_watch(tracked: &TrackedRoots, debounce_ms: Option<u64>) -> Result<()> {
    require_roots(tracked)?;

    let mut options = tracked.capture_options();
    if let Some(ms) = debounce_ms {
        options = options.with_debounce(Duration::from_millis(ms));
    }

    let mut captures = Vec::new();
    for root in tracked.roots() {
        if !root.is_dir() {
            println!("{} Skipping missing folder {}", "!".yellow().bold(), root.display());
            continue;
        }
        let rules = prepare_rules(tracked, root);
        let store = Arc::new(tracked.store_for(root)?);
        let ingested = ingest::ingest(root, &rules, store.as_ref(), ingest_options(tracked, false));
        if ingested.files_recorded > 0 {
            println!("  Recorded baseline for {} new files in {}", ingested.files_recorded, root.display());
        }

        let capture = ChangeCapture::new(root.clone(), rules, store.clone(), options);
        capture.seed_fingerprints(&store)?;
        captures.push(capture);
    }

    if captures.is_empty() {
        return Err(BlackMirrorError::scope("None of the tracked folders exist"));
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let session = WatchSession::start(captures)?;
        println!(
            "{} Watching {} folder(s). Press Ctrl-C to stop.",
            "●".green().bold(),
            session.len()
        );
        session
            .run_until(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Cannot listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                }
            })
            .await;
        Ok::<(), BlackMirrorError>(())
    })?;

    println!("{} Stopped", "✓".green().bold());
    Ok(())
}

fn cmd_ingest(tracked: &TrackedRoots, force: bool) -> Result<()> {
    require_roots(tracked)?;

    for root in tracked.roots() {
        let rules = tracked.rules_for(root);
        let result = with_spinner(&format!("Ingesting {}...", root.display()), || {
            let store = tracked.store_for(root)?;
            Ok(ingest::ingest(root, &rules, &store, ingest_options(tracked, force)))
        })?;
        println!(
            "{} {}: {} recorded, {} already tracked, {} too large, {} errors",
            "✓".green().bold(),
            root.display(),
            result.files_recorded.to_string().cyan(),
            result.files_skipped,
            result.files_too_large,
            result.errors
        );
    }
    Ok(())
}

fn cmd_jump_back(
    tracked: &TrackedRoots,
    delta: &str,
    path: Option<PathBuf>,
    keep: Vec<String>,
    only: Vec<String>,
    yes: bool,
) -> Result<()> {
    let delta = parse_delta(delta)?;
    let target = match path {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let scopes = rollback::resolve_scope(tracked.roots(), &target)?;
    let options = RollbackOptions::default().with_keep(keep).with_only(only);

    let cutoff_at = Local::now() - chrono::Duration::from_std(delta).unwrap_or_else(|_| chrono::Duration::zero());
    println!(
        "{} {} ({} ago)",
        "Rolling back to".blue().bold(),
        cutoff_at.format("%Y-%m-%d %H:%M:%S").to_string().yellow(),
        format_duration(delta)
    );
    for scope in &scopes {
        match &scope.sub_path {
            Some(sub) => println!("  {} (only {})", scope.root.display(), sub.cyan()),
            None => println!("  {}", scope.root.display()),
        }
    }

    if !yes && std::io::stdin().is_terminal() {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt("Overwrite files with their recorded history?")
            .default(false)
            .interact()
            .unwrap_or(false);
        if !confirmed {
            println!("{}", "Aborted".yellow());
            return Ok(());
        }
    }

    let result = with_spinner("Restoring files...", || {
        rollback::jump_back(&tracked.mirrors_dir(), &scopes, delta, &options)
    })?;

    println!("{} Rolled back", "✓".green().bold());
    println!("  Restored: {}", result.files_restored.to_string().cyan());
    println!("  Deleted: {}", result.files_deleted.to_string().cyan());
    if result.paths_kept > 0 {
        println!("  Kept: {}", result.paths_kept);
    }
    if result.paths_skipped > 0 {
        println!("  Skipped (no content): {}", result.paths_skipped);
    }
    println!("  Written: {}", format_bytes(result.bytes_written));
    println!("  Time: {}", format_duration(Duration::from_millis(result.duration_ms)));

    if !result.is_clean() {
        println!("\n{}", "Problems:".red().bold());
        for (path, reason) in &result.errors {
            println!("  {} {}: {}", "✗".red(), path.display(), reason);
        }
    }
    Ok(())
}

fn cmd_prune(tracked: &TrackedRoots, max_age: Option<String>, max_size: Option<String>) -> Result<()> {
    if max_age.is_none() && max_size.is_none() {
        return Err(BlackMirrorError::internal("Specify --max-age, --max-size or both"));
    }
    // Parse everything before touching any store.
    let window = max_age.as_deref().map(parse_delta).transpose()?;
    let budget = max_size.as_deref().map(parse_size).transpose()?;
    require_roots(tracked)?;

    let mut total = PruneResult::default();
    for root in tracked.roots() {
        let store = tracked.store_for(root)?;
        let mut result = PruneResult::default();
        if let Some(window) = window {
            result.merge(&retention::prune_age(&store, window)?);
        }
        if let Some(budget) = budget {
            let by_size = retention::prune_size(&store, budget)?;
            result.logs_deleted += by_size.logs_deleted;
            result.events_removed += by_size.events_removed;
        }
        result.bytes_after = store.total_size()?;
        println!(
            "{} {}: {} events removed, {} logs deleted, {} left",
            "✓".green().bold(),
            root.display(),
            result.events_removed.to_string().cyan(),
            result.logs_deleted,
            format_bytes(result.bytes_after)
        );
        total.merge(&result);
    }

    if tracked.roots().len() > 1 {
        println!("  Total: {} events removed", total.events_removed.to_string().cyan());
    }
    Ok(())
}

fn cmd_status(tracked: &TrackedRoots) -> Result<()> {
    println!("{}", "BlackMirror Status:".blue().bold());
    println!("  Data: {}", tracked.data_dir().display());

    if tracked.roots().is_empty() {
        println!("\n{}", "No tracked folders".yellow());
        return Ok(());
    }

    for root in tracked.roots() {
        let store = tracked.store_for(root)?;
        let logs = store.log_files()?;
        println!("\n{}", root.display().to_string().bold());
        println!(
            "  {} files recorded, {}",
            logs.len().to_string().cyan(),
            format_bytes(logs.iter().map(|log| log.size).sum())
        );

        for log in &logs {
            let Some(event) = store.last_event(&log.rel_path)? else {
                continue;
            };
            let kind = match event.kind {
                SnapshotKind::Created => "created ".green(),
                SnapshotKind::Modified => "modified".yellow(),
                SnapshotKind::Deleted => "deleted ".red(),
            };
            let when = event
                .recorded_at()
                .map(|at| DateTime::<Local>::from(at).format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "?".to_string());
            println!("  {} {} {}", kind, when.dimmed(), log.rel_path);
        }
    }
    Ok(())
}

// Helper functions

fn require_roots(tracked: &TrackedRoots) -> Result<()> {
    if tracked.roots().is_empty() {
        return Err(BlackMirrorError::scope("No folders are tracked"));
    }
    Ok(())
}

fn ingest_options(tracked: &TrackedRoots, force: bool) -> IngestOptions {
    IngestOptions {
        force,
        max_file_size: tracked.settings().max_file_size,
    }
}

/// Make sure the root has an ignore file, then resolve its rules
fn prepare_rules(tracked: &TrackedRoots, root: &Path) -> IgnoreRuleSet {
    match bootstrap_ignore(root) {
        Bootstrap::CopiedForeign => {
            println!("  Created {} from {}", ignore_rules::IGNORE_FILE, ignore_rules::FOREIGN_IGNORE_FILE);
        }
        Bootstrap::FetchedTemplates(languages) => {
            println!("  Created {} for {}", ignore_rules::IGNORE_FILE, languages.join(", "));
        }
        Bootstrap::AlreadyPresent | Bootstrap::Skipped => {}
    }
    tracked.rules_for(root)
}

#[cfg(feature = "templates")]
fn bootstrap_ignore(root: &Path) -> Bootstrap {
    let needs_templates = !root.join(ignore_rules::IGNORE_FILE).exists()
        && !root.join(ignore_rules::FOREIGN_IGNORE_FILE).exists();
    let languages = ignore_rules::sniff_languages(root);

    if needs_templates && !languages.is_empty() && std::io::stdin().is_terminal() {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!(
                "No ignore file in {}. Download templates for {}?",
                root.display(),
                languages.join(", ")
            ))
            .default(true)
            .interact()
            .unwrap_or(false);
        if confirmed {
            let templates = ignore_rules::GithubTemplates::new();
            return ignore_rules::bootstrap(root, Some(&templates));
        }
    }
    ignore_rules::bootstrap(root, None)
}

#[cfg(not(feature = "templates"))]
fn bootstrap_ignore(root: &Path) -> Bootstrap {
    ignore_rules::bootstrap(root, None)
}

/// Run `work` behind a spinner when attached to a terminal
fn with_spinner<T>(message: &str, work: impl FnOnce() -> Result<T>) -> Result<T> {
    if !std::io::stderr().is_terminal() {
        return work();
    }

    let start = Instant::now();
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));

    let result = work();
    pb.finish_and_clear();
    tracing::debug!("{} took {}", message, format_duration(start.elapsed()));
    result
}
