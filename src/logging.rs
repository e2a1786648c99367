//! Logging for the two extension-manager roles.
//!
//! The manager and every extension run as separate processes, so each role
//! writes its own file under `~/.corvid/logs/`, named by role, start time,
//! and pid. The watchers emit a probe record every heartbeat; those targets
//! stay quiet unless verbose logging is requested. Stale files are pruned
//! at startup by age and by count.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::corvid_dir;

/// Hours a log file is kept before pruning.
pub const DEFAULT_LOG_RETENTION_HOURS: u32 = 24;

/// Upper bound on log files kept per directory, newest first.
pub const DEFAULT_MAX_LOG_FILES: usize = 16;

/// Which half of the codebase this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRole {
    /// Host process owning the primary endpoint.
    Manager,
    /// Auxiliary extension process.
    Extension,
}

impl LogRole {
    /// File-name prefix for this role.
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            LogRole::Manager => "manager",
            LogRole::Extension => "extension",
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level (trace, debug, info, warn, error).
    pub level: String,
    /// Surfaces watcher heartbeats and autoload diagnostics.
    pub verbose: bool,
    /// Hours to keep log files.
    pub retention_hours: u32,
    /// Bound on files kept; the oldest go first.
    pub max_files: usize,
    /// Mirror records to stderr, for extensions run by hand.
    pub stderr: bool,
    /// Whether logging is enabled at all.
    pub enabled: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            verbose: false,
            retention_hours: DEFAULT_LOG_RETENTION_HOURS,
            max_files: DEFAULT_MAX_LOG_FILES,
            stderr: false,
            enabled: true,
        }
    }
}

/// Returns the log directory path (`~/.corvid/logs/`).
#[must_use]
pub fn log_directory() -> PathBuf {
    corvid_dir().join("logs")
}

/// Log file path for a role: `<role>-<start time>.<pid>.log`.
///
/// The pid keeps concurrently-started extension processes from clobbering
/// each other's files; the manager and its extensions share one directory.
#[must_use]
pub fn role_log_path(role: LogRole) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let filename = format!("{}-{}.{}.log", role.prefix(), stamp, std::process::id());
    log_directory().join(filename)
}

/// Directive string behind the filter: the configured base level, with the
/// per-tick watcher probes and autoload diagnostics raised when verbose.
fn filter_spec(config: &LogConfig) -> String {
    let mut spec = config.level.clone();
    if config.verbose {
        spec.push_str(",corvid::watcher=trace,corvid::autoload=debug,corvid::endpoint=debug");
    }
    spec
}

/// Builds the record filter; the environment wins outright.
fn log_filter(config: &LogConfig) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::new(filter_spec(config))
}

/// Prunes log files in `dir`: anything older than the retention period
/// goes, then the oldest survivors beyond `max_files`.
///
/// # Errors
/// Returns an error if the directory cannot be read.
pub fn prune_logs(dir: &Path, retention_hours: u32, max_files: usize) -> io::Result<u32> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut logs: Vec<(PathBuf, SystemTime)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        logs.push((path, modified));
    }

    let retention = Duration::from_secs(u64::from(retention_hours) * 3600);
    let now = SystemTime::now();
    let mut pruned = 0;

    // Newest first; the tail is expired or over the file budget.
    logs.sort_by(|a, b| b.1.cmp(&a.1));
    for (index, (path, modified)) in logs.iter().enumerate() {
        let expired = now
            .duration_since(*modified)
            .map(|age| age > retention)
            .unwrap_or(false);
        if (expired || index >= max_files) && fs::remove_file(path).is_ok() {
            pruned += 1;
        }
    }

    Ok(pruned)
}

/// Initializes logging for one role; returns the file being written, or
/// `None` when logging is disabled.
///
/// # Errors
/// Returns an error if the log directory or file cannot be created.
pub fn init(role: LogRole, config: &LogConfig) -> io::Result<Option<PathBuf>> {
    if !config.enabled {
        return Ok(None);
    }

    let log_dir = log_directory();
    fs::create_dir_all(&log_dir)?;
    let pruned = prune_logs(&log_dir, config.retention_hours, config.max_files)?;

    let log_path = role_log_path(role);
    let log_file = fs::File::create(&log_path)?;

    let file_layer = fmt::layer().compact().with_ansi(false).with_writer(log_file);
    let stderr_layer = config.stderr.then(|| fmt::layer().with_writer(io::stderr));

    tracing_subscriber::registry()
        .with(log_filter(config))
        .with(file_layer)
        .with(stderr_layer)
        .init();

    tracing::info!("Logging as {} role to {}", role.prefix(), log_path.display());
    if pruned > 0 {
        tracing::debug!("Pruned {} old log file(s)", pruned);
    }
    Ok(Some(log_path))
}
