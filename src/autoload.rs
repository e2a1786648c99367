//! Autoload discovery.
//!
//! Autoload files are plain text, one binary path per line; `#` and `;`
//! open comments. Each surviving entry passes through the safety filter
//! before it is handed to the process supervisor.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::ExtensionsConfig;
use crate::error::ExtensionError;
use crate::fsutil;

/// What an autoload entry is expected to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryKind {
    /// Standalone extension process.
    Extension,
    /// Loadable registry module.
    Module,
}

impl BinaryKind {
    /// Platform suffix required of this kind.
    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            #[cfg(windows)]
            BinaryKind::Extension => "exe",
            #[cfg(not(windows))]
            BinaryKind::Extension => "ext",
            #[cfg(windows)]
            BinaryKind::Module => "dll",
            #[cfg(target_os = "macos")]
            BinaryKind::Module => "dylib",
            #[cfg(not(any(windows, target_os = "macos")))]
            BinaryKind::Module => "so",
        }
    }

    /// Label used in diagnostics.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            BinaryKind::Extension => "extension",
            BinaryKind::Module => "module",
        }
    }
}

/// Applies the safety filter to one autoload entry.
///
/// Returns the sanitized path when the entry survives: non-comment,
/// non-directory, safe permissions on the file and its parent, and the
/// kind-specific suffix.
#[must_use]
pub fn is_file_safe(entry: &str, kind: BinaryKind) -> Option<PathBuf> {
    let trimmed = entry.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
        return None;
    }

    let path = PathBuf::from(trimmed);
    let label = kind.label();

    if path.is_dir() {
        debug!("Cannot autoload {} from directory: {}", label, path.display());
        return None;
    }

    let parent = path
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    if !fsutil::safe_permissions(&parent, &path) {
        warn!(
            "Will not autoload {} with unsafe directory permissions: {}",
            label,
            path.display()
        );
        return None;
    }

    if path.extension().and_then(|e| e.to_str()) != Some(kind.suffix()) {
        warn!(
            "Will not autoload {} not ending in '.{}': {}",
            label,
            kind.suffix(),
            path.display()
        );
        return None;
    }

    debug!("Found autoloadable {}: {}", label, path.display());
    Some(path)
}

/// Discovers extension binaries to spawn and hands them to `sink`.
///
/// The shell-only single-extension override is added first, unconditionally
/// and unfiltered. The call succeeds as long as the list file itself was
/// readable; unsafe entries are skipped with a warning.
pub fn load_extensions(
    config: &ExtensionsConfig,
    sink: &mut dyn FnMut(PathBuf),
) -> Result<(), ExtensionError> {
    if !config.extension.is_empty() {
        sink(PathBuf::from(&config.extension));
    }

    let loadfile = &config.extensions_autoload;
    let contents = std::fs::read_to_string(loadfile)
        .map_err(|_| ExtensionError::ReadFailed(loadfile.clone()))?;

    for line in contents.lines() {
        if let Some(path) = is_file_safe(line, BinaryKind::Extension) {
            sink(path);
        }
    }
    Ok(())
}

/// Discovers loadable modules and hands them to `sink`.
///
/// Returns an aggregate failure when any candidate fails the safety
/// filter. Module loading is unsupported on Windows.
pub fn load_modules(
    config: &ExtensionsConfig,
    sink: &mut dyn FnMut(PathBuf),
) -> Result<(), ExtensionError> {
    if cfg!(windows) {
        debug!("Loadable modules are not supported on this platform");
        return Ok(());
    }

    let loadfile = &config.modules_autoload;
    let contents = std::fs::read_to_string(loadfile)
        .map_err(|_| ExtensionError::ReadFailed(loadfile.clone()))?;

    let mut all_loaded = true;
    for line in contents.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }
        match is_file_safe(trimmed, BinaryKind::Module) {
            Some(path) => sink(path),
            None => all_loaded = false,
        }
    }

    if all_loaded {
        Ok(())
    } else {
        Err(ExtensionError::UnsafeCandidate(loadfile.clone()))
    }
}
