//! Extension-manager configuration.
//!
//! All runtime flags live in one [`ExtensionsConfig`] bundle. The host's
//! flag parser fills it in via [`ExtensionsConfig::set`] and the bundle is
//! frozen afterwards; services receive it by value or borrow, never through
//! globals. Extension binaries use shortened flag names (`socket`,
//! `timeout`, `interval`) which [`canonical_flag`] maps back to the long
//! forms.

use std::path::PathBuf;

/// Platform prefix every named-pipe path must start with.
#[cfg(windows)]
pub const SOCKET_PREFIX: &str = r"\\.\pipe\";

/// Version the host reports for itself in extension listings.
pub const HOST_VERSION: &str = env!("CARGO_PKG_VERSION");

/// SDK version compiled into this crate.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit code an extension uses when a reachable manager fails its ping.
pub const DEFAULT_FATAL_CODE: i32 = 1;

/// Returns the corvid data directory (`~/.corvid`).
#[must_use]
pub fn corvid_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".corvid")
}

/// Default manager endpoint path.
#[cfg(unix)]
#[must_use]
pub fn default_socket_path() -> String {
    dirs::runtime_dir()
        .or_else(|| std::env::var_os("TMPDIR").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("corvid.em")
        .to_string_lossy()
        .into_owned()
}

/// Default manager endpoint path.
#[cfg(windows)]
#[must_use]
pub fn default_socket_path() -> String {
    format!("{SOCKET_PREFIX}corvid.em")
}

/// Maps the shortened flag names exposed to extension binaries onto the
/// canonical long names.
#[must_use]
pub fn canonical_flag(name: &str) -> &str {
    match name {
        "socket" => "extensions_socket",
        "timeout" => "extensions_timeout",
        "interval" => "extensions_interval",
        other => other,
    }
}

/// Runtime flags relevant to the extension manager.
///
/// `extensions_timeout` and `extensions_interval` are kept as strings to
/// match the flag surface; consumers coerce through [`parse_seconds`].
#[derive(Debug, Clone)]
pub struct ExtensionsConfig {
    /// Short-circuits every extension operation.
    pub disable_extensions: bool,
    /// Manager endpoint path.
    pub extensions_socket: String,
    /// Newline-delimited list of extension binaries.
    pub extensions_autoload: String,
    /// Newline-delimited list of loadable modules.
    pub modules_autoload: String,
    /// Seconds to wait for endpoints and required extensions.
    pub extensions_timeout: String,
    /// Heartbeat period, in seconds, for both watchers.
    pub extensions_interval: String,
    /// Comma-separated extension names required before bootstrap returns.
    pub extensions_require: String,
    /// Shell-only single extension path; bypasses the safety filter.
    pub extension: String,
    /// Active config plugin exported to extensions.
    pub config_plugin: String,
    /// Active logger plugin exported to extensions.
    pub logger_plugin: String,
    /// Active distributed plugin exported to extensions.
    pub distributed_plugin: String,
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        let home = corvid_dir();
        Self {
            disable_extensions: false,
            extensions_socket: default_socket_path(),
            extensions_autoload: home.join("extensions.load").to_string_lossy().into_owned(),
            modules_autoload: home.join("modules.load").to_string_lossy().into_owned(),
            extensions_timeout: "3".to_string(),
            extensions_interval: "3".to_string(),
            extensions_require: String::new(),
            extension: String::new(),
            config_plugin: "filesystem".to_string(),
            logger_plugin: "filesystem".to_string(),
            distributed_plugin: "tls".to_string(),
        }
    }
}

impl ExtensionsConfig {
    /// Applies one parsed flag. Returns false for names this bundle does
    /// not own, so the host parser can route leftovers elsewhere.
    pub fn set(&mut self, name: &str, value: &str) -> bool {
        match canonical_flag(name) {
            "disable_extensions" => self.disable_extensions = value == "true" || value == "1",
            "extensions_socket" => self.extensions_socket = value.to_string(),
            "extensions_autoload" => self.extensions_autoload = value.to_string(),
            "modules_autoload" => self.modules_autoload = value.to_string(),
            "extensions_timeout" => self.extensions_timeout = value.to_string(),
            "extensions_interval" => self.extensions_interval = value.to_string(),
            "extensions_require" => self.extensions_require = value.to_string(),
            "extension" => self.extension = value.to_string(),
            "config_plugin" => self.config_plugin = value.to_string(),
            "logger_plugin" => self.logger_plugin = value.to_string(),
            "distributed_plugin" => self.distributed_plugin = value.to_string(),
            _ => return false,
        }
        true
    }

    /// Timeout in whole seconds; unparsable values degrade to zero.
    #[must_use]
    pub fn timeout_seconds(&self) -> u64 {
        parse_seconds(&self.extensions_timeout)
    }

    /// Heartbeat interval in milliseconds.
    #[must_use]
    pub fn interval_ms(&self) -> u64 {
        parse_seconds(&self.extensions_interval) * 1000
    }

    /// Required extension names, trimmed, with empty entries dropped.
    #[must_use]
    pub fn required_extensions(&self) -> Vec<String> {
        self.extensions_require
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Parses a string-typed seconds flag the way C's `atoi` would: leading
/// digits count, anything else is zero.
#[must_use]
pub fn parse_seconds(value: &str) -> u64 {
    let digits: String = value
        .trim()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().unwrap_or(0)
}
