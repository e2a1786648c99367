//! Shared fixtures for the integration suites.

#![allow(dead_code)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use corvid::config::ExtensionsConfig;
use corvid::error::ExtensionError;
use corvid::manager::QueryExecutor;
use corvid::registry::{Plugin, PluginRequest, Registry, Row};

/// Config pointing at a private socket with short waits.
pub fn test_config(dir: &Path) -> ExtensionsConfig {
    let mut config = ExtensionsConfig::default();
    config.extensions_socket = dir.join("corvid.em").to_string_lossy().into_owned();
    config.extensions_timeout = "1".to_string();
    config.extensions_interval = "1".to_string();
    config
}

/// Plugin that reflects its request back as a single row.
pub struct EchoPlugin;

impl Plugin for EchoPlugin {
    fn call(&self, request: &PluginRequest) -> Result<Vec<Row>, ExtensionError> {
        Ok(vec![request.clone()])
    }
}

/// Registry an extension process would carry: one public table plugin and
/// one core-only config plugin that must stay out of broadcasts.
pub fn extension_registry() -> Arc<Registry> {
    let registry = Arc::new(Registry::new());
    registry.add_plugin("table", "echo", "request echo table", false, Arc::new(EchoPlugin));
    registry.add_plugin("config", "filesystem", "core config", true, Arc::new(EchoPlugin));
    registry
}

/// Executor returning a fixed table.
pub struct StaticExecutor;

impl QueryExecutor for StaticExecutor {
    fn query(&self, _sql: &str) -> Result<Vec<Row>, ExtensionError> {
        let mut row = BTreeMap::new();
        row.insert("value".to_string(), "1".to_string());
        Ok(vec![row])
    }

    fn query_columns(&self, _sql: &str) -> Result<Vec<(String, String)>, ExtensionError> {
        Ok(vec![
            ("value".to_string(), "TEXT".to_string()),
            ("count".to_string(), "INTEGER".to_string()),
        ])
    }
}

/// Polls `predicate` until it holds or the deadline passes.
pub fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}
