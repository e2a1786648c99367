//! Manager-side watcher.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::ExtensionsConfig;
use crate::endpoint;
use crate::error::ExtensionError;
use crate::registry::{Registry, RouteUuid};
use crate::rpc::RpcClient;
use crate::service::ServiceHandle;

/// Per-UUID heartbeat counter: 0 means never probed, 1 healthy, above 1
/// degraded or gone. Owned exclusively by the watcher's worker thread; the
/// public [`ManagerWatcher::scan`] exists so tests can drive ticks with a
/// map they control.
pub type FailureMap = HashMap<RouteUuid, u32>;

/// Watches every registered extension from inside the manager.
///
/// An extension whose counter exceeds one on a single scan is deregistered
/// (two-failure hysteresis, so a single-tick glitch does not evict a
/// healthy extension). On interrupt, every live extension is asked to shut
/// down, best effort.
pub struct ManagerWatcher {
    manager_path: String,
    interval_ms: u64,
    config: ExtensionsConfig,
    registry: Arc<Registry>,
}

impl ManagerWatcher {
    /// Creates a watcher over the manager's registry.
    #[must_use]
    pub fn new(config: &ExtensionsConfig, registry: Arc<Registry>) -> Self {
        Self {
            manager_path: config.extensions_socket.clone(),
            interval_ms: config.interval_ms(),
            config: config.clone(),
            registry,
        }
    }

    /// Runs one scan over every registered UUID, then deregisters the
    /// entries whose counter passed the threshold.
    pub fn scan(&self, failures: &mut FailureMap) {
        for uuid in self.registry.route_uuids() {
            let path = endpoint::extension_endpoint(uuid, &self.manager_path);
            self.probe(uuid, &path, failures);
        }

        let gone: Vec<RouteUuid> = failures
            .iter()
            .filter(|(_, count)| **count > 1)
            .map(|(uuid, _)| *uuid)
            .collect();
        for uuid in gone {
            info!("Extension route {} has gone away", uuid);
            self.registry.remove_broadcast(uuid);
            // Clean counter in case the route UUID is ever reused.
            failures.insert(uuid, 1);
        }
    }

    #[cfg(unix)]
    fn probe(&self, uuid: RouteUuid, path: &str, failures: &mut FailureMap) {
        let mut writable = endpoint::writable(path);
        if !writable && failures.get(&uuid).copied().unwrap_or(0) == 0 {
            // Never probed before: a freshly-registered extension may still
            // be binding its endpoint, so give it the autoload timeout.
            debug!("Extension route {} initial check failed", uuid);
            writable = endpoint::ready(path, &self.config, true).is_ok();
        }

        // Every probed extension sits at one failure from here on, even
        // when the writability check above failed; the increments below
        // take this scan's failures to two.
        failures.insert(uuid, 1);

        if !writable {
            *failures.entry(uuid).or_insert(1) += 1;
            return;
        }

        match RpcClient::connect(path).and_then(|mut client| client.ping()) {
            Ok(status) if status.ok() => {
                failures.insert(uuid, 1);
            }
            Ok(_) => {
                debug!("Extension route {} ping failed", uuid);
                *failures.entry(uuid).or_insert(1) += 1;
            }
            Err(_) => {
                *failures.entry(uuid).or_insert(1) += 1;
            }
        }
    }

    #[cfg(windows)]
    fn probe(&self, uuid: RouteUuid, path: &str, failures: &mut FailureMap) {
        if !endpoint::exists(path) {
            debug!("Extension route {} ping failed", uuid);
            *failures.entry(uuid).or_insert(0) += 1;
        }
    }

    fn request_extension_shutdowns(&self) {
        for uuid in self.registry.route_uuids() {
            let path = endpoint::extension_endpoint(uuid, &self.manager_path);
            let result = RpcClient::connect(&path).and_then(|mut client| client.shutdown());
            if let Err(e) = result {
                debug!("Extension route {} shutdown request failed: {}", uuid, e);
            }
        }
    }

    /// Spawns the watcher loop as a service.
    pub fn start(self) -> Result<ServiceHandle, ExtensionError> {
        ServiceHandle::spawn("manager-watcher", move |flag| {
            let mut failures = FailureMap::new();
            while !flag.interrupted() {
                self.scan(&mut failures);
                flag.pause_millis(self.interval_ms);
            }
            self.request_extension_shutdowns();
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::registry::{Broadcast, PluginDescriptor};
    use std::collections::BTreeMap;

    fn config_for(dir: &std::path::Path) -> ExtensionsConfig {
        let mut config = ExtensionsConfig::default();
        config.extensions_socket = dir.join("em").to_string_lossy().into_owned();
        // Keep grace probes short.
        config.extensions_timeout = "0".to_string();
        config.extensions_interval = "1".to_string();
        config
    }

    fn register_uuid(registry: &Registry, uuid: RouteUuid) {
        let mut items = BTreeMap::new();
        items.insert(format!("t{uuid}"), PluginDescriptor::default());
        let mut broadcast = Broadcast::new();
        broadcast.insert("table".to_string(), items);
        registry.add_broadcast(uuid, &broadcast).unwrap();
    }

    #[test]
    fn test_failure_counter_first_scan_overwrite() {
        // A dead endpoint's first scan still lands the counter on two: the
        // unconditional reset to one happens before the outcome is known,
        // then the unreachable probe increments.
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(Registry::new());
        register_uuid(&registry, 9);

        let watcher = ManagerWatcher::new(&config_for(dir.path()), registry.clone());
        let mut failures = FailureMap::new();
        watcher.probe(
            9,
            &endpoint::extension_endpoint(9, &watcher.manager_path),
            &mut failures,
        );
        assert_eq!(failures.get(&9), Some(&2));
    }

    #[test]
    fn test_dead_extension_deregisters_after_one_full_scan() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(Registry::new());
        register_uuid(&registry, 4);

        let watcher = ManagerWatcher::new(&config_for(dir.path()), registry.clone());
        let mut failures = FailureMap::new();
        watcher.scan(&mut failures);

        assert!(registry.route_uuids().is_empty());
        // Counter is left clean for UUID reuse.
        assert_eq!(failures.get(&4), Some(&1));
    }

    #[test]
    fn test_deregistration_happens_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(Registry::new());
        register_uuid(&registry, 6);

        let watcher = ManagerWatcher::new(&config_for(dir.path()), registry.clone());
        let mut failures = FailureMap::new();
        watcher.scan(&mut failures);
        assert!(registry.route_uuids().is_empty());

        // Subsequent scans see no UUIDs and leave the clean counter alone.
        watcher.scan(&mut failures);
        assert_eq!(failures.get(&6), Some(&1));
    }
}
