//! Plugin registry.
//!
//! The registry is a catalog of plugin items keyed by registry kind
//! ("config", "logger", "table", ...) then item name. Local items carry a
//! callable plugin; external items are routes to a registered extension,
//! attributed to the extension's route UUID so they can be withdrawn as one
//! unit when the extension goes away.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ExtensionError;

/// Identifier the manager assigns to a successful registration.
pub type RouteUuid = u64;

/// One row of tabular plugin output.
pub type Row = BTreeMap<String, String>;

/// Request map handed to a plugin call.
pub type PluginRequest = BTreeMap<String, String>;

/// Descriptor of one plugin item as it travels in a broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Human-readable summary of the item.
    #[serde(default)]
    pub description: String,
    /// Routing metadata (e.g. table column definitions).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Row>,
}

/// Catalog of plugin items a party contributes: kind → name → descriptor.
pub type Broadcast = BTreeMap<String, BTreeMap<String, PluginDescriptor>>;

/// A callable plugin item.
pub trait Plugin: Send + Sync {
    /// Handles one request, returning tabular output.
    fn call(&self, request: &PluginRequest) -> Result<Vec<Row>, ExtensionError>;

    /// Finalizes lazy setup; invoked once from [`Registry::set_up`].
    fn set_up(&self) -> Result<(), ExtensionError> {
        Ok(())
    }

    /// Routing metadata included in the item's broadcast descriptor.
    fn routes(&self) -> Vec<Row> {
        Vec::new()
    }
}

struct LocalItem {
    plugin: Arc<dyn Plugin>,
    description: String,
    /// Internal items never travel in an external registry's broadcast.
    internal: bool,
}

#[derive(Default)]
struct RegistryInner {
    local: BTreeMap<String, BTreeMap<String, LocalItem>>,
    /// Items contributed per registered extension.
    external_owned: BTreeMap<RouteUuid, Vec<(String, String)>>,
    external_items: BTreeMap<String, BTreeMap<String, RouteUuid>>,
    active: BTreeMap<String, String>,
    external_registry: bool,
}

/// Thread-safe plugin catalog shared by RPC handlers and watchers.
#[derive(Default)]
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a local plugin item.
    pub fn add_plugin(
        &self,
        kind: &str,
        name: &str,
        description: &str,
        internal: bool,
        plugin: Arc<dyn Plugin>,
    ) {
        let mut inner = self.inner.lock().expect("registry lock");
        inner.local.entry(kind.to_string()).or_default().insert(
            name.to_string(),
            LocalItem {
                plugin,
                description: description.to_string(),
                internal,
            },
        );
    }

    /// Marks this registry as living inside an extension process, which
    /// excludes internal items from subsequent broadcasts.
    pub fn set_external(&self) {
        self.inner.lock().expect("registry lock").external_registry = true;
    }

    /// True when [`Registry::set_external`] has been applied.
    #[must_use]
    pub fn is_external(&self) -> bool {
        self.inner.lock().expect("registry lock").external_registry
    }

    /// Snapshot of the local catalog for registration.
    #[must_use]
    pub fn get_broadcast(&self) -> Broadcast {
        let inner = self.inner.lock().expect("registry lock");
        let mut broadcast = Broadcast::new();
        for (kind, items) in &inner.local {
            let mut names = BTreeMap::new();
            for (name, item) in items {
                if inner.external_registry && item.internal {
                    continue;
                }
                names.insert(
                    name.clone(),
                    PluginDescriptor {
                        description: item.description.clone(),
                        routes: item.plugin.routes(),
                    },
                );
            }
            if !names.is_empty() {
                broadcast.insert(kind.clone(), names);
            }
        }
        broadcast
    }

    /// Merges an extension's broadcast, attributing every item to `uuid`.
    ///
    /// Fails without side effects when any item collides with an existing
    /// local or external item.
    pub fn add_broadcast(&self, uuid: RouteUuid, broadcast: &Broadcast) -> Result<(), ExtensionError> {
        let mut inner = self.inner.lock().expect("registry lock");
        for (kind, items) in broadcast {
            for name in items.keys() {
                let local_dup = inner
                    .local
                    .get(kind)
                    .is_some_and(|m| m.contains_key(name));
                let external_dup = inner
                    .external_items
                    .get(kind)
                    .is_some_and(|m| m.contains_key(name));
                if local_dup || external_dup {
                    return Err(ExtensionError::from_status(
                        crate::error::EXT_FAILURE,
                        format!("Duplicate registry item: {kind}.{name}"),
                    ));
                }
            }
        }

        for (kind, items) in broadcast {
            for name in items.keys() {
                inner
                    .external_items
                    .entry(kind.clone())
                    .or_default()
                    .insert(name.clone(), uuid);
                inner
                    .external_owned
                    .entry(uuid)
                    .or_default()
                    .push((kind.clone(), name.clone()));
            }
        }
        // An extension with an empty catalog is still tracked by UUID.
        inner.external_owned.entry(uuid).or_default();
        Ok(())
    }

    /// Withdraws every item attributed to `uuid`.
    pub fn remove_broadcast(&self, uuid: RouteUuid) {
        let mut inner = self.inner.lock().expect("registry lock");
        if let Some(owned) = inner.external_owned.remove(&uuid) {
            for (kind, name) in owned {
                let now_empty = match inner.external_items.get_mut(&kind) {
                    Some(items) => {
                        items.remove(&name);
                        items.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    inner.external_items.remove(&kind);
                }
            }
            debug!("Removed broadcast for route UUID {}", uuid);
        }
    }

    /// UUIDs of every currently-registered extension.
    #[must_use]
    pub fn route_uuids(&self) -> Vec<RouteUuid> {
        self.inner
            .lock()
            .expect("registry lock")
            .external_owned
            .keys()
            .copied()
            .collect()
    }

    /// Owner of an external item, if one is registered.
    #[must_use]
    pub fn external_owner(&self, kind: &str, name: &str) -> Option<RouteUuid> {
        self.inner
            .lock()
            .expect("registry lock")
            .external_items
            .get(kind)
            .and_then(|m| m.get(name))
            .copied()
    }

    /// Selects the active item for a registry kind.
    ///
    /// The item need not exist locally; an extension may name a plugin the
    /// core arbitrates.
    pub fn set_active(&self, kind: &str, name: &str) {
        if name.is_empty() {
            return;
        }
        self.inner
            .lock()
            .expect("registry lock")
            .active
            .insert(kind.to_string(), name.to_string());
    }

    /// Currently-active item for a kind.
    #[must_use]
    pub fn active(&self, kind: &str) -> Option<String> {
        self.inner
            .lock()
            .expect("registry lock")
            .active
            .get(kind)
            .cloned()
    }

    /// Finalizes lazy setup of every local plugin.
    pub fn set_up(&self) -> Result<(), ExtensionError> {
        let plugins: Vec<Arc<dyn Plugin>> = {
            let inner = self.inner.lock().expect("registry lock");
            inner
                .local
                .values()
                .flat_map(|items| items.values().map(|i| i.plugin.clone()))
                .collect()
        };
        for plugin in plugins {
            plugin.set_up()?;
        }
        Ok(())
    }

    /// Invokes a local plugin item.
    pub fn call_local(
        &self,
        kind: &str,
        name: &str,
        request: &PluginRequest,
    ) -> Result<Vec<Row>, ExtensionError> {
        let plugin = {
            let inner = self.inner.lock().expect("registry lock");
            inner
                .local
                .get(kind)
                .and_then(|items| items.get(name))
                .map(|item| item.plugin.clone())
        };
        match plugin {
            Some(plugin) => plugin.call(request),
            None => Err(ExtensionError::from_status(
                crate::error::EXT_FAILURE,
                format!("Unknown registry item: {kind}.{name}"),
            )),
        }
    }
}
