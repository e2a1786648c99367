//! Extension manager bootstrap and request handling.
//!
//! The manager owns the primary endpoint. It mints route UUIDs for
//! registering extensions, merges their broadcasts into the registry,
//! answers queries through a host-supplied SQL executor, and health-checks
//! every registration through the manager-side watcher.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::config::ExtensionsConfig;
use crate::delay::delay;
use crate::endpoint;
use crate::error::ExtensionError;
use crate::facade;
use crate::registry::{Registry, RouteUuid, Row};
use crate::rpc::protocol::{
    ExtensionInfo, ExtensionResponse, ExtensionStatus, OptionList, OptionValue, Request, Response,
};
use crate::rpc::{RequestHandler, RpcServer};
use crate::service::{ServiceHandle, ShutdownRequester};
use crate::watcher::ManagerWatcher;

/// Executes SQL on behalf of `query`/`query_columns` RPCs.
///
/// The manager core does not parse SQL; the host plugs its query facility
/// in here.
pub trait QueryExecutor: Send + Sync {
    /// Runs a query, returning result rows.
    fn query(&self, sql: &str) -> Result<Vec<Row>, ExtensionError>;

    /// Resolves a query's column schema as `(name, declared type name)`.
    fn query_columns(&self, sql: &str) -> Result<Vec<(String, String)>, ExtensionError>;
}

/// Executor for hosts without a SQL facility; every request fails.
#[derive(Debug, Default)]
pub struct NullQueryExecutor;

impl QueryExecutor for NullQueryExecutor {
    fn query(&self, _sql: &str) -> Result<Vec<Row>, ExtensionError> {
        Err(ExtensionError::from_status(
            crate::error::EXT_FAILURE,
            "SQL is unavailable on this host",
        ))
    }

    fn query_columns(&self, _sql: &str) -> Result<Vec<(String, String)>, ExtensionError> {
        Err(ExtensionError::from_status(
            crate::error::EXT_FAILURE,
            "SQL is unavailable on this host",
        ))
    }
}

/// Registration records and the UUID mint.
struct ManagerState {
    extensions: Mutex<BTreeMap<RouteUuid, ExtensionInfo>>,
    next_uuid: AtomicU64,
}

impl ManagerState {
    fn new() -> Self {
        Self {
            extensions: Mutex::new(BTreeMap::new()),
            next_uuid: AtomicU64::new(1),
        }
    }

    fn mint(&self) -> RouteUuid {
        self.next_uuid.fetch_add(1, Ordering::SeqCst)
    }

    /// Drops records whose broadcast the watcher has withdrawn, so a dead
    /// extension's name becomes reusable and listings stay truthful.
    fn refresh(&self, registry: &Registry) {
        let live: std::collections::HashSet<RouteUuid> =
            registry.route_uuids().into_iter().collect();
        let mut extensions = self.extensions.lock().expect("manager state lock");
        extensions.retain(|uuid, _| live.contains(uuid));
    }

    fn snapshot(&self) -> BTreeMap<RouteUuid, ExtensionInfo> {
        self.extensions.lock().expect("manager state lock").clone()
    }
}

/// Serves the manager side of the wire protocol.
struct ManagerHandler {
    config: ExtensionsConfig,
    registry: Arc<Registry>,
    state: Arc<ManagerState>,
    executor: Arc<dyn QueryExecutor>,
    shutdown: Arc<dyn ShutdownRequester>,
}

impl ManagerHandler {
    fn register(&self, info: ExtensionInfo, broadcast: &crate::registry::Broadcast) -> ExtensionStatus {
        if info.name.trim().is_empty() {
            return ExtensionStatus::failure("Extension name cannot be empty");
        }

        self.state.refresh(&self.registry);
        {
            let extensions = self.state.extensions.lock().expect("manager state lock");
            if extensions.values().any(|e| e.name == info.name) {
                return ExtensionStatus::failure(format!(
                    "Duplicate extension registered: {}",
                    info.name
                ));
            }
        }

        let uuid = self.state.mint();
        if let Err(e) = self.registry.add_broadcast(uuid, broadcast) {
            return ExtensionStatus {
                code: e.code(),
                message: e.to_string(),
                uuid: None,
            };
        }

        info!(
            "Registered extension {} ({}, version {}, sdk {})",
            info.name, uuid, info.version, info.sdk_version
        );
        self.state
            .extensions
            .lock()
            .expect("manager state lock")
            .insert(uuid, info);
        ExtensionStatus::success_with_uuid(uuid)
    }

    fn query(&self, sql: &str) -> ExtensionResponse {
        match self.executor.query(sql) {
            Ok(rows) => ExtensionResponse::rows(rows),
            Err(e) => ExtensionResponse::failure(ExtensionStatus::from(&e)),
        }
    }

    fn query_columns(&self, sql: &str) -> ExtensionResponse {
        match self.executor.query_columns(sql) {
            Ok(columns) => {
                let rows = columns
                    .into_iter()
                    .map(|(name, type_name)| {
                        let mut row = Row::new();
                        row.insert(name, type_name);
                        row
                    })
                    .collect();
                ExtensionResponse::rows(rows)
            }
            Err(e) => ExtensionResponse::failure(ExtensionStatus::from(&e)),
        }
    }

    /// Calls a plugin item: local items run in-process, items broadcast by
    /// an extension are forwarded to its endpoint.
    fn call(&self, kind: &str, item: &str, request: &crate::registry::PluginRequest) -> ExtensionResponse {
        if let Some(uuid) = self.registry.external_owner(kind, item) {
            return match facade::call_extension(&self.config, uuid, kind, item, request) {
                Ok(rows) => ExtensionResponse::rows(rows),
                Err(e) => ExtensionResponse::failure(ExtensionStatus::from(&e)),
            };
        }
        match self.registry.call_local(kind, item, request) {
            Ok(rows) => ExtensionResponse::rows(rows),
            Err(e) => ExtensionResponse::failure(ExtensionStatus::from(&e)),
        }
    }
}

impl RequestHandler for ManagerHandler {
    fn handle(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::Status(ExtensionStatus::success()),
            Request::Register { info, broadcast } => {
                Response::Status(self.register(info, &broadcast))
            }
            Request::Extensions => {
                self.state.refresh(&self.registry);
                Response::Extensions(self.state.snapshot())
            }
            Request::Options => Response::Options(options_snapshot(&self.config)),
            Request::Query { sql } => Response::Response(self.query(&sql)),
            Request::QueryColumns { sql } => Response::Response(self.query_columns(&sql)),
            Request::Call {
                registry,
                item,
                request,
            } => Response::Response(self.call(&registry, &item, &request)),
            Request::Shutdown => {
                debug!("Manager shutdown requested over the endpoint");
                self.shutdown.request_shutdown(0);
                Response::Status(ExtensionStatus::success())
            }
        }
    }
}

/// Snapshot of the flags the manager exports to extensions.
#[must_use]
pub fn options_snapshot(config: &ExtensionsConfig) -> OptionList {
    let defaults = ExtensionsConfig::default();
    let mut options = OptionList::new();
    let mut push = |name: &str, value: &str, default_value: &str, kind: &str| {
        options.insert(
            name.to_string(),
            OptionValue {
                value: value.to_string(),
                default_value: default_value.to_string(),
                kind: kind.to_string(),
            },
        );
    };

    push(
        "disable_extensions",
        if config.disable_extensions { "true" } else { "false" },
        "false",
        "bool",
    );
    push(
        "extensions_socket",
        &config.extensions_socket,
        &defaults.extensions_socket,
        "string",
    );
    push(
        "extensions_autoload",
        &config.extensions_autoload,
        &defaults.extensions_autoload,
        "string",
    );
    push(
        "modules_autoload",
        &config.modules_autoload,
        &defaults.modules_autoload,
        "string",
    );
    push(
        "extensions_timeout",
        &config.extensions_timeout,
        &defaults.extensions_timeout,
        "string",
    );
    push(
        "extensions_interval",
        &config.extensions_interval,
        &defaults.extensions_interval,
        "string",
    );
    push(
        "extensions_require",
        &config.extensions_require,
        &defaults.extensions_require,
        "string",
    );
    push(
        "config_plugin",
        &config.config_plugin,
        &defaults.config_plugin,
        "string",
    );
    push(
        "logger_plugin",
        &config.logger_plugin,
        &defaults.logger_plugin,
        "string",
    );
    push(
        "distributed_plugin",
        &config.distributed_plugin,
        &defaults.distributed_plugin,
        "string",
    );
    options
}

/// Running manager: watcher and RPC server, stopped in reverse
/// construction order.
#[derive(Debug)]
pub struct ExtensionManagerHandle {
    watcher: Option<ServiceHandle>,
    server: Option<RpcServer>,
    path: String,
}

impl ExtensionManagerHandle {
    /// The manager endpoint path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Stops both services and waits for their threads.
    pub fn join(mut self) {
        if let Some(server) = self.server.take() {
            server.join();
        }
        if let Some(watcher) = self.watcher.take() {
            watcher.join();
        }
    }
}

impl Drop for ExtensionManagerHandle {
    fn drop(&mut self) {
        if let Some(server) = self.server.take() {
            server.join();
        }
        if let Some(watcher) = self.watcher.take() {
            watcher.join();
        }
    }
}

/// Starts the extension manager on the configured endpoint.
///
/// Reclaims the endpoint, starts the manager-side watcher and the RPC
/// server, then waits for every name in `extensions_require` to register
/// and answer a ping. A missing required extension fails the bootstrap and
/// tears the services back down.
pub fn start_extension_manager(
    config: &ExtensionsConfig,
    registry: Arc<Registry>,
    executor: Arc<dyn QueryExecutor>,
    shutdown: Arc<dyn ShutdownRequester>,
) -> Result<ExtensionManagerHandle, ExtensionError> {
    if config.disable_extensions {
        return Err(ExtensionError::Disabled);
    }

    let manager_path = config.extensions_socket.clone();
    endpoint::reclaim(&manager_path)?;

    let watcher = ManagerWatcher::new(config, registry.clone()).start()?;

    let handler = Arc::new(ManagerHandler {
        config: config.clone(),
        registry,
        state: Arc::new(ManagerState::new()),
        executor,
        shutdown,
    });
    let server = RpcServer::start("extension-manager", &manager_path, handler)?;

    let handle = ExtensionManagerHandle {
        watcher: Some(watcher),
        server: Some(server),
        path: manager_path.clone(),
    };

    let required = config.required_extensions();
    if !required.is_empty() {
        let mut waited = false;
        for name in &required {
            let status = delay(config.timeout_seconds(), |stop| {
                if let Ok(extensions) = facade::get_extensions(config) {
                    for (uuid, info) in &extensions {
                        if info.name == *name {
                            let path = endpoint::extension_endpoint(*uuid, &manager_path);
                            return facade::ping_extension(config, &path);
                        }
                    }
                }

                // Once one name has consumed the full timeout, later names
                // get a single probe before stopping early.
                if waited {
                    *stop = true;
                }
                Err(ExtensionError::NotAutoloaded(name.clone()))
            });

            waited = true;
            if let Err(e) = status {
                warn!("{}", e);
                return Err(e);
            }
        }
    }

    Ok(handle)
}
