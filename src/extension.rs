//! Extension bootstrap and request handling.
//!
//! An extension process registers its plugin broadcast with the manager,
//! applies the manager's option snapshot to its local plugin selection,
//! then serves its own endpoint at the path derived from its route UUID.

use std::sync::Arc;

use tracing::debug;

use crate::config::{ExtensionsConfig, SDK_VERSION};
use crate::endpoint;
use crate::error::ExtensionError;
use crate::registry::{Registry, RouteUuid};
use crate::rpc::protocol::{
    ExtensionInfo, ExtensionResponse, ExtensionStatus, Request, Response,
};
use crate::rpc::{RequestHandler, RpcClient, RpcServer};
use crate::service::{ServiceHandle, ShutdownRequester};
use crate::watcher::start_extension_watcher;

/// Serves the extension side of the wire protocol.
///
/// Only `ping`, `call` and `shutdown` do real work; the manager-only
/// methods answer with a failing status instead of dropping the
/// connection, so a misdirected client gets a diagnosable error.
struct ExtensionHandler {
    registry: Arc<Registry>,
    shutdown: Arc<dyn ShutdownRequester>,
}

impl RequestHandler for ExtensionHandler {
    fn handle(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::Status(ExtensionStatus::success()),
            Request::Call {
                registry,
                item,
                request,
            } => match self.registry.call_local(&registry, &item, &request) {
                Ok(rows) => Response::Response(ExtensionResponse::rows(rows)),
                Err(e) => Response::Response(ExtensionResponse::failure(ExtensionStatus::from(&e))),
            },
            Request::Shutdown => {
                debug!("Extension shutdown requested over the endpoint");
                self.shutdown.request_shutdown(0);
                Response::Status(ExtensionStatus::success())
            }
            Request::Register { .. } | Request::Extensions | Request::Options => {
                Response::Status(ExtensionStatus::failure("Not the extension manager"))
            }
            Request::Query { .. } | Request::QueryColumns { .. } => Response::Response(
                ExtensionResponse::failure(ExtensionStatus::failure("Not the extension manager")),
            ),
        }
    }
}

/// Running extension: manager watcher and own RPC server.
#[derive(Debug)]
pub struct ExtensionHandle {
    uuid: RouteUuid,
    path: String,
    watcher: Option<ServiceHandle>,
    server: Option<RpcServer>,
}

impl ExtensionHandle {
    /// Route UUID assigned by the manager.
    #[must_use]
    pub fn uuid(&self) -> RouteUuid {
        self.uuid
    }

    /// This extension's own endpoint path.
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

impl Drop for ExtensionHandle {
    fn drop(&mut self) {
        if let Some(server) = self.server.take() {
            server.join();
        }
        if let Some(watcher) = self.watcher.take() {
            watcher.join();
        }
    }
}

/// Starts this process as an extension of the manager at
/// `config.extensions_socket`.
///
/// The local registry is marked external first so the broadcast sent at
/// registration excludes core-only plugins. Registration failures from the
/// manager (duplicate name, duplicate broadcast item) come back verbatim.
pub fn start_extension(
    config: &ExtensionsConfig,
    registry: Arc<Registry>,
    name: &str,
    version: &str,
    min_sdk_version: &str,
    shutdown: Arc<dyn ShutdownRequester>,
) -> Result<ExtensionHandle, ExtensionError> {
    registry.set_external();

    let watcher =
        start_extension_watcher(config, config.interval_ms(), true, shutdown.clone())?;

    let manager_path = &config.extensions_socket;
    endpoint::ready(manager_path, config, true)?;

    let info = ExtensionInfo {
        name: name.to_string(),
        version: version.to_string(),
        sdk_version: SDK_VERSION.to_string(),
        min_sdk_version: min_sdk_version.to_string(),
    };
    let broadcast = registry.get_broadcast();

    // Register and fetch options over the same one-shot connection.
    let (status, options) = (|| {
        let mut client = RpcClient::connect(manager_path)?;
        let status = client.register(&info, &broadcast)?;
        if !status.ok() {
            return Ok((status, None));
        }
        let options = client.options()?;
        Ok((status, Some(options)))
    })()
    .map_err(|e: ExtensionError| ExtensionError::RegisterFailed(e.detail()))?;

    let uuid = status.into_result()?.ok_or_else(|| {
        ExtensionError::RegisterFailed("registration returned no route UUID".to_string())
    })?;

    if let Some(options) = options {
        for kind in ["config", "logger", "distributed"] {
            if let Some(option) = options.get(&format!("{kind}_plugin")) {
                registry.set_active(kind, &option.value);
            }
        }
    }
    registry.set_up()?;

    let extension_path = endpoint::extension_endpoint(uuid, manager_path);
    endpoint::reclaim(&extension_path)?;

    let handler = Arc::new(ExtensionHandler {
        registry,
        shutdown,
    });
    let server = RpcServer::start("extension", &extension_path, handler)?;

    debug!(
        "Extension {} ({}, {}, {}) registered",
        name, uuid, version, SDK_VERSION
    );
    Ok(ExtensionHandle {
        uuid,
        path: extension_path,
        watcher: Some(watcher),
        server: Some(server),
    })
}
