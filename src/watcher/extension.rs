//! Extension-side watcher.

use std::sync::Arc;

use tracing::info;

use crate::config::{DEFAULT_FATAL_CODE, ExtensionsConfig};
use crate::endpoint;
use crate::error::ExtensionError;
#[cfg(unix)]
use crate::rpc::RpcClient;
use crate::rpc::protocol::ExtensionStatus;
use crate::service::{ServiceHandle, ShutdownRequester};

/// Watches the manager endpoint from inside an extension process.
///
/// On manager loss the process is asked to exit cleanly (code 0). When
/// `fatal` is set and a reachable manager answers the ping with a failing
/// status, the process is asked to exit with [`DEFAULT_FATAL_CODE`].
pub struct ExtensionWatcher {
    path: String,
    interval_ms: u64,
    fatal: bool,
    shutdown: Arc<dyn ShutdownRequester>,
}

impl ExtensionWatcher {
    /// Creates a watcher for the manager at `path`.
    #[must_use]
    pub fn new(
        path: &str,
        interval_ms: u64,
        fatal: bool,
        shutdown: Arc<dyn ShutdownRequester>,
    ) -> Self {
        Self {
            path: path.to_string(),
            interval_ms,
            fatal,
            shutdown,
        }
    }

    /// Runs one probe. Returns false once a shutdown has been requested,
    /// which also ends the service loop.
    ///
    /// The probe pings through a raw client rather than the facade so it
    /// skips the readiness wait on every tick.
    pub fn tick(&self) -> bool {
        let mut status = ExtensionStatus::success();
        let mut core_sane = true;

        #[cfg(unix)]
        {
            if endpoint::writable(&self.path) {
                match RpcClient::connect(&self.path).and_then(|mut client| client.ping()) {
                    Ok(remote) => status = remote,
                    Err(_) => core_sane = false,
                }
            } else {
                // The previously-writable manager socket is unusable.
                core_sane = false;
            }
        }

        #[cfg(windows)]
        {
            core_sane = endpoint::exists(&self.path);
        }

        if !core_sane {
            info!("Extension watcher ending: the manager has gone away");
            self.shutdown.request_shutdown(0);
            return false;
        }

        if !status.ok() && self.fatal {
            self.shutdown.request_shutdown(DEFAULT_FATAL_CODE);
            return false;
        }
        true
    }

    /// Spawns the watcher loop as a service.
    pub fn start(self) -> Result<ServiceHandle, ExtensionError> {
        ServiceHandle::spawn("extension-watcher", move |flag| {
            while !flag.interrupted() {
                if !self.tick() {
                    break;
                }
                flag.pause_millis(self.interval_ms);
            }
        })
    }
}

/// Verifies the manager endpoint is active, then starts the watcher
/// service against it.
pub fn start_extension_watcher(
    config: &ExtensionsConfig,
    interval_ms: u64,
    fatal: bool,
    shutdown: Arc<dyn ShutdownRequester>,
) -> Result<ServiceHandle, ExtensionError> {
    let path = &config.extensions_socket;
    endpoint::ready(path, config, true)?;
    ExtensionWatcher::new(path, interval_ms, fatal, shutdown).start()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::service::RecordingShutdown;

    #[test]
    fn test_missing_manager_requests_clean_exit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.em");
        let recorder = Arc::new(RecordingShutdown::new());
        let watcher =
            ExtensionWatcher::new(path.to_str().unwrap(), 100, true, recorder.clone());

        assert!(!watcher.tick());
        assert_eq!(recorder.requested_code(), Some(0));
    }

    #[test]
    fn test_stale_socket_file_is_manager_loss() {
        // A plain file is writable but refuses connections.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.em");
        std::fs::write(&path, b"").unwrap();

        let recorder = Arc::new(RecordingShutdown::new());
        let watcher =
            ExtensionWatcher::new(path.to_str().unwrap(), 100, false, recorder.clone());

        assert!(!watcher.tick());
        assert_eq!(recorder.requested_code(), Some(0));
    }
}
