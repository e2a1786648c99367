//! Endpoint abstraction.
//!
//! A uniform view of a local bidirectional byte channel addressed by a path
//! string: a filesystem socket on unix, a named pipe on Windows. The rest of
//! the crate never branches on platform; it goes through `exists`,
//! `writable`, `reclaim`, `ready` and the platform listener/stream pair
//! re-exported here.

#[cfg(unix)]
pub mod unix;

#[cfg(windows)]
pub mod windows;

#[cfg(unix)]
pub use unix::{EndpointListener, EndpointStream};

#[cfg(windows)]
pub use windows::{EndpointListener, EndpointStream};

#[cfg(unix)]
use std::path::Path;

use crate::config::ExtensionsConfig;
use crate::delay::delay;
use crate::error::ExtensionError;
use crate::registry::RouteUuid;

/// Derives an extension's endpoint path from the manager's.
///
/// The scheme is fixed: `<manager_path>.<decimal uuid>`. Both roles and the
/// watchers depend on reproducing it exactly.
#[must_use]
pub fn extension_endpoint(uuid: RouteUuid, manager_path: &str) -> String {
    format!("{manager_path}.{uuid}")
}

/// True when an endpoint exists at `path`.
#[cfg(unix)]
#[must_use]
pub fn exists(path: &str) -> bool {
    crate::fsutil::path_exists(Path::new(path))
}

/// True when an endpoint exists at `path`.
#[cfg(windows)]
#[must_use]
pub fn exists(path: &str) -> bool {
    windows::named_pipe_exists(path)
}

/// True when the endpoint exists and the process may write to it, which is
/// what connecting to (and reclaiming) a socket requires.
#[cfg(unix)]
#[must_use]
pub fn writable(path: &str) -> bool {
    let p = Path::new(path);
    crate::fsutil::path_exists(p) && crate::fsutil::is_writable(p)
}

/// Named pipes carry no usable write-permission probe; existence stands in.
#[cfg(windows)]
#[must_use]
pub fn writable(path: &str) -> bool {
    exists(path)
}

/// Prepares `path` for binding an endpoint this process will own.
///
/// An existing file must be writable (the proxy for "left behind by a
/// previous instance of me") and is unlinked; otherwise the parent
/// directory must exist and be writable. Calling this twice in a row is a
/// no-op the second time and always leaves the path absent.
#[cfg(unix)]
pub fn reclaim(path: &str) -> Result<(), ExtensionError> {
    let p = Path::new(path);
    if crate::fsutil::path_exists(p) {
        if !crate::fsutil::is_writable(p) {
            return Err(ExtensionError::Endpoint(format!(
                "Cannot write extension socket: {path}"
            )));
        }
        std::fs::remove_file(p).map_err(|e| {
            ExtensionError::Endpoint(format!("Cannot remove extension socket: {path}: {e}"))
        })?;
    } else {
        let parent = p.parent().unwrap_or_else(|| Path::new("."));
        if !crate::fsutil::path_exists(parent) {
            return Err(ExtensionError::Endpoint(format!(
                "Extension socket directory missing: {path}"
            )));
        }
        if !crate::fsutil::is_writable(parent) {
            return Err(ExtensionError::Endpoint(format!(
                "Cannot create extension socket: {path}"
            )));
        }
    }
    Ok(())
}

/// Named pipes are never unlinked; reclaiming reduces to validating the
/// pipe path itself.
#[cfg(windows)]
pub fn reclaim(path: &str) -> Result<(), ExtensionError> {
    windows::validate_pipe_path(path)
}

/// Blocks until the endpoint accepts a short client connection.
///
/// With `with_timeout` the probe repeats for up to `extensions_timeout`
/// seconds (clamped to a 200 ms floor); without it the helper degrades to a
/// single probe. A probe succeeds when the endpoint is writable and a
/// one-shot client can be constructed against it.
pub fn ready(
    path: &str,
    config: &ExtensionsConfig,
    with_timeout: bool,
) -> Result<(), ExtensionError> {
    let timeout_seconds = config.timeout_seconds();
    delay(timeout_seconds, |stop| {
        #[cfg(unix)]
        {
            if writable(path) && EndpointStream::connect(path).is_ok() {
                return Ok(());
            }
        }
        #[cfg(windows)]
        {
            if !path.starts_with(crate::config::SOCKET_PREFIX) {
                *stop = true;
                return Err(ExtensionError::BadPipePrefix);
            }
            if exists(path) {
                return Ok(());
            }
        }

        // Only probe once when no timeout was requested.
        if !with_timeout {
            *stop = true;
        }
        Err(ExtensionError::NotReady(path.to_string()))
    })
}
