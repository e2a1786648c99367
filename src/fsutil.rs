//! Filesystem primitives behind the autoload filter and endpoint probes.

use std::path::Path;

/// True when the path exists on the filesystem.
#[must_use]
pub fn path_exists(path: &Path) -> bool {
    path.exists()
}

/// True when the current process may write to the path.
///
/// Uses `access(2)` so the answer reflects effective credentials, which is
/// what matters for connecting to and reclaiming sockets.
#[cfg(unix)]
#[must_use]
pub fn is_writable(path: &Path) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let Ok(cpath) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    // SAFETY: cpath is a valid NUL-terminated string for the call duration.
    unsafe { libc::access(cpath.as_ptr(), libc::W_OK) == 0 }
}

/// True when the current process may write to the path.
#[cfg(windows)]
#[must_use]
pub fn is_writable(path: &Path) -> bool {
    path.exists()
        && std::fs::metadata(path)
            .map(|m| !m.permissions().readonly())
            .unwrap_or(false)
}

/// True when a binary at `path` under `parent` is safe to launch: both are
/// owned by the current user (or root) and neither is world-writable.
#[cfg(unix)]
#[must_use]
pub fn safe_permissions(parent: &Path, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    // SAFETY: geteuid has no preconditions.
    let euid = unsafe { libc::geteuid() };
    for candidate in [parent, path] {
        let Ok(meta) = std::fs::metadata(candidate) else {
            return false;
        };
        if meta.uid() != 0 && meta.uid() != euid {
            return false;
        }
        if meta.mode() & 0o002 != 0 {
            return false;
        }
    }
    true
}

/// Permission safety is not modeled through ACLs here; autoload paths on
/// Windows rely on the directory layout alone.
#[cfg(windows)]
#[must_use]
pub fn safe_permissions(_parent: &Path, path: &Path) -> bool {
    path.exists()
}
