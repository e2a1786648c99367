//! Named pipe endpoints.
//!
//! Talks to kernel32 directly. Pipe lifetimes cannot be observed through
//! the filesystem, so existence is probed with `WaitNamedPipeA`: anything
//! other than ERROR_BAD_PATHNAME (including a busy pipe) counts as present.

use std::ffi::{CString, OsStr};
use std::io::{self, Read, Write};
use std::os::windows::ffi::OsStrExt;
use std::ptr;
use std::sync::Arc;

use tracing::debug;

use crate::config::SOCKET_PREFIX;
use crate::error::ExtensionError;

const PIPE_ACCESS_DUPLEX: u32 = 0x0000_0003;
const PIPE_TYPE_BYTE: u32 = 0x0000_0000;
const PIPE_READMODE_BYTE: u32 = 0x0000_0000;
const PIPE_WAIT: u32 = 0x0000_0000;
const PIPE_UNLIMITED_INSTANCES: u32 = 255;
const INVALID_HANDLE_VALUE: isize = -1;
const ERROR_PIPE_CONNECTED: u32 = 535;
const ERROR_BROKEN_PIPE: u32 = 109;
const ERROR_BAD_PATHNAME: u32 = 161;
const GENERIC_READ: u32 = 0x8000_0000;
const GENERIC_WRITE: u32 = 0x4000_0000;
const OPEN_EXISTING: u32 = 3;

/// Milliseconds to wait for a busy pipe instance before concluding.
const NAMED_PIPE_WAIT: u32 = 500;

#[link(name = "kernel32")]
unsafe extern "system" {
    fn CreateNamedPipeW(
        lpName: *const u16,
        dwOpenMode: u32,
        dwPipeMode: u32,
        nMaxInstances: u32,
        nOutBufferSize: u32,
        nInBufferSize: u32,
        nDefaultTimeOut: u32,
        lpSecurityAttributes: *mut std::ffi::c_void,
    ) -> isize;

    fn ConnectNamedPipe(hNamedPipe: isize, lpOverlapped: *mut std::ffi::c_void) -> i32;

    fn DisconnectNamedPipe(hNamedPipe: isize) -> i32;

    fn CloseHandle(hObject: isize) -> i32;

    fn GetLastError() -> u32;

    fn WaitNamedPipeA(lpNamedPipeName: *const i8, nTimeOut: u32) -> i32;

    fn CreateFileW(
        lpFileName: *const u16,
        dwDesiredAccess: u32,
        dwShareMode: u32,
        lpSecurityAttributes: *mut std::ffi::c_void,
        dwCreationDisposition: u32,
        dwFlagsAndAttributes: u32,
        hTemplateFile: isize,
    ) -> isize;

    fn ReadFile(
        hFile: isize,
        lpBuffer: *mut u8,
        nNumberOfBytesToRead: u32,
        lpNumberOfBytesRead: *mut u32,
        lpOverlapped: *mut std::ffi::c_void,
    ) -> i32;

    fn WriteFile(
        hFile: isize,
        lpBuffer: *const u8,
        nNumberOfBytesToWrite: u32,
        lpNumberOfBytesWritten: *mut u32,
        lpOverlapped: *mut std::ffi::c_void,
    ) -> i32;

    fn FlushFileBuffers(hFile: isize) -> i32;
}

fn to_wide_string(s: &str) -> Vec<u16> {
    OsStr::new(s)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

/// Probes whether a named pipe exists in some capacity.
///
/// A busy pipe also answers yes; only a bad path name means missing.
#[must_use]
pub fn named_pipe_exists(path: &str) -> bool {
    let Ok(cpath) = CString::new(path) else {
        return false;
    };
    // SAFETY: cpath outlives the call and is NUL-terminated.
    let waited = unsafe { WaitNamedPipeA(cpath.as_ptr(), NAMED_PIPE_WAIT) };
    if waited == 0 {
        // SAFETY: no preconditions.
        let err = unsafe { GetLastError() };
        if err == ERROR_BAD_PATHNAME {
            return false;
        }
    }
    true
}

/// Validates a pipe path before this process binds or derives from it.
pub fn validate_pipe_path(path: &str) -> Result<(), ExtensionError> {
    if !path.starts_with(SOCKET_PREFIX) {
        return Err(ExtensionError::BadPipePrefix);
    }
    let Ok(cpath) = CString::new(path) else {
        return Err(ExtensionError::Endpoint(format!(
            "Named pipe path is invalid: {path}"
        )));
    };
    // SAFETY: cpath outlives the call and is NUL-terminated.
    let waited = unsafe { WaitNamedPipeA(cpath.as_ptr(), NAMED_PIPE_WAIT) };
    if waited == 0 {
        // SAFETY: no preconditions.
        let err = unsafe { GetLastError() };
        if err == ERROR_BAD_PATHNAME {
            return Err(ExtensionError::Endpoint(format!(
                "Named pipe path is invalid: {path}"
            )));
        }
    }
    Ok(())
}

/// Owned pipe handle; closed exactly once.
struct PipeHandle(isize);

impl PipeHandle {
    fn is_valid(&self) -> bool {
        self.0 != INVALID_HANDLE_VALUE && self.0 != 0
    }
}

impl Drop for PipeHandle {
    fn drop(&mut self) {
        if self.is_valid() {
            // SAFETY: the handle is owned and still open.
            unsafe {
                CloseHandle(self.0);
            }
        }
    }
}

// SAFETY: pipe handles may be used from any thread.
unsafe impl Send for PipeHandle {}
unsafe impl Sync for PipeHandle {}

/// Listening endpoint over a named pipe.
pub struct EndpointListener {
    pipe_name: String,
}

impl EndpointListener {
    /// Prepares to serve pipe instances under `path`.
    pub fn bind(path: &str) -> io::Result<Self> {
        debug!("Endpoint bound: {}", path);
        Ok(Self {
            pipe_name: path.to_string(),
        })
    }

    /// Creates the next pipe instance and waits for a client.
    ///
    /// Unlike the unix side this blocks; pipe instances only come into
    /// existence when created, so there is nothing to poll.
    pub fn accept(&self) -> io::Result<Option<EndpointStream>> {
        let wide_name = to_wide_string(&self.pipe_name);

        // SAFETY: wide_name is NUL-terminated and outlives the call.
        let handle = unsafe {
            CreateNamedPipeW(
                wide_name.as_ptr(),
                PIPE_ACCESS_DUPLEX,
                PIPE_TYPE_BYTE | PIPE_READMODE_BYTE | PIPE_WAIT,
                PIPE_UNLIMITED_INSTANCES,
                4096,
                4096,
                0,
                ptr::null_mut(),
            )
        };

        if handle == INVALID_HANDLE_VALUE {
            // SAFETY: no preconditions.
            let err = unsafe { GetLastError() };
            return Err(io::Error::from_raw_os_error(err as i32));
        }
        let handle = PipeHandle(handle);

        // SAFETY: handle is a valid pipe instance.
        let connected = unsafe { ConnectNamedPipe(handle.0, ptr::null_mut()) };
        if connected == 0 {
            // SAFETY: no preconditions.
            let err = unsafe { GetLastError() };
            if err != ERROR_PIPE_CONNECTED {
                return Err(io::Error::from_raw_os_error(err as i32));
            }
        }

        Ok(Some(EndpointStream {
            handle: Arc::new(handle),
            server_side: true,
        }))
    }

    /// The pipe path being served.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.pipe_name
    }
}

/// One connection over a named pipe.
pub struct EndpointStream {
    handle: Arc<PipeHandle>,
    server_side: bool,
}

impl EndpointStream {
    /// Connects a one-shot client to an endpoint.
    pub fn connect(path: &str) -> io::Result<Self> {
        let wide_name = to_wide_string(path);

        // SAFETY: wide_name is NUL-terminated and outlives the call.
        let handle = unsafe {
            CreateFileW(
                wide_name.as_ptr(),
                GENERIC_READ | GENERIC_WRITE,
                0,
                ptr::null_mut(),
                OPEN_EXISTING,
                0,
                0,
            )
        };

        if handle == INVALID_HANDLE_VALUE {
            // SAFETY: no preconditions.
            let err = unsafe { GetLastError() };
            return Err(io::Error::from_raw_os_error(err as i32));
        }

        Ok(Self {
            handle: Arc::new(PipeHandle(handle)),
            server_side: false,
        })
    }

    /// Splits into buffered read/write halves for framing.
    pub fn into_split(self) -> io::Result<(Box<dyn Read + Send>, Box<dyn Write + Send>)> {
        let reader = PipeReader {
            handle: self.handle.clone(),
            disconnect: self.server_side,
        };
        let writer = PipeWriter {
            handle: self.handle,
        };
        Ok((Box::new(reader), Box::new(writer)))
    }
}

/// Read half of a pipe connection.
struct PipeReader {
    handle: Arc<PipeHandle>,
    /// Server-side instances are disconnected when reading ends.
    disconnect: bool,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut bytes_read: u32 = 0;
        // SAFETY: buf is valid for writes of its length; handle is open.
        let result = unsafe {
            ReadFile(
                self.handle.0,
                buf.as_mut_ptr(),
                buf.len() as u32,
                &mut bytes_read,
                ptr::null_mut(),
            )
        };

        if result == 0 {
            // SAFETY: no preconditions.
            let err = unsafe { GetLastError() };
            if err == ERROR_BROKEN_PIPE {
                return Ok(0);
            }
            return Err(io::Error::from_raw_os_error(err as i32));
        }

        Ok(bytes_read as usize)
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        if self.disconnect && self.handle.is_valid() {
            // SAFETY: the handle is a connected server-side instance.
            unsafe {
                DisconnectNamedPipe(self.handle.0);
            }
        }
    }
}

/// Write half of a pipe connection.
struct PipeWriter {
    handle: Arc<PipeHandle>,
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut bytes_written: u32 = 0;
        // SAFETY: buf is valid for reads of its length; handle is open.
        let result = unsafe {
            WriteFile(
                self.handle.0,
                buf.as_ptr(),
                buf.len() as u32,
                &mut bytes_written,
                ptr::null_mut(),
            )
        };

        if result == 0 {
            // SAFETY: no preconditions.
            let err = unsafe { GetLastError() };
            return Err(io::Error::from_raw_os_error(err as i32));
        }

        Ok(bytes_written as usize)
    }

    fn flush(&mut self) -> io::Result<()> {
        // SAFETY: handle is open.
        let result = unsafe { FlushFileBuffers(self.handle.0) };
        if result == 0 {
            // SAFETY: no preconditions.
            let err = unsafe { GetLastError() };
            return Err(io::Error::from_raw_os_error(err as i32));
        }
        Ok(())
    }
}
