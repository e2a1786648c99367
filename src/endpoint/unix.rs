//! Unix domain socket endpoints.

use std::io::{self, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

/// Client reads give up after this long; a wedged server must not hang a
/// one-shot caller forever.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Listening endpoint bound to a socket path.
///
/// The caller reclaims the path first; whoever binds owns the unlink on
/// drop. The listener is non-blocking so accept loops stay interruptible.
pub struct EndpointListener {
    listener: UnixListener,
    path: PathBuf,
}

impl EndpointListener {
    /// Binds the endpoint and restricts it to the owning user.
    pub fn bind(path: &str) -> io::Result<Self> {
        let listener = UnixListener::bind(path)?;
        listener.set_nonblocking(true)?;

        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        debug!("Endpoint bound: {}", path);
        Ok(Self {
            listener,
            path: PathBuf::from(path),
        })
    }

    /// Accepts one pending connection, or `None` when none is waiting.
    pub fn accept(&self) -> io::Result<Option<EndpointStream>> {
        match self.listener.accept() {
            Ok((stream, _addr)) => {
                stream.set_nonblocking(false)?;
                stream.set_read_timeout(Some(READ_TIMEOUT))?;
                Ok(Some(EndpointStream { stream }))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The bound socket path.
    #[must_use]
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Drop for EndpointListener {
    fn drop(&mut self) {
        if self.path.exists() {
            debug!("Removing endpoint: {}", self.path.display());
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// One connection over a unix socket.
pub struct EndpointStream {
    stream: UnixStream,
}

impl EndpointStream {
    /// Connects a one-shot client to an endpoint.
    pub fn connect(path: &str) -> io::Result<Self> {
        let stream = UnixStream::connect(path)?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        Ok(Self { stream })
    }

    /// Splits into buffered read/write halves for framing.
    pub fn into_split(self) -> io::Result<(Box<dyn Read + Send>, Box<dyn Write + Send>)> {
        let read_half = self.stream.try_clone()?;
        Ok((Box::new(read_half), Box::new(self.stream)))
    }
}
