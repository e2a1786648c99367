//! Error types for the extension manager.
//!
//! Every fallible operation returns `Result<_, ExtensionError>`. Transport
//! exceptions never unwind across the client boundary; they are caught there
//! and converted into `CallFailed`/`RegisterFailed`. Several display strings
//! are part of the observable contract (callers and the integration tests
//! match on them), so changing them is a breaking change.

use thiserror::Error;

/// Status code carried by a successful RPC.
pub const EXT_SUCCESS: i64 = 0;

/// Generic non-success status code.
pub const EXT_FAILURE: i64 = 1;

/// Errors surfaced by extension-manager operations.
#[derive(Debug, Error)]
pub enum ExtensionError {
    /// Every extension operation is short-circuited by `disable_extensions`.
    #[error("Extensions disabled")]
    Disabled,

    /// An endpoint never became ready within the allowed wait.
    #[error("Extension socket not available: {0}")]
    NotReady(String),

    /// An endpoint exists but cannot be owned, or its directory is unusable.
    #[error("{0}")]
    Endpoint(String),

    /// Named-pipe paths must begin with the configured socket prefix.
    #[error("Bad named pipe name prefix")]
    BadPipePrefix,

    /// An autoload list file could not be read.
    #[error("Failed reading: {0}")]
    ReadFailed(String),

    /// One or more autoload candidates failed the safety filter.
    #[error("Failed safety check: {0}")]
    UnsafeCandidate(String),

    /// A required extension never appeared within the timeout.
    #[error("Extension not autoloaded: {0}")]
    NotAutoloaded(String),

    /// Registration round trip threw at the transport layer.
    #[error("Extension register failed: {0}")]
    RegisterFailed(String),

    /// Any other RPC round trip threw at the transport layer.
    #[error("Extension call failed: {0}")]
    CallFailed(String),

    /// The remote answered with a non-success status; code and message are
    /// propagated verbatim.
    #[error("{message}")]
    Protocol { code: i64, message: String },

    /// Raw I/O failure, used below the client boundary.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Wire (de)serialization failure, used below the client boundary.
    #[error("Protocol error: {0}")]
    Json(#[from] serde_json::Error),

    /// A service worker thread could not be spawned.
    #[error("Service error: {0}")]
    Service(String),
}

impl ExtensionError {
    /// Status code for the wire envelope.
    #[must_use]
    pub fn code(&self) -> i64 {
        match self {
            ExtensionError::Protocol { code, .. } => *code,
            _ => EXT_FAILURE,
        }
    }

    /// Builds a protocol error from a remote status envelope.
    #[must_use]
    pub fn from_status(code: i64, message: impl Into<String>) -> Self {
        ExtensionError::Protocol {
            code,
            message: message.into(),
        }
    }

    /// Inner detail without the variant prefix, for wrapping a transport
    /// failure into a contract message.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            ExtensionError::Transport(e) => e.to_string(),
            ExtensionError::Json(e) => e.to_string(),
            other => other.to_string(),
        }
    }
}
