//! RPC server service.
//!
//! Binds an endpoint and serves framed requests from a dedicated worker
//! thread until interrupted. Connections are handled inline: extension
//! RPCs are small and one-shot, so there is nothing to gain from a handoff
//! to another thread.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::delay::INIT_LATENCY_MS;
use crate::endpoint::{EndpointListener, EndpointStream};
use crate::error::ExtensionError;
use crate::rpc::protocol::{ExtensionStatus, Request, Response};
use crate::rpc::{Connection, endpoint_connection};
use crate::service::{InterruptFlag, ServiceHandle};

/// Dispatches one parsed request to an implementation.
pub trait RequestHandler: Send + Sync {
    /// Handles a request; must not panic.
    fn handle(&self, request: Request) -> Response;
}

/// Endpoint server running as a service.
#[derive(Debug)]
pub struct RpcServer {
    service: ServiceHandle,
    path: String,
}

impl RpcServer {
    /// Binds `path` and starts serving. The endpoint is live once this
    /// returns; readiness probes against it will succeed.
    pub fn start(
        name: &'static str,
        path: &str,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<Self, ExtensionError> {
        let listener = EndpointListener::bind(path)?;
        let service = ServiceHandle::spawn(name, move |flag| {
            Self::run(&listener, handler.as_ref(), &flag);
        })?;
        Ok(Self {
            service,
            path: path.to_string(),
        })
    }

    fn run(listener: &EndpointListener, handler: &dyn RequestHandler, flag: &InterruptFlag) {
        while !flag.interrupted() {
            match listener.accept() {
                Ok(Some(stream)) => Self::handle_connection(stream, handler),
                Ok(None) => flag.pause_millis(INIT_LATENCY_MS),
                Err(e) => {
                    if !flag.interrupted() {
                        warn!("Endpoint accept failed: {}", e);
                    }
                    flag.pause_millis(INIT_LATENCY_MS);
                }
            }
        }
        debug!("Endpoint server loop ended");
    }

    fn handle_connection(stream: EndpointStream, handler: &dyn RequestHandler) {
        let mut conn = match endpoint_connection(stream) {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Connection setup failed: {}", e);
                return;
            }
        };

        loop {
            let msg = match conn.read_message() {
                Ok(Some(msg)) => msg,
                Ok(None) => break,
                Err(e) => {
                    debug!("Connection read ended: {}", e);
                    break;
                }
            };

            let response = match serde_json::from_str::<Request>(&msg) {
                Ok(request) => handler.handle(request),
                Err(e) => Response::Status(ExtensionStatus::failure(format!(
                    "Malformed request: {e}"
                ))),
            };

            let json = match serde_json::to_string(&response) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Response serialization failed: {}", e);
                    break;
                }
            };
            if conn.write_message(&json).is_err() {
                break;
            }
        }
    }

    /// The endpoint path being served.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Signals the serving thread to stop.
    pub fn stop(&self) {
        self.service.stop();
    }

    /// Stops and joins the serving thread, releasing the endpoint.
    pub fn join(self) {
        self.service.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::RpcClient;

    struct PingOnly;

    impl RequestHandler for PingOnly {
        fn handle(&self, request: Request) -> Response {
            match request {
                Request::Ping => Response::Status(ExtensionStatus::success()),
                _ => Response::Status(ExtensionStatus::failure("unsupported")),
            }
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_server_answers_ping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.em");
        let path_str = path.to_str().unwrap();

        let server = RpcServer::start("test-rpc", path_str, Arc::new(PingOnly)).unwrap();
        let mut client = RpcClient::connect(path_str).unwrap();
        let status = client.ping().unwrap();
        assert!(status.ok());
        drop(client);
        server.join();
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_server_rejects_malformed_request() {
        use crate::endpoint::EndpointStream;
        use crate::rpc::endpoint_connection;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("malformed.em");
        let path_str = path.to_str().unwrap();

        let server = RpcServer::start("test-rpc", path_str, Arc::new(PingOnly)).unwrap();
        let stream = EndpointStream::connect(path_str).unwrap();
        let mut conn = endpoint_connection(stream).unwrap();
        conn.write_message("this is not json").unwrap();
        let reply = conn.read_message().unwrap().unwrap();
        let Response::Status(status) = serde_json::from_str(&reply).unwrap() else {
            panic!("wrong response kind");
        };
        assert!(!status.ok());
        assert!(status.message.contains("Malformed request"));
        server.join();
    }
}
