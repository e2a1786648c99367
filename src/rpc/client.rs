//! One-shot RPC client.

use std::io;

use crate::endpoint::EndpointStream;
use crate::error::ExtensionError;
use crate::registry::{Broadcast, PluginRequest};
use crate::rpc::protocol::{
    ExtensionInfo, ExtensionList, ExtensionResponse, ExtensionStatus, OptionList, Request, Response,
};
use crate::rpc::{Connection, EndpointConnection, endpoint_connection};

/// Client for a single endpoint connection.
///
/// Construct, make a call (or two over the same connection, as the
/// extension bootstrap does for register-then-options), drop.
pub struct RpcClient {
    conn: EndpointConnection,
}

impl RpcClient {
    /// Connects to an endpoint.
    pub fn connect(path: &str) -> Result<Self, ExtensionError> {
        let stream = EndpointStream::connect(path)?;
        Ok(Self {
            conn: endpoint_connection(stream)?,
        })
    }

    fn round_trip(&mut self, request: &Request) -> Result<Response, ExtensionError> {
        let json = serde_json::to_string(request)?;
        self.conn.write_message(&json)?;
        let line = self.conn.read_message()?.ok_or_else(|| {
            ExtensionError::Transport(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before response",
            ))
        })?;
        Ok(serde_json::from_str(&line)?)
    }

    fn unexpected(kind: &str) -> ExtensionError {
        ExtensionError::Transport(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected response kind for {kind}"),
        ))
    }

    /// Heartbeat.
    pub fn ping(&mut self) -> Result<ExtensionStatus, ExtensionError> {
        match self.round_trip(&Request::Ping)? {
            Response::Status(status) => Ok(status),
            _ => Err(Self::unexpected("ping")),
        }
    }

    /// Registers an extension with the manager.
    pub fn register(
        &mut self,
        info: &ExtensionInfo,
        broadcast: &Broadcast,
    ) -> Result<ExtensionStatus, ExtensionError> {
        let request = Request::Register {
            info: info.clone(),
            broadcast: broadcast.clone(),
        };
        match self.round_trip(&request)? {
            Response::Status(status) => Ok(status),
            _ => Err(Self::unexpected("register")),
        }
    }

    /// Lists the manager's registered extensions.
    pub fn extensions(&mut self) -> Result<ExtensionList, ExtensionError> {
        match self.round_trip(&Request::Extensions)? {
            Response::Extensions(list) => Ok(list),
            _ => Err(Self::unexpected("extensions")),
        }
    }

    /// Fetches the manager's exported options.
    pub fn options(&mut self) -> Result<OptionList, ExtensionError> {
        match self.round_trip(&Request::Options)? {
            Response::Options(options) => Ok(options),
            _ => Err(Self::unexpected("options")),
        }
    }

    /// Runs a SQL query on the manager.
    pub fn query(&mut self, sql: &str) -> Result<ExtensionResponse, ExtensionError> {
        let request = Request::Query {
            sql: sql.to_string(),
        };
        match self.round_trip(&request)? {
            Response::Response(response) => Ok(response),
            _ => Err(Self::unexpected("query")),
        }
    }

    /// Resolves the column schema of a SQL query.
    pub fn query_columns(&mut self, sql: &str) -> Result<ExtensionResponse, ExtensionError> {
        let request = Request::QueryColumns {
            sql: sql.to_string(),
        };
        match self.round_trip(&request)? {
            Response::Response(response) => Ok(response),
            _ => Err(Self::unexpected("query_columns")),
        }
    }

    /// Invokes a plugin item on the remote.
    pub fn call(
        &mut self,
        registry: &str,
        item: &str,
        request: &PluginRequest,
    ) -> Result<ExtensionResponse, ExtensionError> {
        let request = Request::Call {
            registry: registry.to_string(),
            item: item.to_string(),
            request: request.clone(),
        };
        match self.round_trip(&request)? {
            Response::Response(response) => Ok(response),
            _ => Err(Self::unexpected("call")),
        }
    }

    /// Asks the remote to wind down. The remote may exit before answering,
    /// so no response is required.
    pub fn shutdown(&mut self) -> Result<(), ExtensionError> {
        let json = serde_json::to_string(&Request::Shutdown)?;
        self.conn.write_message(&json)?;
        let _ = self.conn.read_message();
        Ok(())
    }
}
