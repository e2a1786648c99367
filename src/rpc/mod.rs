//! Framed RPC over local endpoints.
//!
//! Requests and responses are newline-delimited JSON, one message per line.
//! Clients are one-shot: construct, perform a call or two on the same
//! connection, drop. There is no connection pool; concurrent RPCs use
//! independent connections.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::RpcClient;
pub use server::{RequestHandler, RpcServer};

use std::io::{BufRead, BufReader, BufWriter, Read, Write};

use crate::endpoint::EndpointStream;
use crate::error::ExtensionError;

/// Connection carrying newline-delimited JSON messages.
pub trait Connection: Send {
    /// Reads one message; `None` on end of stream.
    fn read_message(&mut self) -> Result<Option<String>, ExtensionError>;

    /// Writes one message followed by a newline and flushes.
    fn write_message(&mut self, msg: &str) -> Result<(), ExtensionError>;
}

/// Buffered connection over any read/write pair.
pub struct BufferedConnection<R: BufRead, W: Write> {
    reader: R,
    writer: W,
}

impl<R: BufRead + Send, W: Write + Send> BufferedConnection<R, W> {
    /// Wraps a read/write pair.
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }
}

impl<R: BufRead + Send, W: Write + Send> Connection for BufferedConnection<R, W> {
    fn read_message(&mut self) -> Result<Option<String>, ExtensionError> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => Ok(None),
            Ok(_) => {
                let trimmed = line.trim_end();
                if trimmed.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(trimmed.to_string()))
                }
            }
            Err(e) => Err(ExtensionError::Transport(e)),
        }
    }

    fn write_message(&mut self, msg: &str) -> Result<(), ExtensionError> {
        writeln!(self.writer, "{msg}")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Connection type used over real endpoints.
pub type EndpointConnection =
    BufferedConnection<BufReader<Box<dyn Read + Send>>, BufWriter<Box<dyn Write + Send>>>;

/// Frames an endpoint stream.
pub(crate) fn endpoint_connection(
    stream: EndpointStream,
) -> Result<EndpointConnection, ExtensionError> {
    let (reader, writer) = stream.into_split()?;
    Ok(BufferedConnection::new(
        BufReader::new(reader),
        BufWriter::new(writer),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_buffered_connection_reads_lines() {
        let input = b"{\"method\":\"ping\"}\n{\"method\":\"shutdown\"}\n";
        let reader = BufReader::new(Cursor::new(input.to_vec()));
        let mut conn = BufferedConnection::new(reader, Vec::new());

        assert_eq!(
            conn.read_message().unwrap(),
            Some("{\"method\":\"ping\"}".to_string())
        );
        assert_eq!(
            conn.read_message().unwrap(),
            Some("{\"method\":\"shutdown\"}".to_string())
        );
        assert_eq!(conn.read_message().unwrap(), None);
    }

    #[test]
    fn test_buffered_connection_writes_newline() {
        let reader = BufReader::new(Cursor::new(Vec::new()));
        let mut writer = Vec::new();
        {
            let mut conn = BufferedConnection::new(reader, &mut writer);
            conn.write_message("{\"method\":\"ping\"}").unwrap();
        }
        assert_eq!(writer, b"{\"method\":\"ping\"}\n");
    }
}
