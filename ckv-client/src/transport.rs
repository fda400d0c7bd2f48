//! # Transport
//!
//! Purpose: Isolate byte-level I/O behind two small traits so the routing
//! engine only shapes argument vectors and inspects decoded replies.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: `Connector` opens sessions; tests swap in
//!    scripted connectors without touching the engine.
//! 2. **One Reply Per Call**: `Session::send_command` writes one command and
//!    reads exactly one reply.
//! 3. **Buffer Reuse**: The TCP session keeps its encode/decode buffers.

use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use ckv_common::Endpoint;

use crate::error::{ClientError, ClientResult};
use crate::resp::{encode_command, read_response, RespValue};

/// Opens transport sessions to shard endpoints.
pub trait Connector: Send + Sync {
    /// Connects to `endpoint`; `timeout` bounds connect, read and write.
    fn connect(&self, endpoint: &Endpoint, timeout: Duration) -> ClientResult<Box<dyn Session>>;
}

/// One open transport session.
pub trait Session: Send {
    /// Sends `argv` and reads the matching reply.
    ///
    /// Error replies from the server are returned as `Ok(RespValue::Error)`;
    /// `Err` means the transport itself failed.
    fn send_command(&mut self, argv: &[Vec<u8>]) -> ClientResult<RespValue>;
}

/// RESP2 over plain TCP.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(&self, endpoint: &Endpoint, timeout: Duration) -> ClientResult<Box<dyn Session>> {
        Ok(Box::new(TcpSession::connect(endpoint, timeout)?))
    }
}

/// Single TCP session with reusable buffers.
///
/// The buffers are stored on the session to avoid per-call allocations.
pub struct TcpSession {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl TcpSession {
    pub fn connect(endpoint: &Endpoint, timeout: Duration) -> ClientResult<Self> {
        let addr = resolve(endpoint)?;
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        Ok(TcpSession {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
        })
    }
}

impl Session for TcpSession {
    fn send_command(&mut self, argv: &[Vec<u8>]) -> ClientResult<RespValue> {
        self.write_buf.clear();
        encode_command(argv, &mut self.write_buf);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;

        read_response(&mut self.reader, &mut self.line_buf)
    }
}

fn resolve(endpoint: &Endpoint) -> ClientResult<SocketAddr> {
    (endpoint.host.as_str(), endpoint.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| ClientError::Request(format!("cannot resolve {endpoint}")))
}
