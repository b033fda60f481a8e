//! TCP transport layer for Sapp communication.
//!
//! This module provides the [`SappTransport`] struct which owns the stream
//! socket to a single MAS. The transport layer is completely separated from
//! the protocol layer: it only knows about sockets and bytes.
//!
//! # Design
//!
//! - **Protocol agnostic** - handles only byte transmission, no Sapp knowledge
//! - **Bounded** - connection establishment is capped by an attempt budget
//!   with a fixed number of outer retries; reads and writes carry the
//!   configured timeout
//! - **Sticky failure** - once the attempt budget is exhausted the transport
//!   is marked unreachable, which the owning session surfaces as "offline"
//!
//! # Constants
//!
//! - [`DEFAULT_MAS_PORT`] - default Sapp TCP port (7001)
//! - [`DEFAULT_TIMEOUT`] - default per-byte read timeout (5 seconds)

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Result, SappError};

/// Default Sapp TCP port on the MAS.
pub const DEFAULT_MAS_PORT: u16 = 7001;

/// Default timeout for read/write operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Spacing between connection progress checks.
const ATTEMPT_SPACING: Duration = Duration::from_millis(10);

/// Maximum number of progress checks per connection cycle.
const ATTEMPT_LIMIT: u32 = 500;

/// Number of full connection cycles before giving up.
const CONNECT_RETRIES: u32 = 3;

/// TCP transport for Sapp communication with a single MAS.
pub struct SappTransport {
    host: String,
    port: u16,
    timeout: Duration,
    stream: Option<TcpStream>,
    unreachable: bool,
}

impl SappTransport {
    /// Creates a transport for the given MAS endpoint without connecting.
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
            stream: None,
            unreachable: false,
        }
    }

    /// Opens the stream to the MAS.
    ///
    /// Each connection cycle is bounded by `ATTEMPT_LIMIT` progress checks
    /// spaced `ATTEMPT_SPACING` apart; the whole cycle is repeated up to
    /// `CONNECT_RETRIES` times. A cycle is issued as one blocking
    /// `connect_timeout` call carrying the full `ATTEMPT_LIMIT` x
    /// `ATTEMPT_SPACING` budget, which bounds the attempt identically to
    /// polling the socket at that spacing. Exhausting the budget marks the
    /// transport unreachable and closes any half-open socket.
    ///
    /// # Errors
    ///
    /// Returns [`SappError::Unreachable`] when the budget is exhausted, or
    /// an I/O error if the address cannot be resolved.
    pub fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            self.disconnect();
        }

        let addr = self.resolve()?;
        let cycle_budget = ATTEMPT_SPACING * ATTEMPT_LIMIT;

        for retry in 0..CONNECT_RETRIES {
            match TcpStream::connect_timeout(&addr, cycle_budget) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeout))?;
                    stream.set_write_timeout(Some(self.timeout))?;
                    stream.set_nodelay(true)?;
                    self.stream = Some(stream);
                    self.unreachable = false;
                    debug!(host = %self.host, port = self.port, "connected to MAS");
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        host = %self.host,
                        port = self.port,
                        retry,
                        error = %e,
                        "connection cycle failed"
                    );
                }
            }
        }

        self.unreachable = true;
        self.disconnect();
        warn!(host = %self.host, port = self.port, "unable to connect to MAS");
        Err(SappError::unreachable(self.host.clone(), self.port))
    }

    /// Closes the stream if open. Idempotent and infallible.
    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            // Shutdown failures only mean the peer is already gone.
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }

    /// Drops and reopens the connection.
    pub fn refresh(&mut self) -> Result<()> {
        debug!("connection refreshed");
        self.disconnect();
        self.connect()
    }

    /// Returns whether a stream is currently open.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some() && !self.unreachable
    }

    /// Returns whether the connection attempt budget was ever exhausted.
    ///
    /// Distinct from "not yet connected": this only flips after a full
    /// failed connect, and clears on the next successful one.
    pub fn is_unreachable(&self) -> bool {
        self.unreachable
    }

    /// Returns the configured per-byte timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns a mutable handle to the open stream.
    ///
    /// # Errors
    ///
    /// Returns [`SappError::NotConnected`] if no stream is open.
    pub fn stream_mut(&mut self) -> Result<&mut TcpStream> {
        self.stream.as_mut().ok_or(SappError::NotConnected)
    }

    fn resolve(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                SappError::Io(std::io::Error::new(
                    ErrorKind::AddrNotAvailable,
                    format!("no address for {}:{}", self.host, self.port),
                ))
            })
    }
}

impl std::fmt::Debug for SappTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SappTransport")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("connected", &self.stream.is_some())
            .field("unreachable", &self.unreachable)
            .finish()
    }
}
