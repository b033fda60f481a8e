//! Command execution: frame transmission and bounded response reads.
//!
//! The executor sends one command's framed bytes over the transport and
//! then reads the response frame byte by byte. The protocol carries no
//! length prefix - the end of the payload is marked by ETX - so the read
//! is deliberately self-delimiting, with the timeout bounding each byte
//! wait rather than the whole frame. This matches observed MAS behavior,
//! where a slow device trickles a frame but never stalls mid-byte for
//! long.
//!
//! Only one command is ever in flight on a connection: the protocol is
//! strictly request/response with no multiplexing.

use std::io::{ErrorKind, Read, Write};

use tracing::{trace, warn};

use crate::codec::{checksum, ACK, ETX, NAK, STX};
use crate::command::SappCommand;
use crate::error::{Result, SappError};
use crate::response::SappResponse;
use crate::transport::SappTransport;

/// Executes Sapp commands over a transport.
#[derive(Debug, Default)]
pub struct SappExecutor;

impl SappExecutor {
    /// Creates a new executor.
    pub fn new() -> Self {
        Self
    }

    /// Sends the command frame and reads back the structured response.
    ///
    /// # Errors
    ///
    /// - [`SappError::NotConnected`] if the transport has no open stream
    /// - [`SappError::Timeout`] if any single byte wait exceeds the
    ///   transport's timeout
    /// - [`SappError::Io`] on any other read/write failure
    /// - [`SappError::Nak`], [`SappError::UnexpectedByte`],
    ///   [`SappError::BadPreamble`] or [`SappError::BadChecksum`] on frame
    ///   decode failures
    pub fn execute(
        &self,
        command: &SappCommand,
        transport: &mut SappTransport,
    ) -> Result<SappResponse> {
        let frame = command.frame();
        let stream = transport.stream_mut()?;

        trace!(opcode = format_args!("0x{:02X}", command.opcode()), "sending command");
        stream.write_all(&frame).map_err(map_io)?;
        stream.flush().map_err(map_io)?;

        read_response(stream)
    }
}

/// Reads and validates one response frame from a byte stream.
///
/// Layout: `ACK | STX | status | payload... | ETX | checksum_hi | checksum_lo`.
/// The carried checksum includes the status byte, so validation subtracts
/// it before comparing against the payload sum.
pub(crate) fn read_response<R: Read>(reader: &mut R) -> Result<SappResponse> {
    let return_code = read_byte(reader)?;
    if return_code == NAK {
        warn!("NAK received");
        return Err(SappError::Nak);
    }
    if return_code != ACK {
        warn!(byte = format_args!("0x{return_code:02X}"), "unknown return code");
        return Err(SappError::UnexpectedByte(return_code));
    }

    let preamble = read_byte(reader)?;
    if preamble != STX {
        warn!(byte = format_args!("0x{preamble:02X}"), "invalid preamble");
        return Err(SappError::BadPreamble(preamble));
    }

    let status = read_byte(reader)?;

    let mut payload = Vec::new();
    loop {
        let b = read_byte(reader)?;
        if b == ETX {
            break;
        }
        payload.push(b);
    }

    let hi = read_byte(reader)?;
    let lo = read_byte(reader)?;
    let expected = (u16::from(hi) << 8 | u16::from(lo)).wrapping_sub(u16::from(status));
    let computed = checksum(&payload);
    if expected != computed {
        warn!(expected, computed, "invalid checksum");
        return Err(SappError::bad_checksum(expected, computed));
    }

    Ok(SappResponse::new(status, payload))
}

/// Reads exactly one byte, mapping timeout kinds onto [`SappError::Timeout`].
fn read_byte<R: Read>(reader: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    match reader.read(&mut buf) {
        Ok(0) => Err(SappError::Io(std::io::Error::new(
            ErrorKind::UnexpectedEof,
            "response not available",
        ))),
        Ok(_) => Ok(buf[0]),
        Err(e) => Err(map_io(e)),
    }
}

fn map_io(e: std::io::Error) -> SappError {
    match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => SappError::Timeout,
        _ => SappError::Io(e),
    }
}
