//! Error types for the Sapp protocol engine.

use std::io;
use thiserror::Error;

/// Result type alias for Sapp operations.
pub type Result<T> = std::result::Result<T, SappError>;

/// Errors that can occur while talking to a MAS over the Sapp protocol.
#[derive(Debug, Error)]
pub enum SappError {
    /// The MAS could not be reached within the connection attempt budget.
    #[error("MAS unreachable at {host}:{port}")]
    Unreachable {
        /// Host the connection was attempted against.
        host: String,
        /// TCP port the connection was attempted against.
        port: u16,
    },

    /// An operation was attempted while the transport has no open stream.
    #[error("not connected to the MAS")]
    NotConnected,

    /// A single-byte read exceeded the configured timeout.
    #[error("communication timeout")]
    Timeout,

    /// I/O error during communication.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The MAS rejected the request outright with a NAK before framing a response.
    #[error("NAK received")]
    Nak,

    /// The first response byte was neither ACK nor NAK.
    #[error("unexpected return code 0x{0:02X}")]
    UnexpectedByte(u8),

    /// The byte following ACK was not the STX preamble.
    #[error("invalid preamble 0x{0:02X}")]
    BadPreamble(u8),

    /// The response checksum did not match the received payload.
    #[error("invalid checksum: expected 0x{expected:04X}, computed 0x{computed:04X}")]
    BadChecksum {
        /// Checksum carried by the response frame (status already subtracted).
        expected: u16,
        /// Checksum computed over the received payload.
        computed: u16,
    },

    /// The MAS processed the frame but reported a device-level failure.
    #[error("device error: {0}")]
    Device(DeviceCode),

    /// An address outside the valid range for its register bank.
    #[error("invalid {kind} address {address}, valid range is 0..={max}")]
    InvalidAddress {
        /// Register bank the address was meant for.
        kind: &'static str,
        /// The rejected address.
        address: u32,
        /// Highest valid address for this bank.
        max: u32,
    },
}

impl SappError {
    /// Creates a new `Unreachable` error.
    pub fn unreachable(host: impl Into<String>, port: u16) -> Self {
        Self::Unreachable {
            host: host.into(),
            port,
        }
    }

    /// Creates a new `BadChecksum` error.
    pub fn bad_checksum(expected: u16, computed: u16) -> Self {
        Self::BadChecksum { expected, computed }
    }

    /// Creates a new `InvalidAddress` error.
    pub fn invalid_address(kind: &'static str, address: u32, max: u32) -> Self {
        Self::InvalidAddress { kind, address, max }
    }

    /// Returns whether this error indicates line corruption or desync,
    /// i.e. the connection should be refreshed before retrying.
    pub fn is_line_error(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::Io(_)
                | Self::Nak
                | Self::UnexpectedByte(_)
                | Self::BadPreamble(_)
                | Self::BadChecksum { .. }
        )
    }
}

/// Device-level result codes reported by the MAS when a response carries
/// a failure status.
///
/// The code travels in the response data as a word; only the low byte is
/// significant. Codes not listed by the protocol documentation map to
/// [`DeviceCode::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCode {
    /// 0x80 - command processed successfully.
    Processed,
    /// 0x81 - variable address over range.
    AddressOverRange,
    /// 0x82 - error writing the address.
    ErrorWritingAddress,
    /// 0x83 - address already programmed.
    AddressAlreadyProgrammed,
    /// 0x84 - command not implemented by this MAS.
    CommandNotImplemented,
    /// 0x87 - module address over range.
    ModuleAddressOverRange,
    /// 0x88 - no user program loaded.
    NoUserProgram,
    /// 0x89 - no program module.
    NoProgramModule,
    /// 0x8A - value over range.
    ValueOverRange,
    /// 0x8B - slave address not found.
    SlaveAddressNotFound,
    /// 0x8C - no value to return.
    NoValueToReturn,
    /// 0x8D - command not processed.
    CommandNotProcessed,
    /// 0x8E - command not allowed while the MAS is in run mode.
    CommandNotAllowedInRun,
    /// Any code outside the documented set.
    Unknown(u8),
}

impl DeviceCode {
    /// Maps a raw device code byte to its enumerated value.
    pub fn from_code(code: u8) -> Self {
        match code {
            0x80 => Self::Processed,
            0x81 => Self::AddressOverRange,
            0x82 => Self::ErrorWritingAddress,
            0x83 => Self::AddressAlreadyProgrammed,
            0x84 => Self::CommandNotImplemented,
            0x87 => Self::ModuleAddressOverRange,
            0x88 => Self::NoUserProgram,
            0x89 => Self::NoProgramModule,
            0x8A => Self::ValueOverRange,
            0x8B => Self::SlaveAddressNotFound,
            0x8C => Self::NoValueToReturn,
            0x8D => Self::CommandNotProcessed,
            0x8E => Self::CommandNotAllowedInRun,
            other => Self::Unknown(other),
        }
    }
}

impl std::fmt::Display for DeviceCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Processed => write!(f, "command processed"),
            Self::AddressOverRange => write!(f, "address over range"),
            Self::ErrorWritingAddress => write!(f, "error writing address"),
            Self::AddressAlreadyProgrammed => write!(f, "address already programmed"),
            Self::CommandNotImplemented => write!(f, "command not implemented"),
            Self::ModuleAddressOverRange => write!(f, "module address over range"),
            Self::NoUserProgram => write!(f, "no user program"),
            Self::NoProgramModule => write!(f, "no program module"),
            Self::ValueOverRange => write!(f, "value over range"),
            Self::SlaveAddressNotFound => write!(f, "slave address not found"),
            Self::NoValueToReturn => write!(f, "no value to return"),
            Self::CommandNotProcessed => write!(f, "command not processed"),
            Self::CommandNotAllowedInRun => write!(f, "command not allowed in run"),
            Self::Unknown(code) => write!(f, "unknown device code 0x{code:02X}"),
        }
    }
}
