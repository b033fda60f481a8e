//! Sapp command set and request serialization.
//!
//! Each command variant knows its opcode byte and how to serialize its
//! arguments as hex-ASCII. Module addresses (inputs, outputs, user alarms)
//! travel as one logical byte; virtual variable addresses and values travel
//! as one 16-bit word.
//!
//! Opcodes:
//!
//! | Opcode | Command | Response data |
//! |--------|---------|---------------|
//! | `0x70` | [`ReadUserAlarm`](SappCommand::ReadUserAlarm) | single word |
//! | `0x72` | [`ReadUserAlarms32`](SappCommand::ReadUserAlarms32) | byte array |
//! | `0x74` | [`ReadInput`](SappCommand::ReadInput) | single word |
//! | `0x75` | [`ReadOutput`](SappCommand::ReadOutput) | single word |
//! | `0x7C` | [`ReadVirtual`](SappCommand::ReadVirtual) | single word |
//! | `0x7D` | [`WriteVirtual`](SappCommand::WriteVirtual) | none |
//! | `0x80` | [`ReadChangedOutputs`](SappCommand::ReadChangedOutputs) | byte-keyed word map |
//! | `0x81` | [`ReadChangedInputs`](SappCommand::ReadChangedInputs) | byte-keyed word map |
//! | `0x82` | [`ReadChangedVirtuals`](SappCommand::ReadChangedVirtuals) | word-keyed word map |
//!
//! # Example
//!
//! ```
//! use picnet_sapp::SappCommand;
//!
//! let cmd = SappCommand::ReadVirtual(100);
//! assert_eq!(cmd.opcode(), 0x7C);
//! assert_eq!(cmd.payload(), vec![0x7C, b'0', b'0', b'6', b'4']);
//! ```

use crate::codec::{compose_frame, encode_byte, encode_word};

/// A single request to the MAS.
///
/// A command is single-use per execution attempt: serialization is pure,
/// and the response produced by an attempt belongs to that attempt alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SappCommand {
    /// Reads the status word of one user-defined alarm.
    ReadUserAlarm(u8),
    /// Reads the status of up to 32 user-defined alarms starting at an index.
    ReadUserAlarms32 {
        /// First alarm index.
        start: u8,
        /// Number of alarms to read.
        count: u8,
    },
    /// Reads the current word of one input module.
    ReadInput(u8),
    /// Reads the current word of one output module.
    ReadOutput(u8),
    /// Reads the current value of one virtual variable. Does not take
    /// advantage of differential retrieval.
    ReadVirtual(u16),
    /// Sets a virtual variable to the given value.
    WriteVirtual {
        /// Virtual variable address.
        address: u16,
        /// Value to write.
        value: u16,
    },
    /// Reads every output word that changed since the previous differential read.
    ReadChangedOutputs,
    /// Reads every input word that changed since the previous differential read.
    ReadChangedInputs,
    /// Reads every virtual variable that changed since the previous differential read.
    ReadChangedVirtuals,
}

impl SappCommand {
    /// Returns the opcode byte of this command.
    pub fn opcode(&self) -> u8 {
        match self {
            Self::ReadUserAlarm(_) => 0x70,
            Self::ReadUserAlarms32 { .. } => 0x72,
            Self::ReadInput(_) => 0x74,
            Self::ReadOutput(_) => 0x75,
            Self::ReadVirtual(_) => 0x7C,
            Self::WriteVirtual { .. } => 0x7D,
            Self::ReadChangedOutputs => 0x80,
            Self::ReadChangedInputs => 0x81,
            Self::ReadChangedVirtuals => 0x82,
        }
    }

    /// Serializes the unframed payload: opcode followed by hex-ASCII arguments.
    pub fn payload(&self) -> Vec<u8> {
        let mut payload = vec![self.opcode()];
        match *self {
            Self::ReadUserAlarm(alarm) => payload.extend_from_slice(&encode_byte(alarm)),
            Self::ReadUserAlarms32 { start, count } => {
                payload.extend_from_slice(&encode_byte(start));
                payload.extend_from_slice(&encode_byte(count));
            }
            Self::ReadInput(addr) | Self::ReadOutput(addr) => {
                payload.extend_from_slice(&encode_byte(addr));
            }
            Self::ReadVirtual(addr) => payload.extend_from_slice(&encode_word(addr)),
            Self::WriteVirtual { address, value } => {
                payload.extend_from_slice(&encode_word(address));
                payload.extend_from_slice(&encode_word(value));
            }
            Self::ReadChangedOutputs | Self::ReadChangedInputs | Self::ReadChangedVirtuals => {}
        }
        payload
    }

    /// Serializes the complete wire frame, ready to send.
    pub fn frame(&self) -> Vec<u8> {
        compose_frame(&self.payload())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{checksum, ETX, STX};

    #[test]
    fn test_opcodes() {
        assert_eq!(SappCommand::ReadUserAlarm(1).opcode(), 0x70);
        assert_eq!(
            SappCommand::ReadUserAlarms32 { start: 0, count: 8 }.opcode(),
            0x72
        );
        assert_eq!(SappCommand::ReadInput(1).opcode(), 0x74);
        assert_eq!(SappCommand::ReadOutput(1).opcode(), 0x75);
        assert_eq!(SappCommand::ReadVirtual(1).opcode(), 0x7C);
        assert_eq!(
            SappCommand::WriteVirtual {
                address: 1,
                value: 0
            }
            .opcode(),
            0x7D
        );
        assert_eq!(SappCommand::ReadChangedOutputs.opcode(), 0x80);
        assert_eq!(SappCommand::ReadChangedInputs.opcode(), 0x81);
        assert_eq!(SappCommand::ReadChangedVirtuals.opcode(), 0x82);
    }

    #[test]
    fn test_read_input_payload() {
        // Module addresses are encoded as one logical byte (two hex digits).
        assert_eq!(SappCommand::ReadInput(0x0A).payload(), vec![0x74, b'0', b'A']);
        assert_eq!(SappCommand::ReadOutput(250).payload(), vec![0x75, b'F', b'A']);
    }

    #[test]
    fn test_read_virtual_payload() {
        // Virtual addresses are encoded as one word (four hex digits).
        assert_eq!(
            SappCommand::ReadVirtual(2500).payload(),
            vec![0x7C, b'0', b'9', b'C', b'4']
        );
    }

    #[test]
    fn test_write_virtual_payload() {
        assert_eq!(
            SappCommand::WriteVirtual {
                address: 0x0102,
                value: 0xBEEF
            }
            .payload(),
            vec![0x7D, b'0', b'1', b'0', b'2', b'B', b'E', b'E', b'F']
        );
    }

    #[test]
    fn test_differential_reads_have_bare_payload() {
        assert_eq!(SappCommand::ReadChangedInputs.payload(), vec![0x81]);
        assert_eq!(SappCommand::ReadChangedOutputs.payload(), vec![0x80]);
        assert_eq!(SappCommand::ReadChangedVirtuals.payload(), vec![0x82]);
    }

    #[test]
    fn test_user_alarm_payloads() {
        assert_eq!(
            SappCommand::ReadUserAlarm(0x12).payload(),
            vec![0x70, b'1', b'2']
        );
        assert_eq!(
            SappCommand::ReadUserAlarms32 {
                start: 0x01,
                count: 32
            }
            .payload(),
            vec![0x72, b'0', b'1', b'2', b'0']
        );
    }

    #[test]
    fn test_write_virtual_frame_hex_dump() {
        let frame = SappCommand::WriteVirtual {
            address: 100,
            value: 1,
        }
        .frame();
        // STX, opcode, "00640001", ETX, checksum 0x0208 high byte first.
        assert_eq!(hex::encode_upper(&frame), "027D3030363430303031030208");
    }

    #[test]
    fn test_frame_wraps_payload() {
        let cmd = SappCommand::ReadChangedVirtuals;
        let frame = cmd.frame();
        assert_eq!(frame[0], STX);
        assert_eq!(frame[1], 0x82);
        assert_eq!(frame[2], ETX);
        let sum = checksum(&[0x82]);
        assert_eq!(frame[3], (sum >> 8) as u8);
        assert_eq!(frame[4], (sum & 0xFF) as u8);
    }
}
