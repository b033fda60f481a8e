//! Wire-level frame building blocks for the Sapp protocol.
//!
//! A request frame is `STX | payload | ETX | checksum_hi | checksum_lo`,
//! where the payload is the opcode byte followed by its arguments encoded
//! as hex-ASCII (each logical byte becomes two ASCII hex digits on the
//! wire). The checksum is the 16-bit sum of the unframed payload bytes,
//! each treated as unsigned, transmitted high byte first.
//!
//! This module is pure transformation: no I/O, no protocol state.
//!
//! # Example
//!
//! ```
//! use picnet_sapp::codec::{compose_frame, checksum, STX, ETX};
//!
//! let payload = [0x7C, b'0', b'0', b'6', b'4'];
//! let frame = compose_frame(&payload);
//!
//! assert_eq!(frame[0], STX);
//! assert_eq!(frame[frame.len() - 3], ETX);
//! let sum = checksum(&payload);
//! assert_eq!(frame[frame.len() - 2], (sum >> 8) as u8);
//! assert_eq!(frame[frame.len() - 1], (sum & 0xFF) as u8);
//! ```

/// Start-of-frame marker.
pub const STX: u8 = 0x02;
/// End-of-frame marker.
pub const ETX: u8 = 0x03;
/// Positive acknowledge, first byte of every accepted response.
pub const ACK: u8 = 0x06;
/// Negative acknowledge, sent instead of a response frame on outright rejection.
pub const NAK: u8 = 0x15;

/// Computes the 16-bit checksum over an unframed payload.
///
/// Each byte contributes its unsigned value; STX/ETX are never included.
pub fn checksum(payload: &[u8]) -> u16 {
    payload
        .iter()
        .fold(0u16, |sum, &b| sum.wrapping_add(u16::from(b)))
}

/// Wraps a payload into a complete request frame.
///
/// # Example
///
/// ```
/// use picnet_sapp::codec::compose_frame;
///
/// // Differential virtual read: bare opcode, no arguments.
/// let frame = compose_frame(&[0x82]);
/// assert_eq!(frame, vec![0x02, 0x82, 0x03, 0x00, 0x82]);
/// ```
pub fn compose_frame(payload: &[u8]) -> Vec<u8> {
    let sum = checksum(payload);
    let mut frame = Vec::with_capacity(payload.len() + 4);
    frame.push(STX);
    frame.extend_from_slice(payload);
    frame.push(ETX);
    frame.push((sum >> 8) as u8);
    frame.push((sum & 0xFF) as u8);
    frame
}

/// Encodes a nibble (0-15) as its ASCII hex digit, uppercase.
#[inline]
pub fn encode_nibble(value: u8) -> u8 {
    let value = value & 0x0F;
    if value < 10 {
        b'0' + value
    } else {
        b'A' + value - 10
    }
}

/// Decodes an ASCII hex digit back to its nibble value.
///
/// Accepts both uppercase and lowercase digits; any other byte decodes
/// to zero, matching the permissive device behavior.
#[inline]
pub fn decode_nibble(value: u8) -> u8 {
    match value {
        b'0'..=b'9' => value - b'0',
        b'A'..=b'F' => value - b'A' + 10,
        b'a'..=b'f' => value - b'a' + 10,
        _ => 0,
    }
}

/// Encodes one logical byte as two hex-ASCII bytes, high nibble first.
pub fn encode_byte(value: u8) -> [u8; 2] {
    [encode_nibble(value >> 4), encode_nibble(value)]
}

/// Encodes a 16-bit word as four hex-ASCII bytes, high nibble first.
pub fn encode_word(value: u16) -> [u8; 4] {
    [
        encode_nibble((value >> 12) as u8),
        encode_nibble((value >> 8) as u8),
        encode_nibble((value >> 4) as u8),
        encode_nibble(value as u8),
    ]
}

/// Decodes a run of hex-ASCII digits into an integer, most significant
/// digit first. Digits beyond the slice length are simply not consumed.
pub fn decode_digits(digits: &[u8]) -> u32 {
    digits
        .iter()
        .fold(0u32, |acc, &d| (acc << 4) | u32::from(decode_nibble(d)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_empty() {
        assert_eq!(checksum(&[]), 0);
    }

    #[test]
    fn test_checksum_unsigned_bytes() {
        // Bytes above 0x7F must count as unsigned values.
        assert_eq!(checksum(&[0x82]), 0x82);
        assert_eq!(checksum(&[0xFF, 0xFF]), 0x1FE);
    }

    #[test]
    fn test_compose_frame_markers_and_checksum() {
        let payload = [0x74, b'0', b'A'];
        let frame = compose_frame(&payload);
        assert_eq!(frame[0], STX);
        assert_eq!(&frame[1..4], &payload);
        assert_eq!(frame[4], ETX);
        let sum = checksum(&payload);
        assert_eq!(frame[5], (sum >> 8) as u8);
        assert_eq!(frame[6], (sum & 0xFF) as u8);
    }

    #[test]
    fn test_hex_ascii_roundtrip_all_bytes() {
        for b in 0u8..=255 {
            let encoded = encode_byte(b);
            let decoded = (decode_nibble(encoded[0]) << 4) | decode_nibble(encoded[1]);
            assert_eq!(decoded, b);
        }
    }

    #[test]
    fn test_decode_nibble_accepts_both_cases() {
        assert_eq!(decode_nibble(b'a'), 10);
        assert_eq!(decode_nibble(b'A'), 10);
        assert_eq!(decode_nibble(b'f'), 15);
        assert_eq!(decode_nibble(b'F'), 15);
        assert_eq!(decode_nibble(b'7'), 7);
    }

    #[test]
    fn test_encode_word() {
        assert_eq!(encode_word(0x09C4), [b'0', b'9', b'C', b'4']);
        assert_eq!(encode_word(0xFFFF), [b'F', b'F', b'F', b'F']);
        assert_eq!(encode_word(0), [b'0', b'0', b'0', b'0']);
    }

    #[test]
    fn test_decode_digits() {
        assert_eq!(decode_digits(b"09C4"), 0x09C4);
        assert_eq!(decode_digits(b"ff"), 0xFF);
        assert_eq!(decode_digits(b""), 0);
    }
}
