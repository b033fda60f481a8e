//! Sapp response representation and payload decoding.
//!
//! A response carries a one-byte status and the raw hex-ASCII data bytes
//! collected between the status byte and ETX. Status `0x00` means success;
//! any other status means the data encodes a device-level result code
//! (see [`DeviceCode`](crate::DeviceCode)).
//!
//! The decoding helpers interpret the data under the shape each command
//! expects: a single word, a raw byte array, or a sparse address-to-value
//! map for the differential reads.
//!
//! # Example
//!
//! ```
//! use picnet_sapp::SappResponse;
//!
//! // A successful read returning the word 0x0102.
//! let response = SappResponse::new(0x00, b"0102".to_vec());
//! assert!(response.is_success());
//! assert_eq!(response.as_word(), 0x0102);
//! ```

use std::collections::HashMap;

use crate::codec::decode_digits;
use crate::error::{DeviceCode, Result, SappError};

/// A decoded response frame: status byte plus raw hex-ASCII data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SappResponse {
    status: u8,
    data: Vec<u8>,
}

impl SappResponse {
    /// Creates a response from its status byte and raw data bytes.
    pub fn new(status: u8, data: Vec<u8>) -> Self {
        Self { status, data }
    }

    /// Returns the raw status byte.
    pub fn status(&self) -> u8 {
        self.status
    }

    /// Returns the raw hex-ASCII data bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns whether the status byte indicates success.
    pub fn is_success(&self) -> bool {
        self.status == 0x00
    }

    /// Returns the device-level result of the command.
    ///
    /// On failure the reason travels in the data as a word whose low byte
    /// is the device code.
    pub fn command_result(&self) -> DeviceCode {
        if self.is_success() {
            DeviceCode::Processed
        } else {
            DeviceCode::from_code(self.as_word() as u8)
        }
    }

    /// Validates the status and converts a failure into [`SappError::Device`].
    pub fn check_status(&self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(SappError::Device(self.command_result()))
        }
    }

    /// Decodes the first two data digits as a nibble-packed byte.
    pub fn as_byte(&self) -> u8 {
        let end = self.data.len().min(2);
        decode_digits(&self.data[..end]) as u8
    }

    /// Decodes the first four data digits as a 16-bit word.
    pub fn as_word(&self) -> u16 {
        let end = self.data.len().min(4);
        decode_digits(&self.data[..end]) as u16
    }

    /// Decodes the data as a byte array, two hex digits per byte.
    pub fn as_byte_array(&self) -> Vec<u8> {
        if self.data.len() < 2 {
            return Vec::new();
        }
        self.data
            .chunks(2)
            .map(|pair| decode_digits(pair) as u8)
            .collect()
    }

    /// Decodes the data as a word array, four hex digits per word.
    pub fn as_word_array(&self) -> Vec<u16> {
        if self.data.len() < 4 {
            return Vec::new();
        }
        self.data
            .chunks(4)
            .map(|quad| decode_digits(quad) as u16)
            .collect()
    }

    /// Decodes the data as a map keyed by one-byte addresses with word
    /// values, the shape of the changed-inputs and changed-outputs reads.
    pub fn as_byte_word_map(&self) -> HashMap<u16, u16> {
        self.data
            .chunks(6)
            .map(|chunk| {
                let split = chunk.len().min(2);
                let key = decode_digits(&chunk[..split]) as u16;
                let value = decode_digits(&chunk[split..]) as u16;
                (key, value)
            })
            .collect()
    }

    /// Decodes the data as a map keyed by word addresses with word values,
    /// the shape of the changed-virtuals read.
    pub fn as_word_word_map(&self) -> HashMap<u16, u16> {
        self.data
            .chunks(8)
            .map(|chunk| {
                let split = chunk.len().min(4);
                let key = decode_digits(&chunk[..split]) as u16;
                let value = decode_digits(&chunk[split..]) as u16;
                (key, value)
            })
            .collect()
    }
}
