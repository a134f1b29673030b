//! Message heading.
//!
//! Every message frame opens with a 24-byte heading:
//!
//! ```text
//! +-----------+--------------+---------------+--------------+
//! | magic (4) | command (12) | length (4 LE) | checksum (4) |
//! +-----------+--------------+---------------+--------------+
//! | payload (length bytes)                              ... |
//! +----------------------------------------------------------
//! ```
//!
//! The command is ASCII, null-padded. The checksum is the first four bytes of
//! SHA256(SHA256(payload)), read as a little-endian u32.

use crate::error::{NetworkError, NetworkResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use sha2::{Digest, Sha256};

/// Serialized heading size.
pub const HEADING_SIZE: usize = 24;

/// Largest accepted payload for any message.
pub const MAX_PAYLOAD: usize = 32 * 1024 * 1024;

/// Decoded message heading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeading {
    /// Network identifier.
    pub magic: u32,
    /// Null-padded ASCII command.
    pub command: [u8; 12],
    /// Payload length in bytes.
    pub payload_length: u32,
    /// First four bytes of the double-SHA256 of the payload.
    pub checksum: u32,
}

impl MessageHeading {
    /// Build a heading for the given payload.
    pub fn for_payload(magic: u32, command: [u8; 12], payload: &[u8]) -> Self {
        Self {
            magic,
            command,
            payload_length: payload.len() as u32,
            checksum: checksum(payload),
        }
    }

    /// Read a heading from exactly [`HEADING_SIZE`] buffered bytes.
    pub fn decode(buf: &mut Bytes) -> NetworkResult<Self> {
        if buf.remaining() < HEADING_SIZE {
            return Err(NetworkError::InvalidHeading);
        }

        let magic = buf.get_u32_le();
        let mut command = [0u8; 12];
        buf.copy_to_slice(&mut command);
        let payload_length = buf.get_u32_le();
        let checksum = buf.get_u32_le();

        Ok(Self { magic, command, payload_length, checksum })
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(HEADING_SIZE);
        buf.put_u32_le(self.magic);
        buf.put_slice(&self.command);
        buf.put_u32_le(self.payload_length);
        buf.put_u32_le(self.checksum);
    }

    /// The command with null padding stripped, if it is ASCII.
    pub fn command_text(&self) -> NetworkResult<&str> {
        let end = self.command.iter().position(|&b| b == 0).unwrap_or(12);

        // Padding must be all null and the name non-empty ASCII.
        if end == 0 || self.command[end..].iter().any(|&b| b != 0) {
            return Err(NetworkError::InvalidHeading);
        }

        let text = std::str::from_utf8(&self.command[..end])
            .map_err(|_| NetworkError::InvalidHeading)?;

        if !text.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(NetworkError::InvalidHeading);
        }

        Ok(text)
    }

    /// Whether the checksum matches the payload.
    pub fn verify_checksum(&self, payload: &[u8]) -> bool {
        self.checksum == checksum(payload)
    }
}

/// Null-pad a command name to its 12-byte wire form.
pub fn pad_command(name: &str) -> [u8; 12] {
    debug_assert!(name.len() <= 12);
    let mut command = [0u8; 12];
    command[..name.len()].copy_from_slice(name.as_bytes());
    command
}

/// First four bytes of SHA256(SHA256(payload)), little endian.
pub fn checksum(payload: &[u8]) -> u32 {
    let hash = Sha256::digest(Sha256::digest(payload));
    u32::from_le_bytes([hash[0], hash[1], hash[2], hash[3]])
}
