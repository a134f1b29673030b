//! Message framing codec.
//!
//! Encodes and decodes framed messages for a single channel. The codec holds
//! the channel's live negotiated version: payload layout and message
//! availability both depend on it, and the handshake lowers it mid-stream.

use crate::error::{NetworkError, NetworkResult};
use crate::messages::{
    checksum, Command, Message, MessageHeading, HEADING_SIZE, MAX_PAYLOAD,
};
use bytes::{Buf, BytesMut};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio_util::codec::{Decoder, Encoder};

/// Codec for one channel's message stream.
pub struct MessageCodec {
    /// Network identifier expected in every heading.
    magic: u32,
    /// Live negotiated protocol version, shared with the channel.
    version: Arc<AtomicU32>,
}

impl MessageCodec {
    pub fn new(magic: u32, version: Arc<AtomicU32>) -> Self {
        Self { magic, version }
    }

    fn version(&self) -> u32 {
        self.version.load(Ordering::Relaxed)
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = NetworkError;

    fn decode(&mut self, src: &mut BytesMut) -> NetworkResult<Option<Message>> {
        if src.len() < HEADING_SIZE {
            return Ok(None);
        }

        // Parse the heading without consuming, the payload may not be here yet.
        let mut heading_bytes = bytes::Bytes::copy_from_slice(&src[..HEADING_SIZE]);
        let heading = MessageHeading::decode(&mut heading_bytes)?;

        // The magic and size are validated before any payload is read.
        if heading.magic != self.magic {
            return Err(NetworkError::InvalidMagic);
        }

        let length = heading.payload_length as usize;
        if length > MAX_PAYLOAD {
            return Err(NetworkError::OversizedPayload);
        }

        let total = HEADING_SIZE + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADING_SIZE);
        let payload = src.split_to(length).freeze();

        if !heading.verify_checksum(&payload) {
            return Err(NetworkError::InvalidChecksum);
        }

        let name = heading.command_text()?;
        let command = Command::from_text(name).ok_or(NetworkError::UnknownMessage)?;

        Message::deserialize(command, self.version(), payload).map(Some)
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = NetworkError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> NetworkResult<()> {
        let version = self.version();
        let mut payload = BytesMut::new();
        item.serialize(version, &mut payload)?;

        if payload.len() > MAX_PAYLOAD {
            return Err(NetworkError::OversizedPayload);
        }

        let heading = MessageHeading {
            magic: self.magic,
            command: item.command().to_bytes(),
            payload_length: payload.len() as u32,
            checksum: checksum(&payload),
        };

        dst.reserve(HEADING_SIZE + payload.len());
        heading.encode(dst);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{level, Ping, Pong};

    const MAGIC: u32 = 0xd9b4bef9;

    fn codec(version: u32) -> MessageCodec {
        MessageCodec::new(MAGIC, Arc::new(AtomicU32::new(version)))
    }

    #[test]
    fn test_round_trip() {
        let mut codec = codec(level::BIP61);
        let message = Message::Ping(Ping::with_nonce(42));

        let mut buf = BytesMut::new();
        codec.encode(message.clone(), &mut buf).unwrap();
        assert_eq!(buf.len(), HEADING_SIZE + 8);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, message);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_waits() {
        let mut codec = codec(level::BIP61);
        let mut buf = BytesMut::new();
        codec.encode(Message::Pong(Pong { nonce: 1 }), &mut buf).unwrap();

        let mut partial = buf.split_to(HEADING_SIZE + 3);
        let _ = partial.split_off(HEADING_SIZE + 2);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn test_invalid_magic_fails_without_payload() {
        let mut codec = codec(level::BIP61);

        // A heading that claims a large payload which never arrives; the
        // magic check must fail before the payload is awaited.
        let heading = MessageHeading {
            magic: 0,
            command: Command::Ping.to_bytes(),
            payload_length: 1_000_000,
            checksum: 0,
        };
        let mut buf = BytesMut::new();
        heading.encode(&mut buf);

        assert_eq!(codec.decode(&mut buf), Err(NetworkError::InvalidMagic));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let mut codec = codec(level::BIP61);

        let heading = MessageHeading {
            magic: MAGIC,
            command: Command::Block.to_bytes(),
            payload_length: (MAX_PAYLOAD + 1) as u32,
            checksum: 0,
        };
        let mut buf = BytesMut::new();
        heading.encode(&mut buf);

        assert_eq!(codec.decode(&mut buf), Err(NetworkError::OversizedPayload));
    }

    #[test]
    fn test_bad_checksum_rejected() {
        let mut codec = codec(level::BIP61);
        let mut buf = BytesMut::new();
        codec.encode(Message::Ping(Ping::with_nonce(42)), &mut buf).unwrap();

        // Corrupt one payload byte.
        let last = buf.len() - 1;
        buf[last] ^= 0xff;

        assert_eq!(codec.decode(&mut buf), Err(NetworkError::InvalidChecksum));
    }

    #[test]
    fn test_unknown_command_rejected() {
        let mut codec = codec(level::BIP61);

        let heading = MessageHeading {
            magic: MAGIC,
            command: crate::messages::pad_command("wtfmessage"),
            payload_length: 0,
            checksum: checksum(&[]),
        };
        let mut buf = BytesMut::new();
        heading.encode(&mut buf);

        assert_eq!(codec.decode(&mut buf), Err(NetworkError::UnknownMessage));
    }

    #[test]
    fn test_negotiated_version_gates_decode() {
        let version = Arc::new(AtomicU32::new(level::BIP61));
        let mut codec = MessageCodec::new(MAGIC, version.clone());

        let mut buf = BytesMut::new();
        codec.encode(Message::Pong(Pong { nonce: 9 }), &mut buf).unwrap();

        // Lower the negotiated version below bip31: the same frame is now
        // an unknown message.
        version.store(level::MINIMUM_PROTOCOL, Ordering::Relaxed);
        assert_eq!(codec.decode(&mut buf), Err(NetworkError::UnknownMessage));
    }
}
