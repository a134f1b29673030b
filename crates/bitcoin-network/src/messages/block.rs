//! Chain payloads.
//!
//! The engine frames and routes these for derived applications; it does not
//! validate chain semantics. `block` and `tx` bodies are carried opaquely.

use crate::error::{NetworkError, NetworkResult};
use crate::messages::primitives::{need, read_compact_size, read_hash, write_compact_size};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use sha2::{Digest, Sha256};

/// Most headers accepted in a single `headers` message.
pub const MAX_HEADERS: u64 = 2000;

/// Most locator hashes accepted in a `getheaders`/`getblocks` request.
const MAX_LOCATORS: u64 = 2000;

/// An 80-byte block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u32,
    pub previous: [u8; 32],
    pub merkle_root: [u8; 32],
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub(crate) fn decode(buf: &mut Bytes) -> NetworkResult<Self> {
        need(buf, 80)?;
        Ok(Self {
            version: buf.get_u32_le(),
            previous: read_hash(buf)?,
            merkle_root: read_hash(buf)?,
            timestamp: buf.get_u32_le(),
            bits: buf.get_u32_le(),
            nonce: buf.get_u32_le(),
        })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.version);
        buf.put_slice(&self.previous);
        buf.put_slice(&self.merkle_root);
        buf.put_u32_le(self.timestamp);
        buf.put_u32_le(self.bits);
        buf.put_u32_le(self.nonce);
    }

    /// The header's block hash: double-SHA256 of its 80-byte serialization.
    pub fn hash(&self) -> [u8; 32] {
        let mut buf = BytesMut::with_capacity(80);
        self.encode(&mut buf);
        let digest = Sha256::digest(Sha256::digest(&buf));
        digest.into()
    }
}

/// The `headers` announcement.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Headers {
    pub headers: Vec<BlockHeader>,
}

impl Headers {
    pub(crate) fn decode(buf: &mut Bytes) -> NetworkResult<Self> {
        let count = read_compact_size(buf)?;
        if count > MAX_HEADERS {
            return Err(NetworkError::InvalidMessage);
        }

        let mut headers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let header = BlockHeader::decode(buf)?;

            // Each entry carries a transaction count, zero by definition.
            if read_compact_size(buf)? != 0 {
                return Err(NetworkError::InvalidMessage);
            }

            headers.push(header);
        }

        Ok(Self { headers })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        write_compact_size(buf, self.headers.len() as u64);
        for header in &self.headers {
            header.encode(buf);
            write_compact_size(buf, 0);
        }
    }
}

/// Shared body of `getheaders` and `getblocks`: a block locator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GetHeaders {
    /// Sender's protocol version, repeated by protocol definition.
    pub version: u32,
    /// Known block hashes, newest first with increasing gaps.
    pub start_hashes: Vec<[u8; 32]>,
    /// Stop at this hash, or all-zero for "as many as allowed".
    pub stop_hash: [u8; 32],
}

impl GetHeaders {
    pub(crate) fn decode(buf: &mut Bytes) -> NetworkResult<Self> {
        need(buf, 4)?;
        let version = buf.get_u32_le();

        let count = read_compact_size(buf)?;
        if count > MAX_LOCATORS {
            return Err(NetworkError::InvalidMessage);
        }

        let mut start_hashes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            start_hashes.push(read_hash(buf)?);
        }

        let stop_hash = read_hash(buf)?;
        Ok(Self { version, start_hashes, stop_hash })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.version);
        write_compact_size(buf, self.start_hashes.len() as u64);
        for hash in &self.start_hashes {
            buf.put_slice(hash);
        }
        buf.put_slice(&self.stop_hash);
    }
}

/// The `getblocks` request. Same locator body as `getheaders`.
pub type GetBlocks = GetHeaders;

/// The `sendheaders` announcement preference. Empty payload, bip130 (70012).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendHeaders;

/// The `feefilter` minimum fee-rate announcement. bip133 (70013).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeeFilter {
    /// Minimum fee rate in satoshis per kilobyte.
    pub minimum_fee: u64,
}

impl FeeFilter {
    pub(crate) fn decode(buf: &mut Bytes) -> NetworkResult<Self> {
        need(buf, 8)?;
        Ok(Self { minimum_fee: buf.get_u64_le() })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.minimum_fee);
    }
}

/// The `sendcmpct` compact block negotiation. bip152 (70014).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendCompact {
    pub high_bandwidth: bool,
    pub version: u64,
}

impl SendCompact {
    pub(crate) fn decode(buf: &mut Bytes) -> NetworkResult<Self> {
        need(buf, 9)?;
        Ok(Self {
            high_bandwidth: buf.get_u8() != 0,
            version: buf.get_u64_le(),
        })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.high_bandwidth as u8);
        buf.put_u64_le(self.version);
    }
}

/// A raw `block` body, routed without interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Block {
    pub payload: Bytes,
}

/// A raw `tx` body, routed without interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transaction {
    pub payload: Bytes,
}
