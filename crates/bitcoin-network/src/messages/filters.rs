//! Filter payloads: bloom filters (bip37) and client filters (bip157).

use crate::error::{NetworkError, NetworkResult};
use crate::messages::block::BlockHeader;
use crate::messages::primitives::{need, read_compact_size, read_hash, read_var_bytes, write_compact_size, write_var_bytes};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Largest serialized bloom filter.
const MAX_FILTER: u64 = 36_000;

/// Most hash functions a bloom filter may request.
const MAX_HASH_FUNCTIONS: u32 = 50;

/// Most filter headers in one `cfheaders` reply.
const MAX_FILTER_HEADERS: u64 = 2000;

/// The `filterload` message. bip37 (70001).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterLoad {
    pub filter: Bytes,
    pub hash_functions: u32,
    pub tweak: u32,
    pub flags: u8,
}

impl FilterLoad {
    pub(crate) fn decode(buf: &mut Bytes) -> NetworkResult<Self> {
        let filter = read_var_bytes(buf, MAX_FILTER)?;
        need(buf, 9)?;
        let hash_functions = buf.get_u32_le();
        if hash_functions > MAX_HASH_FUNCTIONS {
            return Err(NetworkError::InvalidMessage);
        }
        let tweak = buf.get_u32_le();
        let flags = buf.get_u8();
        Ok(Self { filter, hash_functions, tweak, flags })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        write_var_bytes(buf, &self.filter);
        buf.put_u32_le(self.hash_functions);
        buf.put_u32_le(self.tweak);
        buf.put_u8(self.flags);
    }
}

/// The `filteradd` message. bip37 (70001).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterAdd {
    pub data: Bytes,
}

impl FilterAdd {
    const MAX_DATA: u64 = 520;

    pub(crate) fn decode(buf: &mut Bytes) -> NetworkResult<Self> {
        Ok(Self { data: read_var_bytes(buf, Self::MAX_DATA)? })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        write_var_bytes(buf, &self.data);
    }
}

/// The `filterclear` message. Empty payload, bip37 (70001).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilterClear;

/// The `merkleblock` message. bip37 (70001).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleBlock {
    pub header: BlockHeader,
    /// Transactions in the full block.
    pub transactions: u32,
    pub hashes: Vec<[u8; 32]>,
    pub flags: Bytes,
}

impl MerkleBlock {
    pub(crate) fn decode(buf: &mut Bytes) -> NetworkResult<Self> {
        let header = BlockHeader::decode(buf)?;
        need(buf, 4)?;
        let transactions = buf.get_u32_le();

        let count = read_compact_size(buf)?;
        if count > crate::messages::inventory::MAX_INVENTORY {
            return Err(NetworkError::InvalidMessage);
        }
        let mut hashes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            hashes.push(read_hash(buf)?);
        }

        let flags = read_var_bytes(buf, MAX_FILTER)?;
        Ok(Self { header, transactions, hashes, flags })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        buf.put_u32_le(self.transactions);
        write_compact_size(buf, self.hashes.len() as u64);
        for hash in &self.hashes {
            buf.put_slice(hash);
        }
        write_var_bytes(buf, &self.flags);
    }
}

/// The `getcfilters` request. bip157 (70015).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GetClientFilters {
    pub filter_type: u8,
    pub start_height: u32,
    pub stop_hash: [u8; 32],
}

impl GetClientFilters {
    pub(crate) fn decode(buf: &mut Bytes) -> NetworkResult<Self> {
        need(buf, 5)?;
        let filter_type = buf.get_u8();
        let start_height = buf.get_u32_le();
        let stop_hash = read_hash(buf)?;
        Ok(Self { filter_type, start_height, stop_hash })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.filter_type);
        buf.put_u32_le(self.start_height);
        buf.put_slice(&self.stop_hash);
    }
}

/// The `cfilter` reply. bip157 (70015).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientFilter {
    pub filter_type: u8,
    pub block_hash: [u8; 32],
    pub filter: Bytes,
}

impl ClientFilter {
    pub(crate) fn decode(buf: &mut Bytes) -> NetworkResult<Self> {
        need(buf, 1)?;
        let filter_type = buf.get_u8();
        let block_hash = read_hash(buf)?;
        let filter = read_var_bytes(buf, MAX_FILTER)?;
        Ok(Self { filter_type, block_hash, filter })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.filter_type);
        buf.put_slice(&self.block_hash);
        write_var_bytes(buf, &self.filter);
    }
}

/// The `getcfheaders` request. bip157 (70015).
pub type GetClientFilterHeaders = GetClientFilters;

/// The `cfheaders` reply. bip157 (70015).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientFilterHeaders {
    pub filter_type: u8,
    pub stop_hash: [u8; 32],
    pub previous_header: [u8; 32],
    pub filter_hashes: Vec<[u8; 32]>,
}

impl ClientFilterHeaders {
    pub(crate) fn decode(buf: &mut Bytes) -> NetworkResult<Self> {
        need(buf, 1)?;
        let filter_type = buf.get_u8();
        let stop_hash = read_hash(buf)?;
        let previous_header = read_hash(buf)?;

        let count = read_compact_size(buf)?;
        if count > MAX_FILTER_HEADERS {
            return Err(NetworkError::InvalidMessage);
        }
        let mut filter_hashes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            filter_hashes.push(read_hash(buf)?);
        }

        Ok(Self { filter_type, stop_hash, previous_header, filter_hashes })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.filter_type);
        buf.put_slice(&self.stop_hash);
        buf.put_slice(&self.previous_header);
        write_compact_size(buf, self.filter_hashes.len() as u64);
        for hash in &self.filter_hashes {
            buf.put_slice(hash);
        }
    }
}

/// The `getcfcheckpt` request. bip157 (70015).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GetClientFilterCheckpoint {
    pub filter_type: u8,
    pub stop_hash: [u8; 32],
}

impl GetClientFilterCheckpoint {
    pub(crate) fn decode(buf: &mut Bytes) -> NetworkResult<Self> {
        need(buf, 1)?;
        let filter_type = buf.get_u8();
        let stop_hash = read_hash(buf)?;
        Ok(Self { filter_type, stop_hash })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.filter_type);
        buf.put_slice(&self.stop_hash);
    }
}

/// The `cfcheckpt` reply. bip157 (70015).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientFilterCheckpoint {
    pub filter_type: u8,
    pub stop_hash: [u8; 32],
    pub headers: Vec<[u8; 32]>,
}

impl ClientFilterCheckpoint {
    pub(crate) fn decode(buf: &mut Bytes) -> NetworkResult<Self> {
        need(buf, 1)?;
        let filter_type = buf.get_u8();
        let stop_hash = read_hash(buf)?;

        let count = read_compact_size(buf)?;
        if count > MAX_FILTER_HEADERS {
            return Err(NetworkError::InvalidMessage);
        }
        let mut headers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            headers.push(read_hash(buf)?);
        }

        Ok(Self { filter_type, stop_hash, headers })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.filter_type);
        buf.put_slice(&self.stop_hash);
        write_compact_size(buf, self.headers.len() as u64);
        for hash in &self.headers {
            buf.put_slice(hash);
        }
    }
}
