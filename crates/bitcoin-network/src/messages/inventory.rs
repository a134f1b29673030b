//! Inventory payloads: `inv`, `getdata`, `notfound`, `mempool`.

use crate::error::{NetworkError, NetworkResult};
use crate::messages::primitives::{need, read_compact_size, read_hash, write_compact_size};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Most entries accepted in a single inventory message.
pub const MAX_INVENTORY: u64 = 50_000;

/// Inventory object type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum InventoryType {
    Transaction = 1,
    Block = 2,
    FilteredBlock = 3,
    CompactBlock = 4,
    WitnessTransaction = 0x4000_0001,
    WitnessBlock = 0x4000_0002,
}

impl InventoryType {
    fn from_wire(value: u32) -> NetworkResult<Self> {
        match value {
            1 => Ok(InventoryType::Transaction),
            2 => Ok(InventoryType::Block),
            3 => Ok(InventoryType::FilteredBlock),
            4 => Ok(InventoryType::CompactBlock),
            0x4000_0001 => Ok(InventoryType::WitnessTransaction),
            0x4000_0002 => Ok(InventoryType::WitnessBlock),
            _ => Err(NetworkError::InvalidMessage),
        }
    }
}

/// One announced or requested object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InventoryItem {
    pub kind: InventoryType,
    pub hash: [u8; 32],
}

impl InventoryItem {
    fn decode(buf: &mut Bytes) -> NetworkResult<Self> {
        need(buf, 4)?;
        let kind = InventoryType::from_wire(buf.get_u32_le())?;
        let hash = read_hash(buf)?;
        Ok(Self { kind, hash })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.kind as u32);
        buf.put_slice(&self.hash);
    }
}

/// Shared body of `inv`, `getdata` and `notfound`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Inventory {
    pub items: Vec<InventoryItem>,
}

impl Inventory {
    pub(crate) fn decode(buf: &mut Bytes) -> NetworkResult<Self> {
        let count = read_compact_size(buf)?;
        if count > MAX_INVENTORY {
            return Err(NetworkError::InvalidMessage);
        }

        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            items.push(InventoryItem::decode(buf)?);
        }

        Ok(Self { items })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        write_compact_size(buf, self.items.len() as u64);
        for item in &self.items {
            item.encode(buf);
        }
    }
}

/// The `mempool` request. Empty payload, bip35 (60002) and later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryPool;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inventory_round_trip() {
        let inventory = Inventory {
            items: vec![
                InventoryItem { kind: InventoryType::Block, hash: [1u8; 32] },
                InventoryItem { kind: InventoryType::WitnessTransaction, hash: [2u8; 32] },
            ],
        };

        let mut buf = BytesMut::new();
        inventory.encode(&mut buf);
        assert_eq!(Inventory::decode(&mut buf.freeze()).unwrap(), inventory);
    }

    #[test]
    fn test_unknown_type_fails() {
        let mut buf = BytesMut::new();
        write_compact_size(&mut buf, 1);
        buf.put_u32_le(99);
        buf.put_slice(&[0u8; 32]);
        assert!(Inventory::decode(&mut buf.freeze()).is_err());
    }

    #[test]
    fn test_oversize_count_fails() {
        let mut buf = BytesMut::new();
        write_compact_size(&mut buf, MAX_INVENTORY + 1);
        assert!(Inventory::decode(&mut buf.freeze()).is_err());
    }
}
