//! Address gossip payloads.

use crate::authority::Authority;
use crate::error::NetworkResult;
use crate::messages::primitives::{need, read_compact_size, write_compact_size};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Most entries accepted in a single `addr` message.
pub const MAX_ADDRESSES: u64 = 1000;

/// A timestamped network address as carried in `addr` payloads.
///
/// The same layout without the timestamp is embedded twice in `version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressItem {
    /// Last-seen time, seconds since the epoch.
    pub timestamp: u32,
    /// Advertised service bits.
    pub services: u64,
    /// Fixed 16-byte IPv6 form, IPv4 mapped.
    pub ip: [u8; 16],
    /// Network byte order on the wire.
    pub port: u16,
}

impl AddressItem {
    pub fn new(timestamp: u32, services: u64, authority: &Authority) -> Self {
        Self {
            timestamp,
            services,
            ip: authority.to_ip_address(),
            port: authority.port(),
        }
    }

    pub fn authority(&self) -> Authority {
        Authority::from_ip_address(self.ip, self.port)
    }

    pub(crate) fn decode(buf: &mut Bytes, timestamped: bool) -> NetworkResult<Self> {
        let timestamp = if timestamped {
            need(buf, 4)?;
            buf.get_u32_le()
        } else {
            0
        };

        need(buf, 26)?;
        let services = buf.get_u64_le();
        let mut ip = [0u8; 16];
        buf.copy_to_slice(&mut ip);
        let port = buf.get_u16();

        Ok(Self { timestamp, services, ip, port })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut, timestamped: bool) {
        if timestamped {
            buf.put_u32_le(self.timestamp);
        }
        buf.put_u64_le(self.services);
        buf.put_slice(&self.ip);
        buf.put_u16(self.port);
    }
}

/// The `addr` message: a batch of known peer addresses.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Address {
    pub addresses: Vec<AddressItem>,
}

impl Address {
    pub(crate) fn decode(buf: &mut Bytes, version: u32) -> NetworkResult<Self> {
        let count = read_compact_size(buf)?;
        if count > MAX_ADDRESSES {
            return Err(crate::error::NetworkError::InvalidMessage);
        }

        // Timestamps were added to addr entries at the baseline protocol.
        let timestamped = timestamped(version);
        let mut addresses = Vec::with_capacity(count as usize);
        for _ in 0..count {
            addresses.push(AddressItem::decode(buf, timestamped)?);
        }

        Ok(Self { addresses })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut, version: u32) {
        write_compact_size(buf, self.addresses.len() as u64);
        let timestamped = timestamped(version);
        for address in &self.addresses {
            address.encode(buf, timestamped);
        }
    }
}

/// The `getaddr` request. Empty payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GetAddress;

fn timestamped(version: u32) -> bool {
    version >= crate::messages::level::MINIMUM_PROTOCOL
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::level;

    #[test]
    fn test_address_item_round_trip() {
        let authority: Authority = "1.2.240.1:42".parse().unwrap();
        let item = AddressItem::new(1_700_000_000, 1, &authority);

        let mut buf = BytesMut::new();
        item.encode(&mut buf, true);
        assert_eq!(buf.len(), 30);

        let decoded = AddressItem::decode(&mut buf.freeze(), true).unwrap();
        assert_eq!(decoded, item);
        assert_eq!(decoded.authority(), authority);
    }

    #[test]
    fn test_address_round_trip() {
        let message = Address {
            addresses: vec![
                AddressItem::new(10, 1, &"1.2.3.4:8333".parse().unwrap()),
                AddressItem::new(20, 9, &"[2001:db8::2]:8333".parse().unwrap()),
            ],
        };

        let mut buf = BytesMut::new();
        message.encode(&mut buf, level::BIP61);
        let decoded = Address::decode(&mut buf.freeze(), level::BIP61).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_address_rejects_oversize_count() {
        let mut buf = BytesMut::new();
        write_compact_size(&mut buf, MAX_ADDRESSES + 1);
        assert!(Address::decode(&mut buf.freeze(), level::BIP61).is_err());
    }
}
