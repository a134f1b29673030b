//! Handshake payloads.

use crate::error::NetworkResult;
use crate::messages::address::AddressItem;
use crate::messages::level;
use crate::messages::primitives::{need, read_var_string, write_var_string};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// The `version` message: the opening move of the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    /// Sender's protocol version.
    pub value: u32,
    /// Sender's service bits.
    pub services: u64,
    /// Sender's clock, seconds since the epoch.
    pub timestamp: i64,
    /// The receiving peer as seen by the sender (timestamp omitted on wire).
    pub address_receiver: AddressItem,
    /// The sender's own address (commonly zeroed by peers).
    pub address_sender: AddressItem,
    /// Random value used to detect connections to self.
    pub nonce: u64,
    /// Free-form client identifier.
    pub user_agent: String,
    /// Height of the sender's best chain.
    pub start_height: u32,
    /// Relay transactions to this peer (BIP37, only serialized at 70001+).
    pub relay: bool,
}

impl Version {
    pub(crate) fn decode(buf: &mut Bytes, _version: u32) -> NetworkResult<Self> {
        need(buf, 20)?;
        let value = buf.get_u32_le();
        let services = buf.get_u64_le();
        let timestamp = buf.get_i64_le();

        let address_receiver = AddressItem::decode(buf, false)?;
        let address_sender = AddressItem::decode(buf, false)?;

        need(buf, 8)?;
        let nonce = buf.get_u64_le();
        let user_agent = read_var_string(buf)?;

        need(buf, 4)?;
        let start_height = buf.get_u32_le();

        // A bip37 peer may omit the relay byte, and earlier peers always do.
        // Absence means relay, by protocol definition.
        let relay = if buf.has_remaining() { buf.get_u8() != 0 } else { true };

        Ok(Self {
            value,
            services,
            timestamp,
            address_receiver,
            address_sender,
            nonce,
            user_agent,
            start_height,
            relay,
        })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut, version: u32) {
        buf.put_u32_le(self.value);
        buf.put_u64_le(self.services);
        buf.put_i64_le(self.timestamp);
        self.address_receiver.encode(buf, false);
        self.address_sender.encode(buf, false);
        buf.put_u64_le(self.nonce);
        write_var_string(buf, &self.user_agent);
        buf.put_u32_le(self.start_height);

        if version >= level::BIP37 {
            buf.put_u8(self.relay as u8);
        }
    }
}

/// The `verack` acknowledgement. Empty payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VersionAck;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::Authority;

    fn sample() -> Version {
        Version {
            value: level::BIP61,
            services: 1,
            timestamp: 1_700_000_000,
            address_receiver: AddressItem::new(0, 0, &"1.2.3.4:8333".parse::<Authority>().unwrap()),
            address_sender: AddressItem::new(0, 1, &Authority::unspecified()),
            nonce: 0x1234_5678_90ab_cdef,
            user_agent: "/bitcoin-rust-node:0.1.0/".to_string(),
            start_height: 820_000,
            relay: true,
        }
    }

    #[test]
    fn test_version_round_trip() {
        let message = sample();
        let mut buf = BytesMut::new();
        message.encode(&mut buf, level::BIP61);

        let decoded = Version::decode(&mut buf.freeze(), level::BIP61).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_relay_omitted_before_bip37() {
        let message = Version { relay: false, ..sample() };
        let mut buf = BytesMut::new();
        message.encode(&mut buf, level::MINIMUM_PROTOCOL);

        // No relay byte written, so decode reports the protocol default.
        let decoded = Version::decode(&mut buf.freeze(), level::MINIMUM_PROTOCOL).unwrap();
        assert!(decoded.relay);
    }

    #[test]
    fn test_truncated_version_fails() {
        let mut buf = BytesMut::new();
        sample().encode(&mut buf, level::BIP61);
        let mut truncated = buf.freeze();
        let _ = truncated.split_off(30);
        assert!(Version::decode(&mut truncated, level::BIP61).is_err());
    }
}
