//! Keep-alive payloads.

use crate::error::NetworkResult;
use crate::messages::level;
use crate::messages::primitives::need;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// The `ping` message.
///
/// Baseline pings are empty; bip31 (60001) added the nonce that pairs a ping
/// with its pong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ping {
    pub nonce: Option<u64>,
}

impl Ping {
    pub fn with_nonce(nonce: u64) -> Self {
        Self { nonce: Some(nonce) }
    }

    pub(crate) fn decode(buf: &mut Bytes, version: u32) -> NetworkResult<Self> {
        if version < level::BIP31 {
            return Ok(Self { nonce: None });
        }

        need(buf, 8)?;
        Ok(Self { nonce: Some(buf.get_u64_le()) })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut, version: u32) {
        if version >= level::BIP31 {
            buf.put_u64_le(self.nonce.unwrap_or_default());
        }
    }
}

/// The `pong` reply, echoing the ping nonce. bip31 (60001) and later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pong {
    pub nonce: u64,
}

impl Pong {
    pub(crate) fn decode(buf: &mut Bytes) -> NetworkResult<Self> {
        need(buf, 8)?;
        Ok(Self { nonce: buf.get_u64_le() })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.nonce);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_round_trip() {
        let ping = Ping::with_nonce(7);
        let mut buf = BytesMut::new();
        ping.encode(&mut buf, level::BIP31);
        assert_eq!(buf.len(), 8);
        assert_eq!(Ping::decode(&mut buf.freeze(), level::BIP31).unwrap(), ping);
    }

    #[test]
    fn test_baseline_ping_is_empty() {
        let ping = Ping::with_nonce(7);
        let mut buf = BytesMut::new();
        ping.encode(&mut buf, level::MINIMUM_PROTOCOL);
        assert!(buf.is_empty());

        let decoded = Ping::decode(&mut buf.freeze(), level::MINIMUM_PROTOCOL).unwrap();
        assert_eq!(decoded.nonce, None);
    }

    #[test]
    fn test_pong_round_trip() {
        let pong = Pong { nonce: u64::MAX };
        let mut buf = BytesMut::new();
        pong.encode(&mut buf);
        assert_eq!(Pong::decode(&mut buf.freeze()).unwrap(), pong);
    }
}
