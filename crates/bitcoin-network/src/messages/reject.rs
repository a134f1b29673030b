//! Feedback payloads: `reject` (bip61) and the retired `alert`.

use crate::error::{NetworkError, NetworkResult};
use crate::messages::primitives::{need, read_hash, read_var_bytes, read_var_string, write_var_bytes, write_var_string};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Reject reason codes defined by bip61.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RejectCode {
    Malformed = 0x01,
    Invalid = 0x10,
    Obsolete = 0x11,
    Duplicate = 0x12,
    NonStandard = 0x40,
    Dust = 0x41,
    InsufficientFee = 0x42,
    Checkpoint = 0x43,
}

impl RejectCode {
    fn from_byte(byte: u8) -> NetworkResult<Self> {
        match byte {
            0x01 => Ok(RejectCode::Malformed),
            0x10 => Ok(RejectCode::Invalid),
            0x11 => Ok(RejectCode::Obsolete),
            0x12 => Ok(RejectCode::Duplicate),
            0x40 => Ok(RejectCode::NonStandard),
            0x41 => Ok(RejectCode::Dust),
            0x42 => Ok(RejectCode::InsufficientFee),
            0x43 => Ok(RejectCode::Checkpoint),
            _ => Err(NetworkError::InvalidMessage),
        }
    }
}

/// The `reject` message. bip61 (70002), later deprecated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reject {
    /// Command of the message being rejected.
    pub message: String,
    pub code: RejectCode,
    pub reason: String,
    /// Block or transaction hash, present only for those rejections.
    pub hash: Option<[u8; 32]>,
}

impl Reject {
    pub(crate) fn decode(buf: &mut Bytes) -> NetworkResult<Self> {
        let message = read_var_string(buf)?;
        need(buf, 1)?;
        let code = RejectCode::from_byte(buf.get_u8())?;
        let reason = read_var_string(buf)?;

        let hash = if matches!(message.as_str(), "block" | "tx") {
            Some(read_hash(buf)?)
        } else {
            None
        };

        Ok(Self { message, code, reason, hash })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        write_var_string(buf, &self.message);
        buf.put_u8(self.code as u8);
        write_var_string(buf, &self.reason);
        if let Some(hash) = self.hash {
            buf.put_slice(&hash);
        }
    }
}

/// The retired `alert` message. Payload and signature are carried opaquely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub payload: Bytes,
    pub signature: Bytes,
}

impl Alert {
    const MAX_PART: u64 = 64 * 1024;

    pub(crate) fn decode(buf: &mut Bytes) -> NetworkResult<Self> {
        let payload = read_var_bytes(buf, Self::MAX_PART)?;
        let signature = read_var_bytes(buf, Self::MAX_PART)?;
        Ok(Self { payload, signature })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        write_var_bytes(buf, &self.payload);
        write_var_bytes(buf, &self.signature);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_round_trip() {
        let reject = Reject {
            message: "version".to_string(),
            code: RejectCode::Duplicate,
            reason: "duplicate version".to_string(),
            hash: None,
        };

        let mut buf = BytesMut::new();
        reject.encode(&mut buf);
        assert_eq!(Reject::decode(&mut buf.freeze()).unwrap(), reject);
    }

    #[test]
    fn test_reject_block_carries_hash() {
        let reject = Reject {
            message: "block".to_string(),
            code: RejectCode::Invalid,
            reason: "bad-txnmrklroot".to_string(),
            hash: Some([7u8; 32]),
        };

        let mut buf = BytesMut::new();
        reject.encode(&mut buf);
        assert_eq!(Reject::decode(&mut buf.freeze()).unwrap(), reject);
    }

    #[test]
    fn test_reject_unknown_code_fails() {
        let mut buf = BytesMut::new();
        write_var_string(&mut buf, "tx");
        buf.put_u8(0x77);
        write_var_string(&mut buf, "?");
        assert!(Reject::decode(&mut buf.freeze()).is_err());
    }

    #[test]
    fn test_alert_round_trip() {
        let alert = Alert {
            payload: Bytes::from_static(b"final alert"),
            signature: Bytes::from_static(&[1, 2, 3]),
        };

        let mut buf = BytesMut::new();
        alert.encode(&mut buf);
        assert_eq!(Alert::decode(&mut buf.freeze()).unwrap(), alert);
    }
}
