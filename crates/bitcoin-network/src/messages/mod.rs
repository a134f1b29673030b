//! Bitcoin P2P wire messages.
//!
//! The catalog is a closed sum keyed by the 12-byte command in the heading.
//! Each variant declares the protocol version range in which it exists;
//! decoding outside that range fails rather than guessing at layout.

mod address;
mod block;
mod filters;
pub mod heading;
mod inventory;
mod ping;
pub mod primitives;
mod reject;
mod version;

pub use address::{Address, AddressItem, GetAddress, MAX_ADDRESSES};
pub use block::{
    Block, BlockHeader, FeeFilter, GetBlocks, GetHeaders, Headers, SendCompact, SendHeaders,
    Transaction, MAX_HEADERS,
};
pub use filters::{
    ClientFilter, ClientFilterCheckpoint, ClientFilterHeaders, FilterAdd, FilterClear, FilterLoad,
    GetClientFilterCheckpoint, GetClientFilterHeaders, GetClientFilters, MerkleBlock,
};
pub use heading::{checksum, pad_command, MessageHeading, HEADING_SIZE, MAX_PAYLOAD};
pub use inventory::{Inventory, InventoryItem, InventoryType, MemoryPool, MAX_INVENTORY};
pub use ping::{Ping, Pong};
pub use reject::{Alert, Reject, RejectCode};
pub use version::{Version, VersionAck};

use crate::error::{NetworkError, NetworkResult};
use bytes::{Buf, Bytes, BytesMut};

/// Protocol version levels at which features were introduced.
pub mod level {
    /// Oldest protocol the engine will speak.
    pub const MINIMUM_PROTOCOL: u32 = 31402;
    /// `getheaders` and `headers`.
    pub const HEADERS: u32 = 31800;
    /// Ping nonces and `pong` (bip31).
    pub const BIP31: u32 = 60001;
    /// `mempool` (bip35).
    pub const BIP35: u32 = 60002;
    /// Relay flag, bloom filters, `merkleblock`, `notfound` (bip37).
    pub const BIP37: u32 = 70001;
    /// `reject` (bip61).
    pub const BIP61: u32 = 70002;
    /// `sendheaders` (bip130).
    pub const BIP130: u32 = 70012;
    /// `feefilter` (bip133).
    pub const BIP133: u32 = 70013;
    /// Compact blocks (bip152).
    pub const BIP152: u32 = 70014;
    /// Client filters (bip157) and witness-aware rejection.
    pub const CLIENT_FILTERS: u32 = 70015;
    /// wtxid relay (bip339).
    pub const WTXID_RELAY: u32 = 70016;
    /// Newest protocol the engine will speak.
    pub const MAXIMUM_PROTOCOL: u32 = WTXID_RELAY;
}

/// Message identity as carried in the heading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Version,
    VersionAck,
    Ping,
    Pong,
    Address,
    GetAddress,
    Reject,
    Alert,
    Headers,
    GetHeaders,
    GetBlocks,
    Inventory,
    GetData,
    NotFound,
    Block,
    Transaction,
    MemoryPool,
    SendHeaders,
    FeeFilter,
    SendCompact,
    FilterLoad,
    FilterAdd,
    FilterClear,
    MerkleBlock,
    GetClientFilters,
    ClientFilter,
    GetClientFilterHeaders,
    ClientFilterHeaders,
    GetClientFilterCheckpoint,
    ClientFilterCheckpoint,
}

impl Command {
    /// All commands, in catalog order.
    pub const ALL: [Command; 30] = [
        Command::Version,
        Command::VersionAck,
        Command::Ping,
        Command::Pong,
        Command::Address,
        Command::GetAddress,
        Command::Reject,
        Command::Alert,
        Command::Headers,
        Command::GetHeaders,
        Command::GetBlocks,
        Command::Inventory,
        Command::GetData,
        Command::NotFound,
        Command::Block,
        Command::Transaction,
        Command::MemoryPool,
        Command::SendHeaders,
        Command::FeeFilter,
        Command::SendCompact,
        Command::FilterLoad,
        Command::FilterAdd,
        Command::FilterClear,
        Command::MerkleBlock,
        Command::GetClientFilters,
        Command::ClientFilter,
        Command::GetClientFilterHeaders,
        Command::ClientFilterHeaders,
        Command::GetClientFilterCheckpoint,
        Command::ClientFilterCheckpoint,
    ];

    /// The wire command name.
    pub fn text(&self) -> &'static str {
        match self {
            Command::Version => "version",
            Command::VersionAck => "verack",
            Command::Ping => "ping",
            Command::Pong => "pong",
            Command::Address => "addr",
            Command::GetAddress => "getaddr",
            Command::Reject => "reject",
            Command::Alert => "alert",
            Command::Headers => "headers",
            Command::GetHeaders => "getheaders",
            Command::GetBlocks => "getblocks",
            Command::Inventory => "inv",
            Command::GetData => "getdata",
            Command::NotFound => "notfound",
            Command::Block => "block",
            Command::Transaction => "tx",
            Command::MemoryPool => "mempool",
            Command::SendHeaders => "sendheaders",
            Command::FeeFilter => "feefilter",
            Command::SendCompact => "sendcmpct",
            Command::FilterLoad => "filterload",
            Command::FilterAdd => "filteradd",
            Command::FilterClear => "filterclear",
            Command::MerkleBlock => "merkleblock",
            Command::GetClientFilters => "getcfilters",
            Command::ClientFilter => "cfilter",
            Command::GetClientFilterHeaders => "getcfheaders",
            Command::ClientFilterHeaders => "cfheaders",
            Command::GetClientFilterCheckpoint => "getcfcheckpt",
            Command::ClientFilterCheckpoint => "cfcheckpt",
        }
    }

    /// Look a command up by its wire name.
    pub fn from_text(text: &str) -> Option<Command> {
        Command::ALL.iter().copied().find(|c| c.text() == text)
    }

    /// The null-padded 12-byte heading form.
    pub fn to_bytes(&self) -> [u8; 12] {
        pad_command(self.text())
    }

    /// Protocol versions in which this message exists.
    pub fn version_range(&self) -> (u32, u32) {
        use level::*;

        let minimum = match self {
            Command::Headers | Command::GetHeaders => HEADERS,
            Command::Pong => BIP31,
            Command::MemoryPool => BIP35,
            Command::NotFound
            | Command::FilterLoad
            | Command::FilterAdd
            | Command::FilterClear
            | Command::MerkleBlock => BIP37,
            Command::Reject => BIP61,
            Command::SendHeaders => BIP130,
            Command::FeeFilter => BIP133,
            Command::SendCompact => BIP152,
            Command::GetClientFilters
            | Command::ClientFilter
            | Command::GetClientFilterHeaders
            | Command::ClientFilterHeaders
            | Command::GetClientFilterCheckpoint
            | Command::ClientFilterCheckpoint => CLIENT_FILTERS,
            _ => MINIMUM_PROTOCOL,
        };

        (minimum, MAXIMUM_PROTOCOL)
    }

    /// Whether the message exists at the given negotiated version.
    pub fn in_range(&self, version: u32) -> bool {
        let (minimum, maximum) = self.version_range();
        (minimum..=maximum).contains(&version)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.text())
    }
}

/// A decoded Bitcoin P2P message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version(Version),
    VersionAck(VersionAck),
    Ping(Ping),
    Pong(Pong),
    Address(Address),
    GetAddress(GetAddress),
    Reject(Reject),
    Alert(Alert),
    Headers(Headers),
    GetHeaders(GetHeaders),
    GetBlocks(GetBlocks),
    Inventory(Inventory),
    GetData(Inventory),
    NotFound(Inventory),
    Block(Block),
    Transaction(Transaction),
    MemoryPool(MemoryPool),
    SendHeaders(SendHeaders),
    FeeFilter(FeeFilter),
    SendCompact(SendCompact),
    FilterLoad(FilterLoad),
    FilterAdd(FilterAdd),
    FilterClear(FilterClear),
    MerkleBlock(MerkleBlock),
    GetClientFilters(GetClientFilters),
    ClientFilter(ClientFilter),
    GetClientFilterHeaders(GetClientFilterHeaders),
    ClientFilterHeaders(ClientFilterHeaders),
    GetClientFilterCheckpoint(GetClientFilterCheckpoint),
    ClientFilterCheckpoint(ClientFilterCheckpoint),
}

impl Message {
    /// The command tag for this variant.
    pub fn command(&self) -> Command {
        match self {
            Message::Version(_) => Command::Version,
            Message::VersionAck(_) => Command::VersionAck,
            Message::Ping(_) => Command::Ping,
            Message::Pong(_) => Command::Pong,
            Message::Address(_) => Command::Address,
            Message::GetAddress(_) => Command::GetAddress,
            Message::Reject(_) => Command::Reject,
            Message::Alert(_) => Command::Alert,
            Message::Headers(_) => Command::Headers,
            Message::GetHeaders(_) => Command::GetHeaders,
            Message::GetBlocks(_) => Command::GetBlocks,
            Message::Inventory(_) => Command::Inventory,
            Message::GetData(_) => Command::GetData,
            Message::NotFound(_) => Command::NotFound,
            Message::Block(_) => Command::Block,
            Message::Transaction(_) => Command::Transaction,
            Message::MemoryPool(_) => Command::MemoryPool,
            Message::SendHeaders(_) => Command::SendHeaders,
            Message::FeeFilter(_) => Command::FeeFilter,
            Message::SendCompact(_) => Command::SendCompact,
            Message::FilterLoad(_) => Command::FilterLoad,
            Message::FilterAdd(_) => Command::FilterAdd,
            Message::FilterClear(_) => Command::FilterClear,
            Message::MerkleBlock(_) => Command::MerkleBlock,
            Message::GetClientFilters(_) => Command::GetClientFilters,
            Message::ClientFilter(_) => Command::ClientFilter,
            Message::GetClientFilterHeaders(_) => Command::GetClientFilterHeaders,
            Message::ClientFilterHeaders(_) => Command::ClientFilterHeaders,
            Message::GetClientFilterCheckpoint(_) => Command::GetClientFilterCheckpoint,
            Message::ClientFilterCheckpoint(_) => Command::ClientFilterCheckpoint,
        }
    }

    /// Decode a payload for the given command at the negotiated version.
    ///
    /// The payload must be consumed exactly; trailing bytes are an error.
    /// Messages outside their version range fail as unknown, matching the
    /// treatment of commands that were never defined.
    pub fn deserialize(command: Command, version: u32, payload: Bytes) -> NetworkResult<Message> {
        if !command.in_range(version) {
            return Err(NetworkError::UnknownMessage);
        }

        let mut buf = payload;
        let message = match command {
            Command::Version => Message::Version(Version::decode(&mut buf, version)?),
            Command::VersionAck => Message::VersionAck(VersionAck),
            Command::Ping => Message::Ping(Ping::decode(&mut buf, version)?),
            Command::Pong => Message::Pong(Pong::decode(&mut buf)?),
            Command::Address => Message::Address(Address::decode(&mut buf, version)?),
            Command::GetAddress => Message::GetAddress(GetAddress),
            Command::Reject => Message::Reject(Reject::decode(&mut buf)?),
            Command::Alert => Message::Alert(Alert::decode(&mut buf)?),
            Command::Headers => Message::Headers(Headers::decode(&mut buf)?),
            Command::GetHeaders => Message::GetHeaders(GetHeaders::decode(&mut buf)?),
            Command::GetBlocks => Message::GetBlocks(GetBlocks::decode(&mut buf)?),
            Command::Inventory => Message::Inventory(Inventory::decode(&mut buf)?),
            Command::GetData => Message::GetData(Inventory::decode(&mut buf)?),
            Command::NotFound => Message::NotFound(Inventory::decode(&mut buf)?),
            Command::Block => Message::Block(Block { payload: buf.split_to(buf.len()) }),
            Command::Transaction => {
                Message::Transaction(Transaction { payload: buf.split_to(buf.len()) })
            }
            Command::MemoryPool => Message::MemoryPool(MemoryPool),
            Command::SendHeaders => Message::SendHeaders(SendHeaders),
            Command::FeeFilter => Message::FeeFilter(FeeFilter::decode(&mut buf)?),
            Command::SendCompact => Message::SendCompact(SendCompact::decode(&mut buf)?),
            Command::FilterLoad => Message::FilterLoad(FilterLoad::decode(&mut buf)?),
            Command::FilterAdd => Message::FilterAdd(FilterAdd::decode(&mut buf)?),
            Command::FilterClear => Message::FilterClear(FilterClear),
            Command::MerkleBlock => Message::MerkleBlock(MerkleBlock::decode(&mut buf)?),
            Command::GetClientFilters => {
                Message::GetClientFilters(GetClientFilters::decode(&mut buf)?)
            }
            Command::ClientFilter => Message::ClientFilter(ClientFilter::decode(&mut buf)?),
            Command::GetClientFilterHeaders => {
                Message::GetClientFilterHeaders(GetClientFilterHeaders::decode(&mut buf)?)
            }
            Command::ClientFilterHeaders => {
                Message::ClientFilterHeaders(ClientFilterHeaders::decode(&mut buf)?)
            }
            Command::GetClientFilterCheckpoint => {
                Message::GetClientFilterCheckpoint(GetClientFilterCheckpoint::decode(&mut buf)?)
            }
            Command::ClientFilterCheckpoint => {
                Message::ClientFilterCheckpoint(ClientFilterCheckpoint::decode(&mut buf)?)
            }
        };

        if buf.has_remaining() {
            return Err(NetworkError::InvalidMessage);
        }

        Ok(message)
    }

    /// Serialize the payload at the negotiated version.
    pub fn serialize(&self, version: u32, buf: &mut BytesMut) -> NetworkResult<()> {
        if !self.command().in_range(version) {
            return Err(NetworkError::UnknownMessage);
        }

        match self {
            Message::Version(m) => m.encode(buf, version),
            Message::VersionAck(_) => {}
            Message::Ping(m) => m.encode(buf, version),
            Message::Pong(m) => m.encode(buf),
            Message::Address(m) => m.encode(buf, version),
            Message::GetAddress(_) => {}
            Message::Reject(m) => m.encode(buf),
            Message::Alert(m) => m.encode(buf),
            Message::Headers(m) => m.encode(buf),
            Message::GetHeaders(m) => m.encode(buf),
            Message::GetBlocks(m) => m.encode(buf),
            Message::Inventory(m) => m.encode(buf),
            Message::GetData(m) => m.encode(buf),
            Message::NotFound(m) => m.encode(buf),
            Message::Block(m) => buf.extend_from_slice(&m.payload),
            Message::Transaction(m) => buf.extend_from_slice(&m.payload),
            Message::MemoryPool(_) => {}
            Message::SendHeaders(_) => {}
            Message::FeeFilter(m) => m.encode(buf),
            Message::SendCompact(m) => m.encode(buf),
            Message::FilterLoad(m) => m.encode(buf),
            Message::FilterAdd(m) => m.encode(buf),
            Message::FilterClear(_) => {}
            Message::MerkleBlock(m) => m.encode(buf),
            Message::GetClientFilters(m) => m.encode(buf),
            Message::ClientFilter(m) => m.encode(buf),
            Message::GetClientFilterHeaders(m) => m.encode(buf),
            Message::ClientFilterHeaders(m) => m.encode(buf),
            Message::GetClientFilterCheckpoint(m) => m.encode(buf),
            Message::ClientFilterCheckpoint(m) => m.encode(buf),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_names_round_trip() {
        for command in Command::ALL {
            assert_eq!(Command::from_text(command.text()), Some(command));
            assert!(command.text().len() <= 12);
        }
    }

    #[test]
    fn test_version_ranges_match_levels() {
        assert_eq!(Command::Version.version_range().0, level::MINIMUM_PROTOCOL);
        assert_eq!(Command::Pong.version_range().0, level::BIP31);
        assert_eq!(Command::Reject.version_range().0, level::BIP61);
        assert_eq!(Command::SendHeaders.version_range().0, level::BIP130);
        assert_eq!(Command::SendCompact.version_range().0, level::BIP152);
        assert_eq!(Command::ClientFilter.version_range().0, level::CLIENT_FILTERS);
    }

    #[test]
    fn test_decode_out_of_range_is_unknown() {
        // A pong cannot exist below bip31; no value must be produced.
        let payload = Bytes::from_static(&[0u8; 8]);
        let result = Message::deserialize(Command::Pong, level::MINIMUM_PROTOCOL, payload);
        assert_eq!(result, Err(NetworkError::UnknownMessage));
    }

    #[test]
    fn test_encode_out_of_range_is_unknown() {
        let message = Message::Reject(Reject {
            message: "tx".to_string(),
            code: RejectCode::Invalid,
            reason: String::new(),
            hash: Some([0u8; 32]),
        });

        let mut buf = BytesMut::new();
        let result = message.serialize(level::BIP37, &mut buf);
        assert_eq!(result, Err(NetworkError::UnknownMessage));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let payload = Bytes::from_static(&[0u8; 12]);
        let result = Message::deserialize(Command::Pong, level::BIP61, payload);
        assert_eq!(result, Err(NetworkError::InvalidMessage));
    }

    #[test]
    fn test_raw_block_passthrough() {
        let body = Bytes::from_static(b"opaque block bytes");
        let message =
            Message::deserialize(Command::Block, level::BIP61, body.clone()).unwrap();

        let mut buf = BytesMut::new();
        message.serialize(level::BIP61, &mut buf).unwrap();
        assert_eq!(buf.freeze(), body);
    }
}
