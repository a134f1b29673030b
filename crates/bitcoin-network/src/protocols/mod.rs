//! Per-channel protocol state machines.
//!
//! Protocols implement [`crate::channel::Protocol`] and are attached by
//! sessions: the handshake variants during the shake phase, the rest after
//! the handshake completes, selected by the negotiated version.

mod address;
mod ping;
mod reject;
mod seed;
mod version;

pub use address::{AddressIn31402, AddressOut31402};
pub use ping::{Ping31402, Ping60001};
pub use reject::{Alert31402, Reject70002};
pub use seed::Seed31402;
pub use version::{HandshakeTier, VersionProtocol};
