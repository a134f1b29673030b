//! # bitcoin-network
//!
//! The session and channel engine for the Bitcoin P2P protocol.
//!
//! This crate provides:
//! - Versioned framing of the Bitcoin wire protocol
//! - Per-connection channels with serialized protocol dispatch
//! - The version/verack handshake, keep-alive and address gossip protocols
//! - Inbound, outbound, manual and seed sessions over a shared host pool

mod authority;
mod channel;
mod codec;
mod connect;
mod error;
mod hosts;
pub mod messages;
mod network;
pub mod protocols;
mod sessions;
mod settings;

pub use authority::Authority;
pub use channel::{Channel, Protocol, ProtocolContext};
pub use codec::MessageCodec;
pub use connect::{Acceptor, Connector};
pub use error::{NetworkError, NetworkResult};
pub use hosts::Hosts;
pub use messages::{Command, Message};
pub use network::{Network, NetworkEvent};
pub use settings::{service, NetworkType, Settings};
