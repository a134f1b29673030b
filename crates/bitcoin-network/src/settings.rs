//! Engine configuration.

use crate::authority::Authority;
use crate::error::{NetworkError, NetworkResult};
use crate::messages::level;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Network selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    /// Bitcoin mainnet.
    #[default]
    Mainnet,
    /// Bitcoin testnet3.
    Testnet,
    /// Local regression test network.
    Regtest,
}

impl NetworkType {
    /// Wire magic for this network.
    pub fn magic(&self) -> u32 {
        match self {
            NetworkType::Mainnet => 0xd9b4bef9,
            NetworkType::Testnet => 0x0709110b,
            NetworkType::Regtest => 0xdab5bffa,
        }
    }

    /// Default P2P port for this network.
    pub fn default_port(&self) -> u16 {
        match self {
            NetworkType::Mainnet => 8333,
            NetworkType::Testnet => 18333,
            NetworkType::Regtest => 18444,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Wire magic identifying the network.
    pub network_magic: u32,
    /// Highest protocol version to negotiate.
    pub protocol_maximum: u32,
    /// Lowest peer protocol version accepted.
    pub protocol_minimum: u32,
    /// Services advertised in our version message.
    pub services: u64,
    /// Service bits that disqualify a peer outright.
    pub invalid_services: u64,
    /// Services advertised as our maximum capability.
    pub services_maximum: u64,
    /// Service bits required of outbound peers.
    pub services_minimum: u64,
    /// Accept incoming connections.
    pub inbound_enabled: bool,
    /// Listen port for incoming connections.
    pub inbound_port: u16,
    /// Maximum concurrent inbound channels.
    pub inbound_connections: usize,
    /// Target concurrent outbound channels.
    pub outbound_connections: usize,
    /// Simultaneous connect attempts per outbound slot.
    pub connect_batch_size: u32,
    /// Maximum addresses retained in the host pool.
    pub host_pool_capacity: usize,
    /// Seconds to wait for a connect attempt.
    pub connect_timeout_seconds: u64,
    /// Seconds to wait for handshake completion.
    pub channel_handshake_seconds: u64,
    /// Seconds between channel heartbeats.
    pub channel_heartbeat_seconds: u64,
    /// Minutes of silence before a channel is timed out.
    pub channel_inactivity_minutes: u64,
    /// Minutes before a channel is dropped regardless of activity.
    pub channel_expiration_minutes: u64,
    /// Manually maintained peers.
    pub peers: Vec<Authority>,
    /// Seed nodes used to bootstrap an empty host pool.
    pub seeds: Vec<Authority>,
    /// Addresses never connected or accepted.
    pub blacklists: Vec<Authority>,
    /// If non-empty, only these addresses are accepted inbound.
    pub whitelists: Vec<Authority>,
    /// User agent advertised in our version message.
    pub user_agent: String,
    /// Request transaction relay from peers.
    pub relay_transactions: bool,
    /// Enable the deprecated reject message protocol.
    pub enable_reject: bool,
    /// Enable the deprecated alert message observer.
    pub enable_alert: bool,
    /// Accept transaction inventory from peers.
    pub enable_transaction: bool,
    /// Path of the persisted host pool.
    pub hosts_file: PathBuf,
    /// Chain height advertised in our version message.
    pub start_height: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            network_magic: NetworkType::Mainnet.magic(),
            protocol_maximum: level::WTXID_RELAY,
            protocol_minimum: level::MINIMUM_PROTOCOL,
            services: service::NODE_NETWORK,
            invalid_services: 176,
            services_maximum: service::NODE_NETWORK | service::NODE_WITNESS,
            services_minimum: service::NODE_NETWORK,
            inbound_enabled: true,
            inbound_port: NetworkType::Mainnet.default_port(),
            inbound_connections: 64,
            outbound_connections: 8,
            connect_batch_size: 5,
            host_pool_capacity: 1000,
            connect_timeout_seconds: 5,
            channel_handshake_seconds: 30,
            channel_heartbeat_seconds: 60,
            channel_inactivity_minutes: 10,
            channel_expiration_minutes: 60,
            peers: Vec::new(),
            seeds: Vec::new(),
            blacklists: Vec::new(),
            whitelists: Vec::new(),
            user_agent: "/bitcoin-rust-node:0.1.0/".to_string(),
            relay_transactions: true,
            enable_reject: false,
            enable_alert: false,
            enable_transaction: true,
            hosts_file: PathBuf::from("hosts.cache"),
            start_height: 0,
        }
    }
}

impl Settings {
    /// Configuration for the given network with defaults elsewhere.
    pub fn for_network(network: NetworkType) -> Self {
        Self {
            network_magic: network.magic(),
            inbound_port: network.default_port(),
            ..Self::default()
        }
    }

    /// Reject contradictory or out-of-range values.
    pub fn validate(&self) -> NetworkResult<()> {
        if self.protocol_minimum < level::MINIMUM_PROTOCOL
            || self.protocol_maximum > level::MAXIMUM_PROTOCOL
            || self.protocol_minimum > self.protocol_maximum
        {
            return Err(NetworkError::InvalidConfiguration);
        }

        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn channel_handshake(&self) -> Duration {
        Duration::from_secs(self.channel_handshake_seconds)
    }

    pub fn channel_heartbeat(&self) -> Duration {
        Duration::from_secs(self.channel_heartbeat_seconds)
    }

    pub fn channel_inactivity(&self) -> Duration {
        Duration::from_secs(self.channel_inactivity_minutes * 60)
    }

    pub fn channel_expiration(&self) -> Duration {
        Duration::from_secs(self.channel_expiration_minutes * 60)
    }

    /// Whether the address is blocked by policy.
    pub fn blacklisted(&self, authority: &Authority) -> bool {
        self.blacklists.iter().any(|a| a.matches(authority))
    }

    /// Whether the address passes the inbound whitelist.
    pub fn whitelisted(&self, authority: &Authority) -> bool {
        self.whitelists.is_empty() || self.whitelists.iter().any(|a| a.matches(authority))
    }
}

/// Service flag bits advertised in version and addr messages.
pub mod service {
    /// No services.
    pub const NODE_NONE: u64 = 0;
    /// Full chain service.
    pub const NODE_NETWORK: u64 = 1;
    /// UTXO query service (BIP64, deprecated).
    pub const NODE_GETUTXO: u64 = 1 << 1;
    /// Bloom filter service (BIP111).
    pub const NODE_BLOOM: u64 = 1 << 2;
    /// Segregated witness service (BIP144).
    pub const NODE_WITNESS: u64 = 1 << 3;
    /// Compact client filter service (BIP157).
    pub const NODE_CLIENT_FILTERS: u64 = 1 << 6;
    /// Recent-blocks-only chain service (BIP159).
    pub const NODE_NETWORK_LIMITED: u64 = 1 << 10;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.network_magic, 0xd9b4bef9);
        assert_eq!(settings.inbound_port, 8333);
    }

    #[test]
    fn test_inverted_protocol_range_rejected() {
        let settings = Settings {
            protocol_minimum: level::BIP61,
            protocol_maximum: level::MINIMUM_PROTOCOL,
            ..Settings::default()
        };
        assert_eq!(settings.validate(), Err(NetworkError::InvalidConfiguration));
    }

    #[test]
    fn test_network_ports() {
        assert_eq!(NetworkType::Testnet.default_port(), 18333);
        assert_eq!(NetworkType::Regtest.magic(), 0xdab5bffa);
    }

    #[test]
    fn test_whitelist_empty_allows_all() {
        let settings = Settings::default();
        let authority: Authority = "1.2.3.4:8333".parse().unwrap();
        assert!(settings.whitelisted(&authority));
    }
}
