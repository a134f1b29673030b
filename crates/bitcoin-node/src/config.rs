//! Node configuration.

use crate::Args;
use anyhow::{Context, Result};
use bitcoin_network::{NetworkType, Settings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Network to join (mainnet, testnet, regtest).
    pub network: NetworkType,
    /// Data directory for the host cache.
    pub data_dir: PathBuf,
    /// Log filter (tracing env-filter syntax).
    pub log: String,
    /// Engine configuration.
    pub engine: Settings,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: NetworkType::Mainnet,
            data_dir: PathBuf::from("."),
            log: "info".to_string(),
            engine: Settings::for_network(NetworkType::Mainnet),
        }
    }
}

impl NodeConfig {
    /// Load from a TOML file, or defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: NodeConfig =
            toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Overlay command-line arguments onto the loaded configuration.
    pub fn apply_args(mut self, args: &Args) -> Result<Self> {
        if let Some(network) = parse_network(&args.network)? {
            self.network = network;
            self.engine.network_magic = network.magic();
            self.engine.inbound_port = network.default_port();
        }

        if let Some(data_dir) = &args.data_dir {
            self.data_dir = data_dir.clone();
        }

        if let Some(port) = args.port {
            self.engine.inbound_port = port;
        }

        if args.no_listen {
            self.engine.inbound_enabled = false;
        }

        if let Some(outbound) = args.outbound {
            self.engine.outbound_connections = outbound;
        }

        for peer in &args.peers {
            let authority = peer
                .parse()
                .with_context(|| format!("invalid --peer {}", peer))?;
            self.engine.peers.push(authority);
        }

        for seed in &args.seeds {
            let authority = seed
                .parse()
                .with_context(|| format!("invalid --seed {}", seed))?;
            self.engine.seeds.push(authority);
        }

        // The host cache lives in the data directory.
        self.engine.hosts_file = self.data_dir.join("hosts.cache");
        Ok(self)
    }
}

fn parse_network(name: &Option<String>) -> Result<Option<NetworkType>> {
    let Some(name) = name else {
        return Ok(None);
    };

    match name.as_str() {
        "mainnet" => Ok(Some(NetworkType::Mainnet)),
        "testnet" => Ok(Some(NetworkType::Testnet)),
        "regtest" => Ok(Some(NetworkType::Regtest)),
        other => anyhow::bail!("unknown network: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.engine.inbound_port, 8333);
        assert_eq!(config.log, "info");
    }

    #[test]
    fn test_parse_toml() {
        let config: NodeConfig = toml::from_str(
            r#"
            network = "testnet"
            log = "debug"

            [engine]
            outbound_connections = 4
            seeds = ["1.2.3.4:18333"]
            "#,
        )
        .unwrap();

        assert_eq!(config.network, NetworkType::Testnet);
        assert_eq!(config.engine.outbound_connections, 4);
        assert_eq!(config.engine.seeds.len(), 1);
    }

    #[test]
    fn test_network_override() {
        let args = Args {
            config: PathBuf::from("unused.toml"),
            network: Some("regtest".to_string()),
            data_dir: None,
            port: None,
            no_listen: false,
            outbound: None,
            peers: vec!["127.0.0.1:18444".to_string()],
            seeds: Vec::new(),
        };

        let config = NodeConfig::default().apply_args(&args).unwrap();
        assert_eq!(config.network, NetworkType::Regtest);
        assert_eq!(config.engine.inbound_port, 18444);
        assert_eq!(config.engine.peers.len(), 1);
    }
}
