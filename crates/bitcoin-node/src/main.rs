//! Bitcoin P2P node binary.
//!
//! Thin process wrapper around the bitcoin-network engine: configuration,
//! logging, signal handling.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod node;

use config::NodeConfig;
use node::Node;

/// Bitcoin P2P node.
#[derive(Parser, Debug)]
#[command(name = "bitcoin-node")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "bitcoin-node.toml")]
    pub config: PathBuf,

    /// Network to connect to (mainnet, testnet, regtest)
    #[arg(short, long)]
    pub network: Option<String>,

    /// Data directory
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// P2P listen port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Disable inbound connections
    #[arg(long)]
    pub no_listen: bool,

    /// Target outbound connection count
    #[arg(long)]
    pub outbound: Option<usize>,

    /// Peer to connect to explicitly (repeatable)
    #[arg(long = "peer")]
    pub peers: Vec<String>,

    /// Seed node for bootstrapping (repeatable)
    #[arg(long = "seed")]
    pub seeds: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = NodeConfig::load(&args.config)?.apply_args(&args)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log.clone())),
        )
        .init();

    info!(network = ?config.network, "starting bitcoin-node");

    std::fs::create_dir_all(&config.data_dir)?;

    let mut node = Node::new(config)?;
    node.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    node.stop().await;
    Ok(())
}
