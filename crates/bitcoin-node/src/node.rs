//! Node implementation.

use crate::config::NodeConfig;
use anyhow::{Context, Result};
use bitcoin_network::{Network, NetworkEvent};
use tracing::{debug, info};

pub struct Node {
    network: Network,
}

impl Node {
    pub fn new(config: NodeConfig) -> Result<Self> {
        let network = Network::new(config.engine).context("invalid engine configuration")?;
        Ok(Self { network })
    }

    /// Start the engine and the event logger.
    pub async fn start(&mut self) -> Result<()> {
        let mut events = self.network.subscribe();

        self.network.start().await.context("network start failed")?;
        self.network.run().context("network run failed")?;

        if self.network.settings().inbound_enabled {
            info!(port = self.network.inbound_port(), "listening for peers");
        }

        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match event {
                    NetworkEvent::ChannelConnected(channel) => {
                        let agent = channel
                            .peer_version()
                            .map(|version| version.user_agent)
                            .unwrap_or_default();
                        info!(
                            peer = %channel.authority(),
                            inbound = channel.inbound(),
                            version = channel.negotiated_version(),
                            agent = %agent,
                            "peer connected"
                        );
                    }
                    NetworkEvent::ChannelDisconnected { authority, inbound } => {
                        debug!(peer = %authority, inbound, "peer disconnected");
                    }
                }
            }
        });

        Ok(())
    }

    pub async fn stop(&mut self) {
        self.network.stop().await;
        info!(
            addresses = self.network.address_count(),
            "node stopped"
        );
    }
}
