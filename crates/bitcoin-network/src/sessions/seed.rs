//! Seed session: one-time bootstrap of an empty host pool.

use super::SessionCore;
use crate::channel::Channel;
use crate::connect::Connector;
use crate::error::{NetworkError, NetworkResult};
use crate::messages::level;
use crate::protocols::{Ping31402, Ping60001, Seed31402};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub(crate) struct SessionSeed {
    core: Arc<SessionCore>,
}

impl SessionSeed {
    pub fn new(core: Arc<SessionCore>) -> Arc<Self> {
        Arc::new(Self { core })
    }

    /// Contact every configured seed and wait for the pool to fill.
    ///
    /// Runs to completion rather than spawning a steady-state loop; the
    /// session is over when every seed channel has come and gone.
    pub async fn start(self: &Arc<Self>) -> NetworkResult<()> {
        let settings = &self.core.settings;

        if settings.host_pool_capacity == 0 || settings.seeds.is_empty() {
            debug!("not configured for seeding");
            return Err(NetworkError::Bypassed);
        }

        self.core.begin()?;
        info!(seeds = settings.seeds.len(), "seeding the host pool");

        let attempts = settings
            .seeds
            .iter()
            .map(|seed| self.seed(*seed))
            .collect::<Vec<_>>();
        join_all(attempts).await;

        self.core.stop();

        if self.core.hosts.address_count() == 0 {
            warn!("seeding completed without addresses");
            return Err(NetworkError::SeedingUnsuccessful);
        }

        info!(count = self.core.hosts.address_count(), "seeding complete");
        Ok(())
    }

    /// One seed conversation: dial, shake, gossip, done.
    async fn seed(&self, authority: crate::authority::Authority) {
        let connector = Connector::new(self.core.settings.connect_timeout());

        let stream = match connector.connect(&authority).await {
            Ok(stream) => stream,
            Err(error) => {
                debug!(seed = %authority, %error, "seed unreachable");
                return;
            }
        };

        let channel = Channel::new(stream, authority, false, self.core.settings.clone());

        let started = self
            .core
            .start_channel(&channel, false, |core, channel| {
                // Seeds run the minimal set: keep-alive plus address harvest.
                if channel.negotiated_version() >= level::BIP31 {
                    channel.attach(Box::new(Ping60001::default()));
                } else {
                    channel.attach(Box::new(Ping31402));
                }
                channel.attach(Box::new(Seed31402::new(channel.clone(), core.hosts.clone())));
            })
            .await;

        match started {
            Ok(()) => {
                // The seed protocol stops the channel once addresses land;
                // a chatty seed that never gossips is cut off regardless.
                let wait = self.core.settings.channel_inactivity();
                if tokio::time::timeout(wait, channel.subscribe_stop()).await.is_err() {
                    channel.stop(NetworkError::ChannelTimeout);
                }
                debug!(seed = %authority, "seed conversation finished");
            }
            Err(reason) => {
                debug!(seed = %authority, %reason, "seed handshake failed");
            }
        }
    }
}
