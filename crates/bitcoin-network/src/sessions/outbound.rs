//! Outbound session: batch-connected slots kept full.
//!
//! Each of the configured outbound slots runs its own cycle: race a batch of
//! dials against addresses taken from the host pool, shake the winner, hold
//! the slot until that channel terminates, repeat. Dropping the unfinished
//! dial futures when a winner lands is what stops the losing connectors; no
//! connector outlives its batch.

use super::{attach_protocols, SessionCore};
use crate::channel::Channel;
use crate::connect::Connector;
use crate::error::{NetworkError, NetworkResult};
use crate::messages::AddressItem;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tracing::{debug, info};

pub(crate) struct SessionOutbound {
    core: Arc<SessionCore>,
}

impl SessionOutbound {
    pub fn new(core: Arc<SessionCore>) -> Arc<Self> {
        Arc::new(Self { core })
    }

    /// Spawn one connect cycle per configured outbound slot.
    pub async fn start(self: &Arc<Self>) -> NetworkResult<()> {
        let settings = &self.core.settings;

        if settings.outbound_connections == 0 || settings.host_pool_capacity == 0 {
            debug!("not configured for outbound connections");
            return Err(NetworkError::Bypassed);
        }

        if self.core.hosts.address_count() == 0 {
            return Err(NetworkError::AddressNotFound);
        }

        self.core.begin()?;

        info!(
            slots = settings.outbound_connections,
            batch = settings.connect_batch_size,
            "maintaining outbound connections"
        );

        for slot in 0..settings.outbound_connections {
            let session = self.clone();
            tokio::spawn(async move { session.connect_cycle(slot).await });
        }

        Ok(())
    }

    pub fn stop(&self) {
        self.core.stop();
    }

    async fn connect_cycle(self: Arc<Self>, slot: usize) {
        let mut stop = self.core.stop_signal();
        let retry = self.core.settings.connect_timeout();

        loop {
            if self.core.stopped() {
                break;
            }

            let batch = tokio::select! {
                _ = stop.changed() => break,
                batch = self.batch() => batch,
            };

            match batch {
                Ok((channel, address)) => {
                    match self
                        .core
                        .start_channel(&channel, true, attach_protocols)
                        .await
                    {
                        Ok(()) => {
                            debug!(slot, peer = %channel.authority(), "outbound channel started");

                            // Hold the slot until the channel terminates.
                            let stopped = channel.subscribe_stop();
                            let reason = tokio::select! {
                                _ = stop.changed() => break,
                                reason = stopped => reason.unwrap_or(NetworkError::ChannelStopped),
                            };
                            debug!(slot, peer = %channel.authority(), %reason, "outbound channel stopped");

                            // The peer completed a handshake; keep its address.
                            let _ = self.core.hosts.restore(address).await;
                        }
                        Err(reason) => {
                            debug!(slot, peer = %channel.authority(), %reason, "outbound channel failed");
                        }
                    }
                    // A fresh batch for the vacated slot, without delay.
                }
                Err(_) => {
                    // The whole batch failed; pause before dialing again.
                    tokio::select! {
                        _ = stop.changed() => break,
                        _ = tokio::time::sleep(retry) => {}
                    }
                }
            }
        }

        self.core.stop();
    }

    /// Race one batch of dials; first connected socket wins.
    async fn batch(&self) -> NetworkResult<(Channel, AddressItem)> {
        let settings = &self.core.settings;
        let connector = Connector::new(settings.connect_timeout());
        let size = settings.connect_batch_size.max(1);

        let mut dials = FuturesUnordered::new();
        for _ in 0..size {
            let hosts = self.core.hosts.clone();
            dials.push(async move {
                let address = hosts.take().await?;
                let authority = address.authority();

                if self.core.settings.blacklisted(&authority) {
                    return Err(NetworkError::AddressBlocked);
                }

                let stream = connector.connect(&authority).await?;
                Ok((stream, authority, address))
            });
        }

        while let Some(dialed) = dials.next().await {
            if let Ok((stream, authority, address)) = dialed {
                // Dropping the rest of the batch aborts the losing dials.
                drop(dials);

                let channel =
                    Channel::new(stream, authority, false, self.core.settings.clone());
                return Ok((channel, address));
            }
        }

        Err(NetworkError::ConnectFailed)
    }
}
