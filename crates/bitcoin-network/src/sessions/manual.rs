//! Manual session: explicitly requested peers, retried forever.

use super::{attach_protocols, SessionCore};
use crate::authority::Authority;
use crate::channel::Channel;
use crate::connect::Connector;
use crate::error::{NetworkError, NetworkResult};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub(crate) struct SessionManual {
    core: Arc<SessionCore>,
}

impl SessionManual {
    pub fn new(core: Arc<SessionCore>) -> Arc<Self> {
        Arc::new(Self { core })
    }

    pub async fn start(self: &Arc<Self>) -> NetworkResult<()> {
        self.core.begin()
    }

    pub fn stop(&self) {
        self.core.stop();
    }

    /// Maintain a connection to the endpoint until the session stops.
    ///
    /// Unlike the outbound session this never gives up on its endpoint:
    /// connect failures retry the same address on the connect-timeout
    /// cadence, and an established channel that stops is re-dialed.
    pub fn connect(self: &Arc<Self>, authority: Authority) {
        info!(peer = %authority, "maintaining manual connection");

        let session = self.clone();
        tokio::spawn(async move { session.connect_cycle(authority).await });
    }

    async fn connect_cycle(self: Arc<Self>, authority: Authority) {
        let mut stop = self.core.stop_signal();
        let connector = Connector::new(self.core.settings.connect_timeout());
        let retry = self.core.settings.connect_timeout();

        loop {
            if self.core.stopped() {
                break;
            }

            let dialed = tokio::select! {
                _ = stop.changed() => break,
                dialed = connector.connect(&authority) => dialed,
            };

            match dialed {
                Ok(stream) => {
                    let channel = Channel::new(
                        stream,
                        authority,
                        false,
                        self.core.settings.clone(),
                    );

                    match self
                        .core
                        .start_channel(&channel, true, attach_protocols)
                        .await
                    {
                        Ok(()) => {
                            debug!(peer = %authority, "manual channel started");

                            let stopped = channel.subscribe_stop();
                            let reason = tokio::select! {
                                _ = stop.changed() => break,
                                reason = stopped => reason.unwrap_or(NetworkError::ChannelStopped),
                            };
                            debug!(peer = %authority, %reason, "manual channel stopped, re-dialing");
                        }
                        Err(reason) => {
                            warn!(peer = %authority, %reason, "manual channel failed");
                        }
                    }
                }
                Err(error) => {
                    debug!(peer = %authority, %error, "manual connect failed, retrying");
                    tokio::select! {
                        _ = stop.changed() => break,
                        _ = tokio::time::sleep(retry) => {}
                    }
                }
            }
        }

        debug!(peer = %authority, "manual connection abandoned");
    }
}
