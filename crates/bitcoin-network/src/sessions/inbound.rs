//! Inbound session: accept loop over the configured listen port.

use super::{attach_protocols, SessionCore};
use crate::channel::Channel;
use crate::connect::Acceptor;
use crate::error::{NetworkError, NetworkResult};
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

pub(crate) struct SessionInbound {
    core: Arc<SessionCore>,
    /// The bound listen port; resolves a configured port of zero.
    pub port: std::sync::atomic::AtomicU16,
}

impl SessionInbound {
    pub fn new(core: Arc<SessionCore>) -> Arc<Self> {
        Arc::new(Self { core, port: std::sync::atomic::AtomicU16::new(0) })
    }

    /// Bind the acceptor and spawn the accept loop.
    ///
    /// Bind failure is fatal and surfaces to the network start caller.
    pub async fn start(self: &Arc<Self>) -> NetworkResult<()> {
        let settings = &self.core.settings;

        if !settings.inbound_enabled || settings.inbound_connections == 0 {
            debug!("not configured for inbound connections");
            return Err(NetworkError::Bypassed);
        }

        self.core.begin()?;

        let acceptor = Acceptor::bind(settings.inbound_port).await?;
        self.port.store(acceptor.local_port(), std::sync::atomic::Ordering::Relaxed);

        info!(
            port = acceptor.local_port(),
            limit = settings.inbound_connections,
            "accepting inbound connections"
        );

        let session = self.clone();
        tokio::spawn(async move { session.accept_loop(acceptor).await });
        Ok(())
    }

    pub fn stop(&self) {
        self.core.stop();
    }

    async fn accept_loop(self: Arc<Self>, acceptor: Acceptor) {
        let mut stop = self.core.stop_signal();

        loop {
            let accepted = tokio::select! {
                _ = stop.changed() => break,
                accepted = acceptor.accept() => accepted,
            };

            if self.core.stopped() {
                break;
            }

            match accepted {
                Ok((stream, authority)) => {
                    // Screen, then hand off so the loop keeps accepting.
                    if let Some(channel) = self.screen(stream, authority) {
                        let session = self.clone();
                        tokio::spawn(async move {
                            let result = session
                                .core
                                .start_channel(&channel, true, attach_protocols)
                                .await;
                            match result {
                                Ok(()) => debug!(peer = %channel.authority(), "inbound channel started"),
                                Err(reason) => {
                                    debug!(peer = %channel.authority(), %reason, "inbound channel failed")
                                }
                            }
                        });
                    }
                }
                Err(error) => {
                    warn!(%error, "accept failed, delaying");
                    let delay = self.core.settings.connect_timeout();
                    tokio::select! {
                        _ = stop.changed() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.core.stop();
        debug!("inbound session stopped");
    }

    /// Admission checks: whitelist, blacklist, connection cap.
    fn screen(&self, stream: TcpStream, authority: crate::authority::Authority) -> Option<Channel> {
        let settings = &self.core.settings;

        if !settings.whitelisted(&authority) {
            debug!(peer = %authority, "dropping non-whitelisted connection");
            return None;
        }

        if settings.blacklisted(&authority) {
            debug!(peer = %authority, "dropping blacklisted connection");
            return None;
        }

        if self.core.tables.inbound_channel_count() >= settings.inbound_connections {
            warn!(peer = %authority, "dropping oversubscribed connection");
            return None;
        }

        Some(Channel::new(stream, authority, true, self.core.settings.clone()))
    }
}
