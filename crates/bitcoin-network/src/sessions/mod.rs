//! Sessions: network-wide owners of channel classes.
//!
//! Every session drives its channels through the same start sequence; the
//! session kinds differ only in where their sockets come from and what they
//! do when a channel ends. All session bookkeeping (the pending set, the
//! nonce table, the channel store) lives behind the network tables, so a
//! channel observed by one session is visible to the policy checks of all.

mod inbound;
mod manual;
mod outbound;
mod seed;

pub(crate) use inbound::SessionInbound;
pub(crate) use manual::SessionManual;
pub(crate) use outbound::SessionOutbound;
pub(crate) use seed::SessionSeed;

use crate::channel::Channel;
use crate::error::{NetworkError, NetworkResult};
use crate::hosts::Hosts;
use crate::messages::level;
use crate::network::Tables;
use crate::protocols::{
    AddressIn31402, AddressOut31402, Alert31402, HandshakeTier, Ping31402, Ping60001,
    Reject70002, VersionProtocol,
};
use crate::settings::{service, Settings};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

/// State shared by every session kind.
pub(crate) struct SessionCore {
    pub settings: Arc<Settings>,
    pub hosts: Hosts,
    pub tables: Arc<Tables>,
    /// Network-wide stop signal; loops watch it.
    stop_watch: watch::Receiver<bool>,
    stopped: AtomicBool,
    /// Channels still shaking, stopped en masse when the session stops.
    pending: Mutex<HashMap<u64, Channel>>,
}

impl SessionCore {
    pub fn new(
        settings: Arc<Settings>,
        hosts: Hosts,
        tables: Arc<Tables>,
        stop: watch::Receiver<bool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            hosts,
            tables,
            stop_watch: stop,
            stopped: AtomicBool::new(true),
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Transition stopped to started; starting twice is an error.
    pub fn begin(&self) -> NetworkResult<()> {
        if !self.stopped.swap(false, Ordering::Relaxed) {
            return Err(NetworkError::OperationFailed);
        }
        Ok(())
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    /// Idempotent: stop and clear all pending channels.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::Relaxed) {
            return;
        }

        let pending: Vec<Channel> = self.pending.lock().drain().map(|(_, c)| c).collect();
        for channel in pending {
            channel.stop(NetworkError::ServiceStopped);
        }
    }

    /// A stop receiver for a spawned loop.
    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop_watch.clone()
    }

    /// Drive a channel through handshake, storage and protocol attachment.
    ///
    /// On success the channel is stored, running its steady-state protocols,
    /// and a watcher task will unstore it at terminal stop. On failure the
    /// channel has been stopped with the returned reason.
    pub async fn start_channel(
        &self,
        channel: &Channel,
        notify: bool,
        attach: impl FnOnce(&SessionCore, &Channel),
    ) -> NetworkResult<()> {
        if self.stopped() {
            channel.stop(NetworkError::ServiceStopped);
            return Err(NetworkError::ServiceStopped);
        }

        let inbound = channel.inbound();

        // Pend the shaking outbound nonce, unless it collides.
        if !inbound && !self.tables.pend(channel.nonce()) {
            channel.stop(NetworkError::ChannelConflict);
            return Err(NetworkError::ChannelConflict);
        }

        self.pending.lock().insert(channel.id(), channel.clone());

        let result = self.shake(channel, inbound).await;

        self.pending.lock().remove(&channel.id());
        if !inbound && !self.tables.unpend(channel.nonce()) {
            debug!(channel = channel.id(), "unpend failed to locate nonce (ok on stop)");
        }

        let result = result.and_then(|()| self.tables.store(channel, notify));
        if let Err(reason) = result {
            channel.stop(reason);
            return Err(reason);
        }

        // Stored: arrange unstore at terminal stop, then go steady-state.
        let stopped = channel.subscribe_stop();
        let tables = self.tables.clone();
        let watched = channel.clone();
        tokio::spawn(async move {
            let _ = stopped.await;
            if tables.unstore(&watched).is_err() {
                warn!(channel = watched.id(), "unstore failed to locate channel");
            }
        });

        attach(self, channel);
        channel.resume();
        Ok(())
    }

    /// Attach the tier-selected handshake, resume, and await completion
    /// under the handshake timer.
    async fn shake(&self, channel: &Channel, inbound: bool) -> NetworkResult<()> {
        // Inbound peers need not advertise any services (many do not).
        // Outbound peers must carry the configured minimum, and witness
        // service when we serve witness ourselves.
        let minimum_services = if inbound {
            service::NODE_NONE
        } else {
            (self.settings.services & service::NODE_WITNESS) | self.settings.services_minimum
        };

        let (completion, shaken) = oneshot::channel();
        let tier = HandshakeTier::select(&self.settings);
        channel.attach(Box::new(VersionProtocol::new(
            tier,
            &self.settings,
            minimum_services,
            self.tables.nonces(),
            completion,
        )));
        channel.resume();

        match tokio::time::timeout(self.settings.channel_handshake(), shaken).await {
            Err(_) => Err(NetworkError::ChannelTimeout),
            Ok(Err(_)) => Err(NetworkError::ChannelStopped),
            Ok(Ok(result)) => result,
        }
    }
}

/// The steady-state protocol set shared by inbound, outbound and manual
/// channels, selected by the negotiated version.
pub(crate) fn attach_protocols(core: &SessionCore, channel: &Channel) {
    let version = channel.negotiated_version();
    let settings = &core.settings;

    if version >= level::BIP31 {
        channel.attach(Box::new(Ping60001::default()));
    } else {
        channel.attach(Box::new(Ping31402));
    }

    if settings.enable_alert {
        channel.attach(Box::new(Alert31402));
    }

    if settings.enable_reject && version >= level::BIP61 {
        channel.attach(Box::new(Reject70002));
    }

    let request = settings.host_pool_capacity > 0;
    channel.attach(Box::new(AddressIn31402::new(core.hosts.clone(), request)));
    channel.attach(Box::new(AddressOut31402::new(channel.clone(), core.hosts.clone())));
}
