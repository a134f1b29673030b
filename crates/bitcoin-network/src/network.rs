//! The network: top-level owner of sessions, channels and the host pool.

use crate::authority::Authority;
use crate::channel::Channel;
use crate::error::{NetworkError, NetworkResult};
use crate::hosts::Hosts;
use crate::messages::AddressItem;
use crate::sessions::{SessionInbound, SessionManual, SessionOutbound, SessionSeed, SessionCore};
use crate::settings::Settings;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Broadcast notifications about stored channels.
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    /// A channel completed its handshake and was stored.
    ChannelConnected(Channel),
    /// A stored channel reached terminal stop.
    ChannelDisconnected {
        authority: Authority,
        inbound: bool,
    },
}

/// Network-wide channel and nonce bookkeeping.
///
/// Shared by every session so admission checks and self-connect detection
/// see all in-flight activity regardless of which session drives it.
pub(crate) struct Tables {
    /// Nonces of in-flight outbound handshakes.
    nonces: Arc<DashSet<u64>>,
    /// Stored channels by channel id.
    channels: DashMap<u64, Channel>,
    /// One stored channel per authority, per direction.
    inbound_authorities: Mutex<HashSet<Authority>>,
    outbound_authorities: Mutex<HashSet<Authority>>,
    inbound_count: AtomicUsize,
    outbound_count: AtomicUsize,
    events: broadcast::Sender<NetworkEvent>,
}

impl Tables {
    fn new(events: broadcast::Sender<NetworkEvent>) -> Arc<Self> {
        Arc::new(Self {
            nonces: Arc::new(DashSet::new()),
            channels: DashMap::new(),
            inbound_authorities: Mutex::new(HashSet::new()),
            outbound_authorities: Mutex::new(HashSet::new()),
            inbound_count: AtomicUsize::new(0),
            outbound_count: AtomicUsize::new(0),
            events,
        })
    }

    /// The nonce set, shared with handshake protocols.
    pub fn nonces(&self) -> Arc<DashSet<u64>> {
        self.nonces.clone()
    }

    /// Register an in-flight outbound handshake nonce.
    /// False on duplicate, which indicates a self-connect in flight.
    pub fn pend(&self, nonce: u64) -> bool {
        self.nonces.insert(nonce)
    }

    pub fn unpend(&self, nonce: u64) -> bool {
        self.nonces.remove(&nonce).is_some()
    }

    /// Store a shaken channel, enforcing per-direction authority exclusion.
    pub fn store(&self, channel: &Channel, notify: bool) -> NetworkResult<()> {
        let authorities = if channel.inbound() {
            &self.inbound_authorities
        } else {
            &self.outbound_authorities
        };

        if !authorities.lock().insert(channel.authority()) {
            return Err(NetworkError::AddressInUse);
        }

        self.channels.insert(channel.id(), channel.clone());
        let count = if channel.inbound() {
            &self.inbound_count
        } else {
            &self.outbound_count
        };
        count.fetch_add(1, Ordering::Relaxed);

        if notify {
            let _ = self.events.send(NetworkEvent::ChannelConnected(channel.clone()));
        }

        Ok(())
    }

    /// Remove a stored channel. Absence indicates a bookkeeping bug.
    pub fn unstore(&self, channel: &Channel) -> NetworkResult<()> {
        if self.channels.remove(&channel.id()).is_none() {
            return Err(NetworkError::OperationFailed);
        }

        let (authorities, count) = if channel.inbound() {
            (&self.inbound_authorities, &self.inbound_count)
        } else {
            (&self.outbound_authorities, &self.outbound_count)
        };
        authorities.lock().remove(&channel.authority());
        count.fetch_sub(1, Ordering::Relaxed);

        let _ = self.events.send(NetworkEvent::ChannelDisconnected {
            authority: channel.authority(),
            inbound: channel.inbound(),
        });

        Ok(())
    }

    pub fn inbound_channel_count(&self) -> usize {
        self.inbound_count.load(Ordering::Relaxed)
    }

    pub fn outbound_channel_count(&self) -> usize {
        self.outbound_count.load(Ordering::Relaxed)
    }

    pub fn channel_count(&self) -> usize {
        self.inbound_channel_count() + self.outbound_channel_count()
    }

    fn stop_all(&self, reason: NetworkError) {
        let channels: Vec<Channel> =
            self.channels.iter().map(|entry| entry.value().clone()).collect();
        for channel in channels {
            channel.stop(reason);
        }
    }
}

/// The process-wide networking engine.
pub struct Network {
    settings: Arc<Settings>,
    tables: Arc<Tables>,
    events: broadcast::Sender<NetworkEvent>,
    stop_sender: watch::Sender<bool>,
    hosts: Option<Hosts>,
    inbound: Option<Arc<SessionInbound>>,
    outbound: Option<Arc<SessionOutbound>>,
    manual: Option<Arc<SessionManual>>,
}

impl Network {
    pub fn new(settings: Settings) -> NetworkResult<Self> {
        settings.validate()?;

        let (events, _) = broadcast::channel(64);
        let (stop_sender, _) = watch::channel(false);

        Ok(Self {
            settings: Arc::new(settings),
            tables: Tables::new(events.clone()),
            events,
            stop_sender,
            hosts: None,
            inbound: None,
            outbound: None,
            manual: None,
        })
    }

    /// Load the host pool, seed it if empty, then start the sessions.
    ///
    /// Bypassed sessions are not failures; a listener that cannot bind, an
    /// empty pool with outbound configured, or unsuccessful seeding is.
    pub async fn start(&mut self) -> NetworkResult<()> {
        let settings = self.settings.clone();

        let hosts = Hosts::start(&settings.hosts_file, settings.host_pool_capacity)?;
        self.hosts = Some(hosts.clone());

        // Seed only when outbound work needs addresses it does not have.
        if settings.outbound_connections > 0
            && hosts.address_count() == 0
            && !settings.seeds.is_empty()
        {
            let seed = SessionSeed::new(self.session_core());
            match seed.start().await {
                Ok(()) | Err(NetworkError::Bypassed) => {}
                Err(reason) => return Err(reason),
            }
        }

        let inbound = SessionInbound::new(self.session_core());
        match inbound.start().await {
            Ok(()) | Err(NetworkError::Bypassed) => {}
            Err(reason) => return Err(reason),
        }
        self.inbound = Some(inbound);

        let outbound = SessionOutbound::new(self.session_core());
        match outbound.start().await {
            Ok(()) | Err(NetworkError::Bypassed) => {}
            Err(reason) => return Err(reason),
        }
        self.outbound = Some(outbound);

        let manual = SessionManual::new(self.session_core());
        manual.start().await?;
        self.manual = Some(manual);

        info!("network started");
        Ok(())
    }

    /// Kick off the steady-state work that start configured: the manually
    /// maintained peers. Accept and connect loops are already running.
    pub fn run(&self) -> NetworkResult<()> {
        for peer in &self.settings.peers {
            self.connect(*peer)?;
        }
        Ok(())
    }

    /// Maintain a connection to an explicit peer.
    pub fn connect(&self, authority: Authority) -> NetworkResult<()> {
        let manual = self.manual.as_ref().ok_or(NetworkError::ServiceStopped)?;
        manual.connect(authority);
        Ok(())
    }

    /// Signal all sessions, stop all channels, persist the host pool.
    pub async fn stop(&mut self) {
        info!("network stopping");
        let _ = self.stop_sender.send(true);

        if let Some(inbound) = &self.inbound {
            inbound.stop();
        }
        if let Some(outbound) = &self.outbound {
            outbound.stop();
        }
        if let Some(manual) = &self.manual {
            manual.stop();
        }

        self.tables.stop_all(NetworkError::ServiceStopped);

        if let Some(hosts) = self.hosts.take() {
            if let Err(error) = hosts.stop().await {
                warn!(%error, "host pool save failed");
            }
        }

        debug!("network stopped");
    }

    /// Subscribe to channel connect/disconnect broadcasts.
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events.subscribe()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The bound inbound listen port, once the inbound session started.
    pub fn inbound_port(&self) -> u16 {
        self.inbound
            .as_ref()
            .map(|session| session.port.load(Ordering::Relaxed))
            .unwrap_or_default()
    }

    pub fn channel_count(&self) -> usize {
        self.tables.channel_count()
    }

    pub fn inbound_channel_count(&self) -> usize {
        self.tables.inbound_channel_count()
    }

    pub fn outbound_channel_count(&self) -> usize {
        self.tables.outbound_channel_count()
    }

    /// Pop one address from the pool.
    pub async fn take(&self) -> NetworkResult<AddressItem> {
        self.hosts()?.take().await
    }

    /// Snapshot of the pool.
    pub async fn fetch(&self) -> NetworkResult<Vec<AddressItem>> {
        self.hosts()?.fetch().await
    }

    /// Return an address to the pool.
    pub async fn restore(&self, address: AddressItem) -> NetworkResult<()> {
        self.hosts()?.restore(address).await
    }

    /// Bulk-save gossiped addresses; returns the accepted count.
    pub async fn save(&self, addresses: Vec<AddressItem>) -> NetworkResult<usize> {
        self.hosts()?.save(addresses).await
    }

    pub fn address_count(&self) -> usize {
        self.hosts.as_ref().map(Hosts::address_count).unwrap_or_default()
    }

    fn hosts(&self) -> NetworkResult<&Hosts> {
        self.hosts.as_ref().ok_or(NetworkError::ServiceStopped)
    }

    fn session_core(&self) -> Arc<SessionCore> {
        SessionCore::new(
            self.settings.clone(),
            self.hosts.as_ref().expect("hosts started before sessions").clone(),
            self.tables.clone(),
            self.stop_sender.subscribe(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn test_channel(authority: &str, inbound: bool) -> Channel {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let (client, _server) = tokio::join!(TcpStream::connect(address), listener.accept());

        Channel::new(
            client.unwrap(),
            authority.parse().unwrap(),
            inbound,
            Arc::new(Settings::default()),
        )
    }

    fn tables() -> Arc<Tables> {
        let (events, _) = broadcast::channel(8);
        Tables::new(events)
    }

    #[test]
    fn test_pend_is_exclusive() {
        let tables = tables();
        assert!(tables.pend(5));
        assert!(!tables.pend(5));
        assert!(tables.unpend(5));
        assert!(!tables.unpend(5));
        assert!(tables.pend(5));
    }

    #[tokio::test]
    async fn test_store_excludes_duplicate_authority_per_direction() {
        let tables = tables();

        let first = test_channel("9.9.9.9:8333", true).await;
        let duplicate = test_channel("9.9.9.9:8333", true).await;
        let other_direction = test_channel("9.9.9.9:8333", false).await;

        assert_eq!(tables.store(&first, false), Ok(()));
        assert_eq!(tables.store(&duplicate, false), Err(NetworkError::AddressInUse));
        assert_eq!(tables.store(&other_direction, false), Ok(()));

        assert_eq!(tables.inbound_channel_count(), 1);
        assert_eq!(tables.outbound_channel_count(), 1);
        assert_eq!(tables.channel_count(), 2);
    }

    #[tokio::test]
    async fn test_unstore_frees_the_authority() {
        let tables = tables();

        let first = test_channel("8.8.8.8:8333", true).await;
        assert_eq!(tables.store(&first, false), Ok(()));
        assert_eq!(tables.unstore(&first), Ok(()));
        assert_eq!(tables.channel_count(), 0);

        // Absence on unstore is a bookkeeping bug signal.
        assert_eq!(tables.unstore(&first), Err(NetworkError::OperationFailed));

        let replacement = test_channel("8.8.8.8:8333", true).await;
        assert_eq!(tables.store(&replacement, false), Ok(()));
    }

    #[tokio::test]
    async fn test_store_notify_broadcasts() {
        let (events, mut receiver) = broadcast::channel(8);
        let tables = Tables::new(events);

        let channel = test_channel("7.7.7.7:8333", false).await;
        tables.store(&channel, true).unwrap();

        match receiver.try_recv().unwrap() {
            NetworkEvent::ChannelConnected(stored) => {
                assert_eq!(stored.authority(), channel.authority());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
