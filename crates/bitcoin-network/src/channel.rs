//! The channel: a message-level connection to one peer.
//!
//! Every channel is an actor. A spawned task exclusively owns the framed
//! socket, the timers and the attached protocol state machines; everything
//! else holds a cloneable [`Channel`] handle and communicates by command.
//! This gives the serialized-execution guarantee the engine is built on: no
//! two protocol callbacks for one connection ever run concurrently.
//!
//! A channel is created paused. The owning session resumes it to run the
//! handshake, pauses it on completion, attaches the steady-state protocols
//! and resumes it again. `stop` is terminal and idempotent; stop subscribers
//! are one-shot senders, so the exactly-once guarantee is structural.

use crate::authority::Authority;
use crate::codec::MessageCodec;
use crate::error::{NetworkError, NetworkResult};
use crate::messages::{Message, Version};
use crate::settings::Settings;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, Sleep};
use tokio_util::codec::Framed;
use tracing::{debug, trace};

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Per-channel behavior attached by a session.
///
/// Implementations are state machines driven entirely from the channel actor:
/// `start` runs at attach time, `handle` for every decoded message in attach
/// order, `heartbeat` on the channel heartbeat timer, and `stopping` exactly
/// once when the channel terminates. Implementations must not block.
pub trait Protocol: Send {
    fn name(&self) -> &'static str;

    fn start(&mut self, _ctx: &mut ProtocolContext<'_>) {}

    fn handle(&mut self, _message: &Message, _ctx: &mut ProtocolContext<'_>) {}

    fn heartbeat(&mut self, _ctx: &mut ProtocolContext<'_>) {}

    fn stopping(&mut self, _reason: NetworkError) {}
}

/// Deferred effects requested by protocols during a dispatch.
#[derive(Default)]
struct Actions {
    outgoing: Vec<Message>,
    stop: Option<NetworkError>,
}

/// The view protocols get of their channel.
pub struct ProtocolContext<'a> {
    state: &'a ChannelState,
    settings: &'a Settings,
    actions: &'a mut Actions,
}

impl ProtocolContext<'_> {
    /// Queue a message; the actor writes it when the dispatch returns.
    pub fn send(&mut self, message: Message) {
        self.actions.outgoing.push(message);
    }

    /// Pause reading. Effective immediately: the paused flag must be
    /// observable by whoever a completion handler wakes, before the
    /// current dispatch even returns.
    pub fn pause(&mut self) {
        self.state.paused.store(true, Ordering::Relaxed);
    }

    /// Terminate the channel with the given reason.
    pub fn stop(&mut self, reason: NetworkError) {
        self.actions.stop.get_or_insert(reason);
    }

    pub fn authority(&self) -> Authority {
        self.state.authority
    }

    pub fn inbound(&self) -> bool {
        self.state.inbound
    }

    /// This channel's own handshake nonce.
    pub fn nonce(&self) -> u64 {
        self.state.nonce
    }

    pub fn negotiated_version(&self) -> u32 {
        self.state.negotiated_version.load(Ordering::Relaxed)
    }

    /// Lower the negotiated version; the codec picks it up immediately.
    pub fn set_negotiated_version(&mut self, version: u32) {
        self.state.negotiated_version.store(version, Ordering::Relaxed);
    }

    /// Record the peer's version message for later inspection.
    pub fn set_peer_version(&mut self, version: Version) {
        *self.state.peer_version.lock() = Some(version);
    }

    pub fn settings(&self) -> &Settings {
        self.settings
    }
}

enum ChannelCommand {
    Attach(Box<dyn Protocol>),
    Resume,
    Pause,
    Send(Message, oneshot::Sender<NetworkResult<()>>),
    Stop(NetworkError),
}

struct StopState {
    reason: Option<NetworkError>,
    subscribers: Vec<oneshot::Sender<NetworkError>>,
}

struct ChannelState {
    id: u64,
    authority: Authority,
    inbound: bool,
    nonce: u64,
    negotiated_version: Arc<AtomicU32>,
    peer_version: Mutex<Option<Version>>,
    paused: AtomicBool,
    stopped: AtomicBool,
    stop: Mutex<StopState>,
}

/// Cloneable handle to a channel actor.
#[derive(Clone)]
pub struct Channel {
    state: Arc<ChannelState>,
    commands: mpsc::UnboundedSender<ChannelCommand>,
}

impl Channel {
    /// Wrap a connected socket in a paused channel and spawn its actor.
    pub fn new(
        stream: TcpStream,
        authority: Authority,
        inbound: bool,
        settings: Arc<Settings>,
    ) -> Self {
        let negotiated_version = Arc::new(AtomicU32::new(settings.protocol_maximum));

        let state = Arc::new(ChannelState {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            authority,
            inbound,
            nonce: rand::random(),
            negotiated_version: negotiated_version.clone(),
            peer_version: Mutex::new(None),
            paused: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            stop: Mutex::new(StopState { reason: None, subscribers: Vec::new() }),
        });

        let codec = MessageCodec::new(settings.network_magic, negotiated_version);
        let framed = Framed::new(stream, codec);

        let (commands, receiver) = mpsc::unbounded_channel();

        let actor = ChannelActor {
            state: state.clone(),
            settings: settings.clone(),
            framed,
            commands: receiver,
            protocols: Vec::new(),
            heartbeat: heartbeat_interval(&settings),
            inactivity: Box::pin(tokio::time::sleep(settings.channel_inactivity())),
            expiration: Box::pin(tokio::time::sleep(settings.channel_expiration())),
        };
        tokio::spawn(actor.run());

        Self { state, commands }
    }

    /// Stable identity for network tables.
    pub fn id(&self) -> u64 {
        self.state.id
    }

    pub fn authority(&self) -> Authority {
        self.state.authority
    }

    pub fn inbound(&self) -> bool {
        self.state.inbound
    }

    /// Our handshake nonce for this channel.
    pub fn nonce(&self) -> u64 {
        self.state.nonce
    }

    pub fn negotiated_version(&self) -> u32 {
        self.state.negotiated_version.load(Ordering::Relaxed)
    }

    /// The peer's version message, once the handshake has received it.
    pub fn peer_version(&self) -> Option<Version> {
        self.state.peer_version.lock().clone()
    }

    pub fn stopped(&self) -> bool {
        self.state.stopped.load(Ordering::Relaxed)
    }

    pub fn paused(&self) -> bool {
        self.state.paused.load(Ordering::Relaxed)
    }

    /// Attach a protocol. Must be called while the channel is paused.
    pub fn attach(&self, protocol: Box<dyn Protocol>) {
        let _ = self.commands.send(ChannelCommand::Attach(protocol));
    }

    /// Begin the framed read loop on a channel created paused.
    pub fn start(&self) {
        self.resume();
    }

    /// Re-arm the read loop and restart the heartbeat and inactivity timers.
    pub fn resume(&self) {
        let _ = self.commands.send(ChannelCommand::Resume);
    }

    /// Stop scheduling reads; in-flight dispatch still completes.
    pub fn pause(&self) {
        let _ = self.commands.send(ChannelCommand::Pause);
    }

    /// Serialize and write one message, confirming the write.
    pub async fn send(&self, message: Message) -> NetworkResult<()> {
        if self.stopped() {
            return Err(NetworkError::ChannelStopped);
        }

        let (ack, response) = oneshot::channel();
        self.commands
            .send(ChannelCommand::Send(message, ack))
            .map_err(|_| NetworkError::ChannelStopped)?;
        response.await.unwrap_or(Err(NetworkError::ChannelStopped))
    }

    /// One-shot notification of terminal stop.
    ///
    /// Subscribing after the channel stopped resolves immediately with the
    /// terminal reason.
    pub fn subscribe_stop(&self) -> oneshot::Receiver<NetworkError> {
        let (sender, receiver) = oneshot::channel();
        let mut stop = self.state.stop.lock();
        match stop.reason {
            Some(reason) => {
                let _ = sender.send(reason);
            }
            None => stop.subscribers.push(sender),
        }
        receiver
    }

    /// Idempotent terminal transition.
    pub fn stop(&self, reason: NetworkError) {
        let _ = self.commands.send(ChannelCommand::Stop(reason));
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.state.id)
            .field("authority", &self.state.authority.to_string())
            .field("inbound", &self.state.inbound)
            .finish()
    }
}

fn heartbeat_interval(settings: &Settings) -> Interval {
    let period = settings.channel_heartbeat();
    // The first tick must wait a full period, not fire immediately.
    tokio::time::interval_at(Instant::now() + period, period)
}

struct ChannelActor {
    state: Arc<ChannelState>,
    settings: Arc<Settings>,
    framed: Framed<TcpStream, MessageCodec>,
    commands: mpsc::UnboundedReceiver<ChannelCommand>,
    protocols: Vec<Box<dyn Protocol>>,
    heartbeat: Interval,
    inactivity: Pin<Box<Sleep>>,
    expiration: Pin<Box<Sleep>>,
}

impl ChannelActor {
    async fn run(mut self) {
        let reason = self.run_loop().await;
        self.shutdown(reason).await;
    }

    async fn run_loop(&mut self) -> NetworkError {
        loop {
            let paused = self.state.paused.load(Ordering::Relaxed);

            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        // Every handle is gone; nothing can observe us.
                        return NetworkError::ChannelStopped;
                    };
                    match self.apply_command(command).await {
                        Ok(()) => {}
                        Err(reason) => return reason,
                    }
                }

                frame = self.framed.next(), if !paused => {
                    match frame {
                        Some(Ok(message)) => {
                            self.reset_inactivity();
                            trace!(
                                channel = self.state.id,
                                command = %message.command(),
                                "message received"
                            );
                            if let Err(reason) = self.dispatch(Some(&message)).await {
                                return reason;
                            }
                        }
                        Some(Err(reason)) => return reason,
                        None => return NetworkError::ChannelDropped,
                    }
                }

                _ = self.heartbeat.tick(), if !paused => {
                    if let Err(reason) = self.dispatch(None).await {
                        return reason;
                    }
                }

                _ = &mut self.inactivity, if !paused => {
                    return NetworkError::ChannelTimeout;
                }

                _ = &mut self.expiration => {
                    return NetworkError::ChannelDropped;
                }
            }
        }
    }

    async fn apply_command(&mut self, command: ChannelCommand) -> Result<(), NetworkError> {
        match command {
            ChannelCommand::Attach(mut protocol) => {
                debug_assert!(self.state.paused.load(Ordering::Relaxed));
                debug!(
                    channel = self.state.id,
                    protocol = protocol.name(),
                    "protocol attached"
                );

                let mut actions = Actions::default();
                protocol.start(&mut ProtocolContext {
                    state: &self.state,
                    settings: &self.settings,
                    actions: &mut actions,
                });
                self.protocols.push(protocol);
                self.apply_actions(actions).await
            }
            ChannelCommand::Resume => {
                self.state.paused.store(false, Ordering::Relaxed);
                self.heartbeat = heartbeat_interval(&self.settings);
                self.reset_inactivity();
                Ok(())
            }
            ChannelCommand::Pause => {
                self.state.paused.store(true, Ordering::Relaxed);
                Ok(())
            }
            ChannelCommand::Send(message, ack) => {
                let result = self.framed.send(message).await.map_err(map_send_error);
                let failed = result.as_ref().err().copied();
                let _ = ack.send(result);
                match failed {
                    Some(reason) => Err(reason),
                    None => Ok(()),
                }
            }
            ChannelCommand::Stop(reason) => Err(reason),
        }
    }

    /// Offer a message (or a heartbeat, when `None`) to every protocol in
    /// attach order, then apply the effects they requested.
    async fn dispatch(&mut self, message: Option<&Message>) -> Result<(), NetworkError> {
        let mut actions = Actions::default();

        for protocol in &mut self.protocols {
            let mut ctx = ProtocolContext {
                state: &self.state,
                settings: &self.settings,
                actions: &mut actions,
            };
            match message {
                Some(message) => protocol.handle(message, &mut ctx),
                None => protocol.heartbeat(&mut ctx),
            }
            if actions.stop.is_some() {
                break;
            }
        }

        self.apply_actions(actions).await
    }

    async fn apply_actions(&mut self, actions: Actions) -> Result<(), NetworkError> {
        for message in actions.outgoing {
            trace!(channel = self.state.id, command = %message.command(), "message sent");
            if let Err(e) = self.framed.feed(message).await {
                return Err(map_send_error(e));
            }
        }
        if let Err(e) = self.framed.flush().await {
            return Err(map_send_error(e));
        }

        match actions.stop {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }

    fn reset_inactivity(&mut self) {
        self.inactivity
            .as_mut()
            .reset(Instant::now() + self.settings.channel_inactivity());
    }

    async fn shutdown(mut self, reason: NetworkError) {
        self.state.stopped.store(true, Ordering::Relaxed);
        self.state.paused.store(true, Ordering::Relaxed);

        debug!(
            channel = self.state.id,
            peer = %self.state.authority,
            %reason,
            "channel stopped"
        );

        for protocol in &mut self.protocols {
            protocol.stopping(reason);
        }
        self.protocols.clear();

        let _ = self.framed.close().await;

        // First (and only) terminal transition claims the subscribers.
        let subscribers = {
            let mut stop = self.state.stop.lock();
            stop.reason = Some(reason);
            std::mem::take(&mut stop.subscribers)
        };
        for subscriber in subscribers {
            let _ = subscriber.send(reason);
        }

        // Fail any sends that raced the stop.
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            if let ChannelCommand::Send(_, ack) = command {
                let _ = ack.send(Err(NetworkError::ChannelStopped));
            }
        }
    }
}

/// Write-side failures terminate the channel like read-side ones.
fn map_send_error(error: NetworkError) -> NetworkError {
    match error {
        // Version gating on the send path is a local bug, not a peer fault.
        NetworkError::UnknownMessage => NetworkError::OperationFailed,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{level, Ping};
    use tokio::net::TcpListener;

    async fn pair(settings: Arc<Settings>) -> (Channel, Channel) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let (client, server) =
            tokio::join!(TcpStream::connect(address), listener.accept());
        let client = client.unwrap();
        let (server, peer) = server.unwrap();

        let outbound = Channel::new(client, Authority::from(address), false, settings.clone());
        let inbound = Channel::new(server, Authority::from(peer), true, settings);
        (outbound, inbound)
    }

    fn test_settings() -> Arc<Settings> {
        Arc::new(Settings {
            protocol_maximum: level::BIP61,
            ..Settings::default()
        })
    }

    struct Recorder {
        seen: mpsc::UnboundedSender<Message>,
    }

    impl Protocol for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn handle(&mut self, message: &Message, _ctx: &mut ProtocolContext<'_>) {
            let _ = self.seen.send(message.clone());
        }
    }

    #[tokio::test]
    async fn test_channel_starts_paused() {
        let (outbound, inbound) = pair(test_settings()).await;
        assert!(outbound.paused());
        assert!(inbound.paused());
        assert!(!outbound.stopped());
    }

    #[tokio::test]
    async fn test_send_and_dispatch() {
        let (outbound, inbound) = pair(test_settings()).await;

        let (seen, mut messages) = mpsc::unbounded_channel();
        inbound.attach(Box::new(Recorder { seen }));
        inbound.resume();

        let ping = Message::Ping(Ping::with_nonce(7));
        outbound.send(ping.clone()).await.unwrap();

        let received = messages.recv().await.unwrap();
        assert_eq!(received, ping);
    }

    #[tokio::test]
    async fn test_paused_channel_does_not_dispatch() {
        let (outbound, inbound) = pair(test_settings()).await;

        let (seen, mut messages) = mpsc::unbounded_channel();
        inbound.attach(Box::new(Recorder { seen }));

        outbound.send(Message::Ping(Ping::with_nonce(1))).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(messages.try_recv().is_err());

        // Resuming delivers the buffered frame.
        inbound.resume();
        assert!(messages.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_exactly_once() {
        let (outbound, _inbound) = pair(test_settings()).await;

        let first = outbound.subscribe_stop();
        let second = outbound.subscribe_stop();

        outbound.stop(NetworkError::ChannelTimeout);
        outbound.stop(NetworkError::BadStream);
        outbound.stop(NetworkError::ChannelTimeout);

        // Both subscribers observe the first reason exactly once.
        assert_eq!(first.await.unwrap(), NetworkError::ChannelTimeout);
        assert_eq!(second.await.unwrap(), NetworkError::ChannelTimeout);
        assert!(outbound.stopped());

        // Late subscription resolves immediately with the terminal reason.
        let late = outbound.subscribe_stop();
        assert_eq!(late.await.unwrap(), NetworkError::ChannelTimeout);
    }

    #[tokio::test]
    async fn test_peer_close_stops_channel() {
        let (outbound, inbound) = pair(test_settings()).await;
        let stopped = outbound.subscribe_stop();

        outbound.resume();
        inbound.stop(NetworkError::ChannelStopped);

        assert_eq!(stopped.await.unwrap(), NetworkError::ChannelDropped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactivity_timeout() {
        let settings = Arc::new(Settings {
            protocol_maximum: level::BIP61,
            channel_inactivity_minutes: 1,
            ..Settings::default()
        });
        let (outbound, _inbound) = pair(settings).await;

        let stopped = outbound.subscribe_stop();
        outbound.resume();

        assert_eq!(stopped.await.unwrap(), NetworkError::ChannelTimeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiration_fires_even_paused() {
        let settings = Arc::new(Settings {
            protocol_maximum: level::BIP61,
            channel_expiration_minutes: 1,
            ..Settings::default()
        });
        let (outbound, _inbound) = pair(settings).await;

        let stopped = outbound.subscribe_stop();
        assert_eq!(stopped.await.unwrap(), NetworkError::ChannelDropped);
    }

    #[tokio::test]
    async fn test_send_after_stop_fails() {
        let (outbound, _inbound) = pair(test_settings()).await;

        let stopped = outbound.subscribe_stop();
        outbound.stop(NetworkError::ChannelStopped);
        let _ = stopped.await;

        let result = outbound.send(Message::Ping(Ping::with_nonce(1))).await;
        assert_eq!(result, Err(NetworkError::ChannelStopped));
    }
}
