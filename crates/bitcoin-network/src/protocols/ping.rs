//! Keep-alive protocols.

use crate::channel::{Protocol, ProtocolContext};
use crate::error::NetworkError;
use crate::messages::{Message, Ping, Pong};
use tracing::{debug, warn};

/// Baseline keep-alive: empty pings on the heartbeat, nothing tracked.
///
/// Pings at this level carry no nonce, so incoming pings get no reply and
/// liveness is enforced by the channel inactivity timer alone.
#[derive(Default)]
pub struct Ping31402;

impl Protocol for Ping31402 {
    fn name(&self) -> &'static str {
        "ping_31402"
    }

    fn heartbeat(&mut self, ctx: &mut ProtocolContext<'_>) {
        ctx.send(Message::Ping(Ping::default()));
    }
}

/// bip31 keep-alive: nonce pings paired with pongs.
#[derive(Default)]
pub struct Ping60001 {
    pending: Option<u64>,
}

impl Protocol for Ping60001 {
    fn name(&self) -> &'static str {
        "ping_60001"
    }

    fn heartbeat(&mut self, ctx: &mut ProtocolContext<'_>) {
        // An unanswered ping from the previous beat means a dead peer.
        if self.pending.is_some() {
            warn!(peer = %ctx.authority(), "ping latency limit exceeded");
            ctx.stop(NetworkError::ChannelTimeout);
            return;
        }

        let nonce = rand::random();
        self.pending = Some(nonce);
        ctx.send(Message::Ping(Ping::with_nonce(nonce)));
    }

    fn handle(&mut self, message: &Message, ctx: &mut ProtocolContext<'_>) {
        match message {
            Message::Ping(ping) => {
                ctx.send(Message::Pong(Pong { nonce: ping.nonce.unwrap_or_default() }));
            }
            Message::Pong(pong) => match self.pending.take() {
                Some(nonce) if nonce == pong.nonce => {
                    debug!(peer = %ctx.authority(), "pong received");
                }
                _ => {
                    warn!(peer = %ctx.authority(), "invalid pong nonce");
                    ctx.stop(NetworkError::BadStream);
                }
            },
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::Authority;
    use crate::channel::Channel;
    use crate::messages::level;
    use crate::settings::Settings;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};

    async fn pair(settings: Arc<Settings>) -> (Channel, Channel) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let (client, server) = tokio::join!(TcpStream::connect(address), listener.accept());
        let (server, peer) = server.unwrap();

        (
            Channel::new(client.unwrap(), Authority::from(address), false, settings.clone()),
            Channel::new(server, Authority::from(peer), true, settings),
        )
    }

    fn fast_heartbeat() -> Arc<Settings> {
        Arc::new(Settings {
            protocol_maximum: level::BIP61,
            channel_heartbeat_seconds: 1,
            channel_inactivity_minutes: 60,
            ..Settings::default()
        })
    }

    #[tokio::test]
    async fn test_ping_cycle_keeps_channel_alive() {
        let (outbound, inbound) = pair(fast_heartbeat()).await;

        outbound.attach(Box::new(Ping60001::default()));
        inbound.attach(Box::new(Ping60001::default()));
        outbound.resume();
        inbound.resume();

        let stopped = outbound.subscribe_stop();

        // Several heartbeats worth of pings answered by the peer.
        tokio::time::timeout(Duration::from_millis(3500), stopped)
            .await
            .expect_err("channel must stay alive while pongs flow");
    }

    #[tokio::test]
    async fn test_unanswered_ping_times_out() {
        let (outbound, inbound) = pair(fast_heartbeat()).await;

        // Only our side runs the protocol; the peer never answers.
        outbound.attach(Box::new(Ping60001::default()));
        outbound.resume();
        inbound.resume();

        let stopped = outbound.subscribe_stop();
        assert_eq!(stopped.await.unwrap(), NetworkError::ChannelTimeout);
    }
}
