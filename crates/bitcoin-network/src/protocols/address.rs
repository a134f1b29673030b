//! Address gossip protocols.

use crate::channel::{Channel, Protocol, ProtocolContext};
use crate::hosts::Hosts;
use crate::messages::{Address, AddressItem, GetAddress, Message, MAX_ADDRESSES};
use tracing::{debug, warn};

/// Inbound address gossip: collect peer addresses into the host pool.
pub struct AddressIn31402 {
    hosts: Hosts,
    /// Ask the peer for addresses at start.
    request: bool,
}

impl AddressIn31402 {
    pub fn new(hosts: Hosts, request: bool) -> Self {
        Self { hosts, request }
    }
}

impl Protocol for AddressIn31402 {
    fn name(&self) -> &'static str {
        "address_in_31402"
    }

    fn start(&mut self, ctx: &mut ProtocolContext<'_>) {
        if self.request {
            ctx.send(Message::GetAddress(GetAddress));
        }
    }

    fn handle(&mut self, message: &Message, ctx: &mut ProtocolContext<'_>) {
        let Message::Address(address) = message else {
            return;
        };

        let start_size = address.addresses.len();
        let usable: Vec<AddressItem> = address
            .addresses
            .iter()
            .filter(|item| {
                let authority = item.authority();
                !authority.is_unspecified()
                    && authority.port() != 0
                    && authority != ctx.authority()
                    && !ctx.settings().blacklisted(&authority)
            })
            .copied()
            .collect();

        let filtered = start_size - usable.len();
        let peer = ctx.authority();
        let hosts = self.hosts.clone();

        // The pool is an actor; hand the batch off without blocking dispatch.
        tokio::spawn(async move {
            match hosts.save(usable).await {
                Ok(accepted) => {
                    debug!(%peer, accepted, filtered, start_size, "addresses saved")
                }
                Err(error) => warn!(%peer, %error, "address save failed"),
            }
        });
    }
}

/// Outbound address gossip: answer one `getaddr` with a pool snapshot.
pub struct AddressOut31402 {
    channel: Channel,
    hosts: Hosts,
    sent: bool,
}

impl AddressOut31402 {
    pub fn new(channel: Channel, hosts: Hosts) -> Self {
        Self { channel, hosts, sent: false }
    }
}

impl Protocol for AddressOut31402 {
    fn name(&self) -> &'static str {
        "address_out_31402"
    }

    fn handle(&mut self, message: &Message, ctx: &mut ProtocolContext<'_>) {
        if !matches!(message, Message::GetAddress(_)) {
            return;
        }

        // One snapshot per channel; repeated requests are ignored.
        if self.sent {
            return;
        }
        self.sent = true;

        let peer = ctx.authority();
        let channel = self.channel.clone();
        let hosts = self.hosts.clone();

        tokio::spawn(async move {
            let Ok(mut items) = hosts.fetch().await else {
                return;
            };
            items.retain(|item| item.authority() != peer);
            items.truncate(MAX_ADDRESSES as usize);

            let count = items.len();
            if let Err(error) = channel.send(Message::Address(Address { addresses: items })).await {
                debug!(%peer, %error, "address snapshot send failed");
            } else {
                debug!(%peer, count, "address snapshot sent");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::Authority;
    use crate::error::NetworkError;
    use crate::settings::Settings;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};

    fn item(text: &str) -> AddressItem {
        AddressItem::new(0, 1, &text.parse::<Authority>().unwrap())
    }

    fn hosts(name: &str) -> Hosts {
        let file = std::env::temp_dir()
            .join(format!("address-test-{}-{}", std::process::id(), name));
        let _ = std::fs::remove_file(&file);
        Hosts::start(&file, 100).unwrap()
    }

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

    async fn wait_for_count(hosts: &Hosts, expected: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while hosts.address_count() != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("pool never reached expected count");
    }

    #[tokio::test]
    async fn test_gossip_saves_filtered_addresses() {
        let settings = Arc::new(Settings {
            blacklists: vec!["6.6.6.6".parse().unwrap()],
            ..Settings::default()
        });
        let (outbound, inbound) = pair(settings).await;

        let pool = hosts("in");
        inbound.attach(Box::new(AddressIn31402::new(pool.clone(), false)));
        inbound.resume();

        let gossip = Address {
            addresses: vec![
                item("1.2.3.4:8333"),
                item("6.6.6.6:8333"),                      // blacklisted
                AddressItem::new(0, 1, &"5.5.5.5".parse().unwrap()), // port zero
                item("7.7.7.7:8333"),
            ],
        };
        outbound.send(Message::Address(gossip)).await.unwrap();

        wait_for_count(&pool, 2).await;
    }

    #[tokio::test]
    async fn test_getaddr_answered_once() {
        let (outbound, inbound) = pair(Arc::new(Settings::default())).await;

        let pool = hosts("out");
        pool.save(vec![item("1.2.3.4:8333"), item("5.6.7.8:8333")]).await.unwrap();

        inbound.attach(Box::new(AddressOut31402::new(inbound.clone(), pool)));
        inbound.resume();

        let receive_pool = hosts("received");
        outbound.attach(Box::new(AddressIn31402::new(receive_pool.clone(), true)));
        outbound.resume();

        // The outbound side requested at start; the snapshot lands in its pool.
        wait_for_count(&receive_pool, 2).await;

        // A second request is ignored.
        outbound.send(Message::GetAddress(GetAddress)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(receive_pool.address_count(), 2);
    }

    #[tokio::test]
    async fn test_send_after_channel_stop_is_quiet() {
        let (outbound, inbound) = pair(Arc::new(Settings::default())).await;
        let pool = hosts("stopped");

        inbound.attach(Box::new(AddressOut31402::new(inbound.clone(), pool)));
        inbound.stop(NetworkError::ChannelStopped);

        let stopped = outbound.subscribe_stop();
        outbound.resume();
        let _ = stopped.await;
    }
}
