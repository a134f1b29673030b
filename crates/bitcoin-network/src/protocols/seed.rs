//! Seed bootstrap protocol.
//!
//! A seed channel exists only to fill an empty host pool: request addresses,
//! save whatever arrives, then close the channel so the seed session can move
//! on. Seeds are not kept as peers.

use crate::channel::{Channel, Protocol, ProtocolContext};
use crate::error::NetworkError;
use crate::hosts::Hosts;
use crate::messages::{AddressItem, GetAddress, Message};
use tracing::{debug, warn};

pub struct Seed31402 {
    channel: Channel,
    hosts: Hosts,
    saving: bool,
}

impl Seed31402 {
    pub fn new(channel: Channel, hosts: Hosts) -> Self {
        Self { channel, hosts, saving: false }
    }
}

impl Protocol for Seed31402 {
    fn name(&self) -> &'static str {
        "seed_31402"
    }

    fn start(&mut self, ctx: &mut ProtocolContext<'_>) {
        ctx.send(Message::GetAddress(GetAddress));
    }

    fn handle(&mut self, message: &Message, ctx: &mut ProtocolContext<'_>) {
        let Message::Address(address) = message else {
            return;
        };

        if self.saving {
            return;
        }
        self.saving = true;

        let usable: Vec<AddressItem> = address
            .addresses
            .iter()
            .filter(|item| {
                let authority = item.authority();
                !authority.is_unspecified()
                    && authority.port() != 0
                    && !ctx.settings().blacklisted(&authority)
            })
            .copied()
            .collect();

        let peer = ctx.authority();
        let channel = self.channel.clone();
        let hosts = self.hosts.clone();

        tokio::spawn(async move {
            match hosts.save(usable).await {
                Ok(accepted) => debug!(%peer, accepted, "seed addresses saved"),
                Err(error) => warn!(%peer, %error, "seed save failed"),
            }

            // The seed has served its purpose.
            channel.stop(NetworkError::ChannelStopped);
        });
    }
}
