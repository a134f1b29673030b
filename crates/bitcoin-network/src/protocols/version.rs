//! Handshake protocols.
//!
//! Three tiers of the version/verack exchange, selected by the configured
//! protocol maximum: the baseline, the bip37 tier that adds the relay flag,
//! and the bip61 tier that announces failures with `reject` before stopping.
//!
//! The shake on each channel:
//! 1. Send our `version`.
//! 2. Receive the peer's `version`; screen nonce, version and services;
//!    negotiate `min(our maximum, peer version)`.
//! 3. Send `verack`.
//! 4. Receive the peer's `verack`.
//! 5. Pause the channel and resolve the completion handle.
//!
//! The completion handle is a one-shot sender: it resolves with success at
//! step 5 or with the terminal reason if the channel stops first, and can do
//! neither twice.

use crate::channel::{Protocol, ProtocolContext};
use crate::error::{NetworkError, NetworkResult};
use crate::messages::{
    AddressItem, Message, Reject, RejectCode, Version, VersionAck,
};
use crate::settings::{service, Settings};
use dashmap::DashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Handshake variant, by the feature level it speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeTier {
    /// Baseline version/verack.
    Version31402,
    /// Adds the bip37 relay flag.
    Version70001,
    /// Adds bip61 reject announcements for screening failures.
    Version70002,
}

impl HandshakeTier {
    /// Select the tier for the configured protocol maximum.
    pub fn select(settings: &Settings) -> Self {
        use crate::messages::level;

        if settings.enable_reject && settings.protocol_maximum >= level::BIP61 {
            HandshakeTier::Version70002
        } else if settings.protocol_maximum >= level::BIP37 {
            HandshakeTier::Version70001
        } else {
            HandshakeTier::Version31402
        }
    }
}

/// The version/verack handshake state machine.
pub struct VersionProtocol {
    tier: HandshakeTier,
    minimum_version: u32,
    maximum_version: u32,
    /// Required of the peer; inbound sessions require none.
    minimum_services: u64,
    maximum_services: u64,
    invalid_services: u64,
    relay: bool,
    user_agent: String,
    start_height: u32,
    /// Nonces of in-flight outbound handshakes, for self-connect detection.
    pending_nonces: Arc<DashSet<u64>>,
    completion: Option<oneshot::Sender<NetworkResult<()>>>,
    sent_version: bool,
    received_version: bool,
    received_acknowledge: bool,
}

impl VersionProtocol {
    pub fn new(
        tier: HandshakeTier,
        settings: &Settings,
        minimum_services: u64,
        pending_nonces: Arc<DashSet<u64>>,
        completion: oneshot::Sender<NetworkResult<()>>,
    ) -> Self {
        Self {
            tier,
            minimum_version: settings.protocol_minimum,
            maximum_version: settings.protocol_maximum,
            minimum_services,
            maximum_services: settings.services_maximum,
            invalid_services: settings.invalid_services,
            relay: settings.relay_transactions,
            user_agent: settings.user_agent.clone(),
            start_height: settings.start_height,
            pending_nonces,
            completion: Some(completion),
            sent_version: false,
            received_version: false,
            received_acknowledge: false,
        }
    }

    fn version_factory(&self, ctx: &ProtocolContext<'_>) -> Version {
        let timestamp = unix_time();

        // Peers cannot know each other's service level, so the receiver
        // address advertises none. The sender address is commonly null on
        // the network; this node does not track its own external address.
        Version {
            value: self.maximum_version,
            services: self.maximum_services,
            timestamp,
            address_receiver: AddressItem {
                timestamp: timestamp as u32,
                services: service::NODE_NONE,
                ip: ctx.authority().to_ip_address(),
                port: ctx.authority().port(),
            },
            address_sender: AddressItem {
                timestamp: timestamp as u32,
                services: self.maximum_services,
                ip: [0u8; 16],
                port: 0,
            },
            nonce: ctx.nonce(),
            user_agent: self.user_agent.clone(),
            start_height: self.start_height,
            relay: self.tier != HandshakeTier::Version31402 && self.relay,
        }
    }

    fn complete(&self) -> bool {
        self.sent_version && self.received_version && self.received_acknowledge
    }

    /// Reject the handshake, announcing it first on the bip61 tier.
    fn rejection(
        &mut self,
        ctx: &mut ProtocolContext<'_>,
        command: &str,
        code: RejectCode,
        reason: &str,
        error: NetworkError,
    ) {
        warn!(peer = %ctx.authority(), command, reason, "handshake rejected");

        if self.tier == HandshakeTier::Version70002 {
            ctx.send(Message::Reject(Reject {
                message: command.to_string(),
                code,
                reason: reason.to_string(),
                hash: None,
            }));
        }

        ctx.stop(error);
    }

    fn handle_version(&mut self, message: &Version, ctx: &mut ProtocolContext<'_>) {
        // Multiple version messages disallowed for the channel's life.
        if self.received_version {
            self.rejection(
                ctx,
                "version",
                RejectCode::Duplicate,
                "duplicate version",
                NetworkError::ProtocolViolation,
            );
            return;
        }

        // A pended nonce arriving from the peer means we dialed ourselves.
        if self.pending_nonces.contains(&message.nonce) || message.nonce == ctx.nonce() {
            ctx.stop(NetworkError::ChannelConflict);
            return;
        }

        if message.services & self.invalid_services != 0
            || message.services & self.minimum_services != self.minimum_services
        {
            self.rejection(
                ctx,
                "version",
                RejectCode::Invalid,
                "unsupported services",
                NetworkError::ProtocolViolation,
            );
            return;
        }

        if message.value < self.minimum_version {
            self.rejection(
                ctx,
                "version",
                RejectCode::Obsolete,
                "insufficient peer version",
                NetworkError::ProtocolViolation,
            );
            return;
        }

        let negotiated = message.value.min(self.maximum_version);
        debug!(
            peer = %ctx.authority(),
            version = message.value,
            negotiated,
            agent = %message.user_agent,
            "version received"
        );

        ctx.set_negotiated_version(negotiated);
        ctx.set_peer_version(message.clone());

        ctx.send(Message::VersionAck(VersionAck));
        self.received_version = true;

        self.maybe_finish(ctx);
    }

    fn handle_acknowledge(&mut self, ctx: &mut ProtocolContext<'_>) {
        // Premature or repeated verack disallowed for the channel's life.
        if !self.sent_version || self.received_acknowledge {
            self.rejection(
                ctx,
                "verack",
                RejectCode::Duplicate,
                "unexpected verack",
                NetworkError::ProtocolViolation,
            );
            return;
        }

        self.received_acknowledge = true;
        self.maybe_finish(ctx);
    }

    fn maybe_finish(&mut self, ctx: &mut ProtocolContext<'_>) {
        if !self.complete() {
            return;
        }

        // Pause before the session attaches the steady-state protocols; a
        // post-handshake message may already be waiting on the socket.
        ctx.pause();

        if let Some(completion) = self.completion.take() {
            let _ = completion.send(Ok(()));
        }
    }
}

impl Protocol for VersionProtocol {
    fn name(&self) -> &'static str {
        match self.tier {
            HandshakeTier::Version31402 => "version_31402",
            HandshakeTier::Version70001 => "version_70001",
            HandshakeTier::Version70002 => "version_70002",
        }
    }

    fn start(&mut self, ctx: &mut ProtocolContext<'_>) {
        ctx.send(Message::Version(self.version_factory(ctx)));
        self.sent_version = true;
    }

    fn handle(&mut self, message: &Message, ctx: &mut ProtocolContext<'_>) {
        match message {
            Message::Version(version) => self.handle_version(version, ctx),
            Message::VersionAck(_) => self.handle_acknowledge(ctx),
            _ => {}
        }
    }

    fn stopping(&mut self, reason: NetworkError) {
        if let Some(completion) = self.completion.take() {
            let _ = completion.send(Err(reason));
        }
    }
}

fn unix_time() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::level;

    #[test]
    fn test_tier_selection() {
        let mut settings = Settings { enable_reject: true, ..Settings::default() };
        assert_eq!(HandshakeTier::select(&settings), HandshakeTier::Version70002);

        settings.enable_reject = false;
        assert_eq!(HandshakeTier::select(&settings), HandshakeTier::Version70001);

        settings.protocol_maximum = level::BIP31;
        assert_eq!(HandshakeTier::select(&settings), HandshakeTier::Version31402);

        settings.enable_reject = true;
        assert_eq!(HandshakeTier::select(&settings), HandshakeTier::Version31402);
    }
}
