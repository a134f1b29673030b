//! Passive observers for feedback messages.

use crate::channel::{Protocol, ProtocolContext};
use crate::messages::Message;
use tracing::debug;

/// Logs peer `reject` notices. bip61 tier; generates no rejects itself.
#[derive(Default)]
pub struct Reject70002;

impl Protocol for Reject70002 {
    fn name(&self) -> &'static str {
        "reject_70002"
    }

    fn handle(&mut self, message: &Message, ctx: &mut ProtocolContext<'_>) {
        if let Message::Reject(reject) = message {
            debug!(
                peer = %ctx.authority(),
                command = %reject.message,
                code = ?reject.code,
                reason = %reject.reason,
                "peer rejected message"
            );
        }
    }
}

/// Swallows the retired `alert` message.
#[derive(Default)]
pub struct Alert31402;

impl Protocol for Alert31402 {
    fn name(&self) -> &'static str {
        "alert_31402"
    }

    fn handle(&mut self, message: &Message, ctx: &mut ProtocolContext<'_>) {
        if let Message::Alert(alert) = message {
            debug!(
                peer = %ctx.authority(),
                payload = %hex::encode(&alert.payload),
                "alert discarded"
            );
        }
    }
}
