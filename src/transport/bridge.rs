//! Structured bridge adapters (primary and secondary).
//!
//! Both speak the `{name, data}` command protocol. The primary bridge asks
//! for the full user record, the secondary one only for the identifier.

use std::sync::Arc;

use serde_json::json;

use super::slot::SlotInstall;
use super::{Channel, ProbeOutcome, TransportAdapter};
use crate::host::{HostError, InboundHandler, ListenerId, MessageBridge};
use crate::identity::normalize::{USERID_COMMAND, USERINFO_COMMAND};

enum Attachment {
    Listener(ListenerId),
    Slot(SlotInstall),
}

/// Adapter over a [`MessageBridge`].
pub struct BridgeAdapter {
    channel: Channel,
    command: &'static str,
    bridge: Option<Arc<dyn MessageBridge>>,
    attachment: Option<Attachment>,
}

impl BridgeAdapter {
    /// Primary bridge, probed with the `userinfo` command.
    pub fn primary(bridge: Option<Arc<dyn MessageBridge>>) -> Self {
        Self {
            channel: Channel::StructuredBridge,
            command: USERINFO_COMMAND,
            bridge,
            attachment: None,
        }
    }

    /// Secondary bridge, probed with the `userid` command.
    pub fn secondary(bridge: Option<Arc<dyn MessageBridge>>) -> Self {
        Self {
            channel: Channel::SecondaryBridge,
            command: USERID_COMMAND,
            bridge,
            attachment: None,
        }
    }

    /// The probe this adapter sends, JSON-encoded.
    pub fn probe_message(&self) -> String {
        json!({ "name": self.command, "data": null }).to_string()
    }
}

impl TransportAdapter for BridgeAdapter {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn is_available(&self) -> bool {
        self.bridge.is_some()
    }

    fn attach(&mut self, handler: InboundHandler) -> bool {
        if self.attachment.is_some() {
            return true;
        }
        let Some(bridge) = &self.bridge else {
            return false;
        };
        self.attachment = if let Some(events) = bridge.events() {
            Some(Attachment::Listener(events.add_listener(handler)))
        } else {
            bridge
                .handler_slot()
                .map(|slot| Attachment::Slot(SlotInstall::install(slot, handler)))
        };
        self.attachment.is_some()
    }

    fn detach(&mut self) {
        let (Some(bridge), Some(attachment)) = (&self.bridge, self.attachment.take()) else {
            return;
        };
        match attachment {
            Attachment::Listener(id) => {
                if let Some(events) = bridge.events() {
                    events.remove_listener(id);
                }
            }
            Attachment::Slot(install) => {
                if let Some(slot) = bridge.handler_slot() {
                    install.restore(slot);
                }
            }
        }
    }

    fn probe(&mut self) -> Result<ProbeOutcome, HostError> {
        let Some(bridge) = &self.bridge else {
            return Ok(ProbeOutcome::Skipped);
        };
        bridge.post_message(&self.probe_message())?;
        Ok(ProbeOutcome::Sent)
    }
}
