//! Window broadcast adapter.
//!
//! Posts a request envelope on the page bus and listens on the same bus,
//! since some hosts answer there. The page hears its own request too; the
//! normalizer does not recognize it.

use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use super::{Channel, ProbeOutcome, TransportAdapter};
use crate::host::{BroadcastChannel, HostError, InboundHandler, ListenerId};

/// `type` tag of the broadcast request envelope.
pub const REQUEST_TYPE: &str = "townpass:request";

/// Listens and probes on the host broadcast bus.
pub struct BroadcastAdapter {
    bus: Option<Arc<dyn BroadcastChannel>>,
    listener: Option<ListenerId>,
    nonce: Uuid,
}

impl BroadcastAdapter {
    /// Wrap the host bus, if any. Each adapter carries a fresh nonce.
    pub fn new(bus: Option<Arc<dyn BroadcastChannel>>) -> Self {
        Self {
            bus,
            listener: None,
            nonce: Uuid::new_v4(),
        }
    }

    /// The request envelope this adapter broadcasts.
    pub fn request_envelope(&self) -> Value {
        json!({
            "type": REQUEST_TYPE,
            "action": "userinfo",
            "nonce": self.nonce.to_string(),
        })
    }
}

impl TransportAdapter for BroadcastAdapter {
    fn channel(&self) -> Channel {
        Channel::WindowBroadcast
    }

    fn is_available(&self) -> bool {
        self.bus.is_some()
    }

    fn attach(&mut self, handler: InboundHandler) -> bool {
        if self.listener.is_some() {
            return true;
        }
        let Some(bus) = &self.bus else {
            return false;
        };
        self.listener = Some(bus.add_listener(handler));
        true
    }

    fn detach(&mut self) {
        if let (Some(bus), Some(id)) = (&self.bus, self.listener.take()) {
            bus.remove_listener(id);
        }
    }

    fn probe(&mut self) -> Result<ProbeOutcome, HostError> {
        let Some(bus) = &self.bus else {
            return Ok(ProbeOutcome::Skipped);
        };
        bus.post(&self.request_envelope())?;
        Ok(ProbeOutcome::Sent)
    }
}
