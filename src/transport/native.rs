//! Native message handler adapter.
//!
//! Native handlers have no reply path of their own; hosts answer through
//! the global callback or the broadcast bus.

use std::sync::Arc;

use serde_json::{json, Value};

use super::{Channel, ProbeOutcome, TransportAdapter, CALLBACK_NAME};
use crate::host::{HostError, InboundHandler, NativeHandler};

/// Action name native handlers understand.
pub const NATIVE_ACTION: &str = "getUserInfo";

/// Sends the identity action to every named native handler.
pub struct NativeAdapter {
    handlers: Vec<(String, Arc<dyn NativeHandler>)>,
}

impl NativeAdapter {
    /// Wrap the host's native handlers.
    pub fn new(handlers: Vec<(String, Arc<dyn NativeHandler>)>) -> Self {
        Self { handlers }
    }

    /// The structured action payload.
    pub fn probe_payload() -> Value {
        json!({ "action": NATIVE_ACTION, "callback": CALLBACK_NAME })
    }
}

impl TransportAdapter for NativeAdapter {
    fn channel(&self) -> Channel {
        Channel::NativeMessageHandler
    }

    fn is_available(&self) -> bool {
        !self.handlers.is_empty()
    }

    fn attach(&mut self, _handler: InboundHandler) -> bool {
        false
    }

    fn detach(&mut self) {}

    /// Succeeds if at least one handler accepted the action. A single
    /// handler throwing does not stop the others.
    fn probe(&mut self) -> Result<ProbeOutcome, HostError> {
        if self.handlers.is_empty() {
            return Ok(ProbeOutcome::Skipped);
        }
        let payload = Self::probe_payload();
        let mut first_error = None;
        let mut delivered = false;
        for (name, handler) in &self.handlers {
            match handler.post_message(&payload) {
                Ok(()) => delivered = true,
                Err(e) if first_error.is_none() => {
                    first_error = Some(HostError::Send(format!("{name}: {e}")));
                }
                Err(_) => {}
            }
        }
        match (delivered, first_error) {
            (false, Some(err)) => Err(err),
            _ => Ok(ProbeOutcome::Sent),
        }
    }
}
