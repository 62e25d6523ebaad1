//! Global callback adapter.
//!
//! The engine installs its own handler in the host's callback slot before
//! any probe goes out and puts back whatever was there on teardown. A host
//! handler already sitting in the slot is displaced for the duration of the
//! request and flagged as a conflict.

use std::sync::Arc;

use tracing::warn;

use super::slot::SlotInstall;
use super::{Channel, ProbeOutcome, TransportAdapter};
use crate::host::{HandlerSlot, HostError, InboundHandler};

/// Name under which the callback is exposed to the host.
pub const CALLBACK_NAME: &str = "onTownPassUserInfo";

/// Owns the engine's occupancy of the global callback slot.
pub struct CallbackAdapter {
    slot: Option<Arc<dyn HandlerSlot>>,
    install: Option<SlotInstall>,
    conflict: bool,
}

impl CallbackAdapter {
    /// Wrap the host slot, if any.
    pub fn new(slot: Option<Arc<dyn HandlerSlot>>) -> Self {
        Self {
            slot,
            install: None,
            conflict: false,
        }
    }

    /// Whether attaching displaced a handler the host had installed.
    pub fn conflict(&self) -> bool {
        self.conflict
    }
}

impl TransportAdapter for CallbackAdapter {
    fn channel(&self) -> Channel {
        Channel::GlobalCallback
    }

    fn is_available(&self) -> bool {
        self.slot.is_some()
    }

    fn attach(&mut self, handler: InboundHandler) -> bool {
        if self.install.is_some() {
            return true;
        }
        let Some(slot) = &self.slot else {
            return false;
        };
        let install = SlotInstall::install(slot.as_ref(), handler);
        if install.displaced_existing() {
            self.conflict = true;
            warn!(
                callback = CALLBACK_NAME,
                "global callback slot already occupied, displacing host handler until teardown"
            );
        }
        self.install = Some(install);
        true
    }

    fn detach(&mut self) {
        let (Some(slot), Some(install)) = (&self.slot, self.install.take()) else {
            return;
        };
        if !install.restore(slot.as_ref()) {
            warn!(
                callback = CALLBACK_NAME,
                "global callback slot was replaced while attached, leaving it as is"
            );
        }
    }

    fn probe(&mut self) -> Result<ProbeOutcome, HostError> {
        Ok(ProbeOutcome::Skipped)
    }
}
