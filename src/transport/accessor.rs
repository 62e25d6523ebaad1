//! Direct accessor adapter: the host hands over the user synchronously.

use std::sync::Arc;

use super::{Channel, ProbeOutcome, TransportAdapter};
use crate::host::{HostError, InboundHandler, RawInbound, UserAccessor};

/// Calls the host accessor during the probe phase. Never listens.
pub struct AccessorAdapter {
    accessor: Option<Arc<dyn UserAccessor>>,
}

impl AccessorAdapter {
    /// Wrap the host accessor, if any.
    pub fn new(accessor: Option<Arc<dyn UserAccessor>>) -> Self {
        Self { accessor }
    }
}

impl TransportAdapter for AccessorAdapter {
    fn channel(&self) -> Channel {
        Channel::Accessor
    }

    fn is_available(&self) -> bool {
        self.accessor.is_some()
    }

    fn attach(&mut self, _handler: InboundHandler) -> bool {
        false
    }

    fn detach(&mut self) {}

    fn probe(&mut self) -> Result<ProbeOutcome, HostError> {
        let Some(accessor) = &self.accessor else {
            return Ok(ProbeOutcome::Skipped);
        };
        Ok(match accessor.current_user()? {
            Some(user) => ProbeOutcome::Immediate(RawInbound::Value(user)),
            None => ProbeOutcome::Skipped,
        })
    }
}
