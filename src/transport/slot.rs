//! Install/restore bookkeeping for single-occupant handler slots.

use std::sync::Arc;

use crate::host::{HandlerSlot, InboundHandler};

/// Record of a handler we put into a slot and what it displaced.
pub(crate) struct SlotInstall {
    previous: Option<InboundHandler>,
    installed: InboundHandler,
}

impl SlotInstall {
    /// Put `handler` into `slot`, remembering the current occupant.
    pub(crate) fn install(slot: &dyn HandlerSlot, handler: InboundHandler) -> Self {
        let previous = slot.get();
        slot.set(Some(Arc::clone(&handler)));
        Self {
            previous,
            installed: handler,
        }
    }

    /// Whether the slot was occupied before we installed.
    pub(crate) fn displaced_existing(&self) -> bool {
        self.previous.is_some()
    }

    /// Put the displaced occupant back (or clear the slot).
    ///
    /// Returns `false` and leaves the slot alone when someone replaced our
    /// handler in the meantime.
    pub(crate) fn restore(self, slot: &dyn HandlerSlot) -> bool {
        let still_ours = slot
            .get()
            .is_some_and(|current| Arc::ptr_eq(&current, &self.installed));
        if still_ours {
            slot.set(self.previous);
        }
        still_ours
    }
}
