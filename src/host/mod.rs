//! Host embedding abstraction.
//!
//! The native host exposes identity through a handful of mechanisms that
//! share no common API. Each mechanism is a trait here; a concrete embedding
//! (webview binding, FFI shim, or [`memory::MemoryHost`]) implements the ones
//! it actually offers and reports the rest as absent through
//! [`HostEnvironment`].
//!
//! Host callbacks receive an [`InboundHandler`]. Handlers installed by the
//! engine only enqueue, so a host may invoke them from inside any of its own
//! methods.

use std::sync::Arc;

use serde_json::Value;

pub mod memory;

/// Anything arriving from the host on any channel.
#[derive(Debug, Clone, PartialEq)]
pub enum RawInbound {
    /// A string, usually JSON-encoded.
    Text(String),
    /// A structured value.
    Value(Value),
    /// An event wrapper (message or custom event).
    Event(HostEvent),
}

/// Event wrapper as delivered by event-emitting host objects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostEvent {
    /// Message-event payload.
    pub data: Option<Value>,
    /// Custom-event payload.
    pub detail: Option<Value>,
}

impl HostEvent {
    /// Message event carrying `data`.
    pub fn message(data: Value) -> Self {
        Self {
            data: Some(data),
            detail: None,
        }
    }

    /// Custom event carrying `detail`.
    pub fn custom(detail: Value) -> Self {
        Self {
            data: None,
            detail: Some(detail),
        }
    }
}

/// Callback invoked by the host with inbound messages.
pub type InboundHandler = Arc<dyn Fn(RawInbound) + Send + Sync>;

/// Handle returned when subscribing to a host event target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Errors raised by host objects.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    /// The host object exists but is not usable right now.
    #[error("host object unavailable: {0}")]
    Unavailable(String),
    /// The host rejected an outbound message.
    #[error("host send failed: {0}")]
    Send(String),
}

/// An object with an explicit subscribe/unsubscribe API.
pub trait EventTarget: Send + Sync {
    /// Subscribe `handler`; the returned id unsubscribes it.
    fn add_listener(&self, handler: InboundHandler) -> ListenerId;

    /// Remove a subscription. Unknown ids are ignored.
    fn remove_listener(&self, id: ListenerId);
}

/// A single assignable handler slot (an `onmessage`-style property or a
/// global callback function).
pub trait HandlerSlot: Send + Sync {
    /// Current occupant.
    fn get(&self) -> Option<InboundHandler>;

    /// Replace the occupant; `None` clears the slot.
    fn set(&self, handler: Option<InboundHandler>);
}

/// Structured bridge object used for command/reply messaging.
///
/// Bridges offer an event API, a handler slot, or both. Adapters prefer the
/// event API.
pub trait MessageBridge: Send + Sync {
    /// Event subscription API, if offered.
    fn events(&self) -> Option<&dyn EventTarget>;

    /// Single handler slot, if offered.
    fn handler_slot(&self) -> Option<&dyn HandlerSlot>;

    /// Send a JSON-encoded command to the host.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the host rejects the message.
    fn post_message(&self, message: &str) -> Result<(), HostError>;
}

/// Cross-context broadcast (the page's `postMessage` bus).
pub trait BroadcastChannel: EventTarget {
    /// Broadcast a message to every context, including this one.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the broadcast cannot be posted.
    fn post(&self, message: &Value) -> Result<(), HostError>;
}

/// A native message handler exposed under a nested namespace.
pub trait NativeHandler: Send + Sync {
    /// Deliver a structured action to native code.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the handler throws.
    fn post_message(&self, payload: &Value) -> Result<(), HostError>;
}

/// Synchronous accessor that returns the current user directly.
pub trait UserAccessor: Send + Sync {
    /// Current user payload, or `None` if the host has none yet.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the accessor throws.
    fn current_user(&self) -> Result<Option<Value>, HostError>;
}

/// The set of host-provided globals, queried afresh for every request.
///
/// Every method defaults to "absent" so an embedding only implements what it
/// exposes.
pub trait HostEnvironment: Send + Sync {
    /// Direct user accessor.
    fn user_accessor(&self) -> Option<Arc<dyn UserAccessor>> {
        None
    }

    /// Primary structured bridge.
    fn primary_bridge(&self) -> Option<Arc<dyn MessageBridge>> {
        None
    }

    /// Secondary structured bridge, probed only without a primary one.
    fn secondary_bridge(&self) -> Option<Arc<dyn MessageBridge>> {
        None
    }

    /// Named native message handlers.
    fn native_handlers(&self) -> Vec<(String, Arc<dyn NativeHandler>)> {
        Vec::new()
    }

    /// Window broadcast bus.
    fn broadcast(&self) -> Option<Arc<dyn BroadcastChannel>> {
        None
    }

    /// Global callback slot the host may call with the identity.
    fn callback_slot(&self) -> Option<Arc<dyn HandlerSlot>> {
        None
    }
}
