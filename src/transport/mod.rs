//! Transport adapters: one per host mechanism, behind a uniform interface.
//!
//! Every adapter can be attached, detached and probed whether or not its
//! host mechanism exists; an absent mechanism makes each call a no-op. Each
//! adapter remembers what it changed on the host so that `detach` restores
//! exactly that.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::host::{HostEnvironment, HostError, InboundHandler, RawInbound};

pub mod accessor;
pub mod bridge;
pub mod broadcast;
pub mod callback;
pub mod native;
mod slot;

pub use accessor::AccessorAdapter;
pub use bridge::BridgeAdapter;
pub use broadcast::BroadcastAdapter;
pub use callback::{CallbackAdapter, CALLBACK_NAME};
pub use native::NativeAdapter;

/// Named host mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    /// Synchronous user accessor.
    Accessor,
    /// Primary structured bridge object.
    StructuredBridge,
    /// Fallback structured bridge object.
    SecondaryBridge,
    /// Native handlers under nested namespaces.
    NativeMessageHandler,
    /// Page broadcast bus.
    WindowBroadcast,
    /// Engine-installed global callback.
    GlobalCallback,
}

impl Channel {
    /// All channels in probe-send order.
    pub const ALL: [Channel; 6] = [
        Channel::Accessor,
        Channel::StructuredBridge,
        Channel::SecondaryBridge,
        Channel::NativeMessageHandler,
        Channel::WindowBroadcast,
        Channel::GlobalCallback,
    ];

    /// Stable kebab-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accessor => "accessor",
            Self::StructuredBridge => "structured-bridge",
            Self::SecondaryBridge => "secondary-bridge",
            Self::NativeMessageHandler => "native-message-handler",
            Self::WindowBroadcast => "window-broadcast",
            Self::GlobalCallback => "global-callback",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|channel| channel.as_str() == s)
            .ok_or_else(|| format!("unknown channel {s:?}"))
    }
}

/// What a probe did.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// A request went out; any answer arrives through the attached handler.
    Sent,
    /// Nothing to send on this mechanism.
    Skipped,
    /// The host answered synchronously.
    Immediate(RawInbound),
}

/// Uniform attach/detach/probe interface over one host mechanism.
pub trait TransportAdapter: Send {
    /// Which mechanism this adapter drives.
    fn channel(&self) -> Channel;

    /// Whether the host exposes the mechanism at all.
    fn is_available(&self) -> bool;

    /// Start delivering inbound messages to `handler`.
    ///
    /// Returns whether a listener is attached. Calling again while attached
    /// keeps the first attachment.
    fn attach(&mut self, handler: InboundHandler) -> bool;

    /// Undo whatever `attach` changed on the host. Idempotent.
    fn detach(&mut self);

    /// Send this mechanism's identity probe.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] if the host rejects the probe.
    fn probe(&mut self) -> Result<ProbeOutcome, HostError>;
}

/// Build the adapter set for the host as it looks right now, in probe-send
/// order.
///
/// The secondary bridge is only used when the primary one is absent.
pub fn discover(host: &dyn HostEnvironment) -> Vec<Box<dyn TransportAdapter>> {
    let bridge = match host.primary_bridge() {
        Some(primary) => BridgeAdapter::primary(Some(primary)),
        None => BridgeAdapter::secondary(host.secondary_bridge()),
    };

    vec![
        Box::new(AccessorAdapter::new(host.user_accessor())),
        Box::new(bridge),
        Box::new(NativeAdapter::new(host.native_handlers())),
        Box::new(BroadcastAdapter::new(host.broadcast())),
        Box::new(CallbackAdapter::new(host.callback_slot())),
    ]
}
