//! In-process host used by tests and the `simulate` command.
//!
//! [`MemoryHost`] implements every host mechanism, keeps an ordered
//! [`HostCall`] log of what the engine did to it, and can be scripted to
//! answer probes, reject sends, or deliver arbitrary messages later.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use super::{
    BroadcastChannel, EventTarget, HandlerSlot, HostEnvironment, HostError, HostEvent,
    InboundHandler, ListenerId, MessageBridge, NativeHandler, RawInbound, UserAccessor,
};
use crate::transport::Channel;

/// Native handler name exposed when native handlers are enabled.
pub const DEFAULT_NATIVE_HANDLER: &str = "townpass";

/// One observable interaction between the engine and the host.
#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    /// A listener was subscribed or a handler installed.
    Attach(Channel),
    /// A listener was removed or a slot restored.
    Detach(Channel),
    /// A probe reached the host.
    Probe {
        /// Mechanism the probe used.
        channel: Channel,
        /// Probe payload (`null` for accessor calls).
        message: Value,
    },
}

#[derive(Default)]
struct HostState {
    present: HashSet<Channel>,
    slot_only: HashSet<Channel>,
    failing: HashSet<Channel>,
    user: Option<Value>,
    log: Vec<HostCall>,
    next_listener: u64,
    listeners: HashMap<Channel, Vec<(ListenerId, InboundHandler)>>,
    slots: HashMap<Channel, InboundHandler>,
    originals: HashMap<Channel, InboundHandler>,
    answers: Vec<(Channel, Channel, RawInbound)>,
}

impl HostState {
    fn slot_holds_original(&self, channel: Channel) -> bool {
        match (self.slots.get(&channel), self.originals.get(&channel)) {
            (None, None) => true,
            (Some(current), Some(original)) => Arc::ptr_eq(current, original),
            _ => false,
        }
    }
}

/// Scriptable host with every mechanism optional.
#[derive(Clone, Default)]
pub struct MemoryHost {
    state: Arc<Mutex<HostState>>,
}

impl MemoryHost {
    /// Host exposing nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Host exposing every listening mechanism (no accessor).
    pub fn full() -> Self {
        Self::new()
            .with_channel(Channel::StructuredBridge)
            .with_channel(Channel::NativeMessageHandler)
            .with_channel(Channel::WindowBroadcast)
            .with_channel(Channel::GlobalCallback)
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Expose a mechanism.
    pub fn with_channel(self, channel: Channel) -> Self {
        self.lock().present.insert(channel);
        self
    }

    /// Expose a bridge that only offers a single handler slot.
    pub fn with_slot_only_bridge(self, channel: Channel) -> Self {
        {
            let mut state = self.lock();
            state.present.insert(channel);
            state.slot_only.insert(channel);
        }
        self
    }

    /// Expose the synchronous accessor returning `user`.
    pub fn with_user(self, user: Value) -> Self {
        {
            let mut state = self.lock();
            state.present.insert(Channel::Accessor);
            state.user = Some(user);
        }
        self
    }

    /// Put a host-owned handler in the global callback slot.
    pub fn with_preinstalled_callback(self, handler: InboundHandler) -> Self {
        {
            let mut state = self.lock();
            state.present.insert(Channel::GlobalCallback);
            state
                .originals
                .insert(Channel::GlobalCallback, Arc::clone(&handler));
            state.slots.insert(Channel::GlobalCallback, handler);
        }
        self
    }

    /// Make every send on `channel` fail.
    pub fn fail_sends_on(self, channel: Channel) -> Self {
        self.lock().failing.insert(channel);
        self
    }

    /// When a probe arrives on `probe`, deliver `reply` on `reply_channel`.
    pub fn answer(self, probe: Channel, reply_channel: Channel, reply: RawInbound) -> Self {
        self.lock().answers.push((probe, reply_channel, reply));
        self
    }

    /// Answer a probe on the channel's natural reply route: bridges and the
    /// broadcast bus answer on themselves, native handlers through the
    /// global callback.
    pub fn reply_on(self, channel: Channel, reply: RawInbound) -> Self {
        let route = match channel {
            Channel::NativeMessageHandler => Channel::GlobalCallback,
            other => other,
        };
        self.answer(channel, route, reply)
    }

    /// Deliver `raw` to whatever is currently listening on `channel`.
    ///
    /// Returns how many handlers received it.
    pub fn deliver(&self, channel: Channel, raw: RawInbound) -> usize {
        let handlers: Vec<InboundHandler> = {
            let state = self.lock();
            let mut handlers: Vec<InboundHandler> = state
                .listeners
                .get(&channel)
                .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default();
            if let Some(slot) = state.slots.get(&channel) {
                handlers.push(Arc::clone(slot));
            }
            handlers
        };
        for handler in &handlers {
            handler(raw.clone());
        }
        handlers.len()
    }

    /// Everything the engine did to this host, in order.
    pub fn log(&self) -> Vec<HostCall> {
        self.lock().log.clone()
    }

    /// Forget the log.
    pub fn clear_log(&self) {
        self.lock().log.clear();
    }

    /// Engine listeners currently attached on `channel`.
    ///
    /// A slot counts when it holds anything other than the host's own
    /// handler.
    pub fn listener_count(&self, channel: Channel) -> usize {
        let state = self.lock();
        let listeners = state.listeners.get(&channel).map_or(0, Vec::len);
        let slot = usize::from(!state.slot_holds_original(channel));
        listeners.saturating_add(slot)
    }

    /// Engine listeners attached on any channel.
    pub fn total_listeners(&self) -> usize {
        Channel::ALL
            .iter()
            .map(|channel| self.listener_count(*channel))
            .fold(0, usize::saturating_add)
    }

    /// Whether the global callback slot holds exactly what the host put
    /// there (or nothing, if the host put nothing).
    pub fn callback_restored(&self) -> bool {
        self.lock().slot_holds_original(Channel::GlobalCallback)
    }

    fn add(&self, channel: Channel, handler: InboundHandler) -> ListenerId {
        let mut state = self.lock();
        state.next_listener = state.next_listener.saturating_add(1);
        let id = ListenerId(state.next_listener);
        state.listeners.entry(channel).or_default().push((id, handler));
        state.log.push(HostCall::Attach(channel));
        id
    }

    fn remove(&self, channel: Channel, id: ListenerId) {
        let mut state = self.lock();
        let removed = state.listeners.get_mut(&channel).is_some_and(|list| {
            let before = list.len();
            list.retain(|(existing, _)| *existing != id);
            list.len() != before
        });
        if removed {
            state.log.push(HostCall::Detach(channel));
        }
    }

    fn slot_get(&self, channel: Channel) -> Option<InboundHandler> {
        self.lock().slots.get(&channel).cloned()
    }

    fn slot_set(&self, channel: Channel, handler: Option<InboundHandler>) {
        let mut state = self.lock();
        match handler {
            Some(handler) => {
                state.slots.insert(channel, handler);
            }
            None => {
                state.slots.remove(&channel);
            }
        }
        let call = if state.slot_holds_original(channel) {
            HostCall::Detach(channel)
        } else {
            HostCall::Attach(channel)
        };
        state.log.push(call);
    }

    /// Record a probe and fire scripted answers.
    fn receive_probe(&self, channel: Channel, message: Value) -> Result<(), HostError> {
        let replies: Vec<(Channel, RawInbound)> = {
            let mut state = self.lock();
            if state.failing.contains(&channel) {
                return Err(HostError::Send(format!("{channel} rejected the message")));
            }
            state.log.push(HostCall::Probe {
                channel,
                message: message.clone(),
            });
            state
                .answers
                .iter()
                .filter(|(probe, _, _)| *probe == channel)
                .map(|(_, route, reply)| (*route, reply.clone()))
                .collect()
        };

        if channel == Channel::WindowBroadcast {
            self.deliver(channel, RawInbound::Event(HostEvent::message(message)));
        }
        for (route, reply) in replies {
            self.deliver(route, reply);
        }
        Ok(())
    }
}

struct MemoryBridge {
    channel: Channel,
    slot_only: bool,
    host: MemoryHost,
}

impl EventTarget for MemoryBridge {
    fn add_listener(&self, handler: InboundHandler) -> ListenerId {
        self.host.add(self.channel, handler)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.host.remove(self.channel, id);
    }
}

impl HandlerSlot for MemoryBridge {
    fn get(&self) -> Option<InboundHandler> {
        self.host.slot_get(self.channel)
    }

    fn set(&self, handler: Option<InboundHandler>) {
        self.host.slot_set(self.channel, handler);
    }
}

impl MessageBridge for MemoryBridge {
    fn events(&self) -> Option<&dyn EventTarget> {
        if self.slot_only {
            None
        } else {
            Some(self)
        }
    }

    fn handler_slot(&self) -> Option<&dyn HandlerSlot> {
        if self.slot_only {
            Some(self)
        } else {
            None
        }
    }

    fn post_message(&self, message: &str) -> Result<(), HostError> {
        let value = serde_json::from_str(message).unwrap_or_else(|_| Value::String(message.to_owned()));
        self.host.receive_probe(self.channel, value)
    }
}

struct MemoryBroadcast {
    host: MemoryHost,
}

impl EventTarget for MemoryBroadcast {
    fn add_listener(&self, handler: InboundHandler) -> ListenerId {
        self.host.add(Channel::WindowBroadcast, handler)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.host.remove(Channel::WindowBroadcast, id);
    }
}

impl BroadcastChannel for MemoryBroadcast {
    fn post(&self, message: &Value) -> Result<(), HostError> {
        self.host
            .receive_probe(Channel::WindowBroadcast, message.clone())
    }
}

struct MemoryCallback {
    host: MemoryHost,
}

impl HandlerSlot for MemoryCallback {
    fn get(&self) -> Option<InboundHandler> {
        self.host.slot_get(Channel::GlobalCallback)
    }

    fn set(&self, handler: Option<InboundHandler>) {
        self.host.slot_set(Channel::GlobalCallback, handler);
    }
}

struct MemoryNative {
    host: MemoryHost,
}

impl NativeHandler for MemoryNative {
    fn post_message(&self, payload: &Value) -> Result<(), HostError> {
        self.host
            .receive_probe(Channel::NativeMessageHandler, payload.clone())
    }
}

struct MemoryAccessor {
    host: MemoryHost,
}

impl UserAccessor for MemoryAccessor {
    fn current_user(&self) -> Result<Option<Value>, HostError> {
        self.host.receive_probe(Channel::Accessor, Value::Null)?;
        Ok(self.host.lock().user.clone())
    }
}

impl MemoryHost {
    fn has(&self, channel: Channel) -> bool {
        self.lock().present.contains(&channel)
    }

    fn bridge(&self, channel: Channel) -> Option<Arc<dyn MessageBridge>> {
        if !self.has(channel) {
            return None;
        }
        let slot_only = self.lock().slot_only.contains(&channel);
        Some(Arc::new(MemoryBridge {
            channel,
            slot_only,
            host: self.clone(),
        }))
    }
}

impl HostEnvironment for MemoryHost {
    fn user_accessor(&self) -> Option<Arc<dyn UserAccessor>> {
        self.has(Channel::Accessor)
            .then(|| Arc::new(MemoryAccessor { host: self.clone() }) as Arc<dyn UserAccessor>)
    }

    fn primary_bridge(&self) -> Option<Arc<dyn MessageBridge>> {
        self.bridge(Channel::StructuredBridge)
    }

    fn secondary_bridge(&self) -> Option<Arc<dyn MessageBridge>> {
        self.bridge(Channel::SecondaryBridge)
    }

    fn native_handlers(&self) -> Vec<(String, Arc<dyn NativeHandler>)> {
        if !self.has(Channel::NativeMessageHandler) {
            return Vec::new();
        }
        vec![(
            DEFAULT_NATIVE_HANDLER.to_owned(),
            Arc::new(MemoryNative { host: self.clone() }) as Arc<dyn NativeHandler>,
        )]
    }

    fn broadcast(&self) -> Option<Arc<dyn BroadcastChannel>> {
        self.has(Channel::WindowBroadcast)
            .then(|| Arc::new(MemoryBroadcast { host: self.clone() }) as Arc<dyn BroadcastChannel>)
    }

    fn callback_slot(&self) -> Option<Arc<dyn HandlerSlot>> {
        self.has(Channel::GlobalCallback)
            .then(|| Arc::new(MemoryCallback { host: self.clone() }) as Arc<dyn HandlerSlot>)
    }
}
