//! Request correlator: one identity request at a time, fanned out over every
//! host mechanism, resolved by the first recognizable answer.
//!
//! Lifecycle: `idle → open → {resolved | timed out | cancelled} → idle`.
//!
//! Opening a request happens in a fixed order under one lock:
//! 1. force-cancel the request that is still open, if any;
//! 2. create the deadline timer, failing before the host is touched if the
//!    runtime has no time driver;
//! 3. attach every available adapter;
//! 4. arm the deadline (a driver task owning the timer and the inbound queue);
//! 5. send every probe in adapter order.
//!
//! Attaching strictly before probing means the host can never answer before
//! the engine listens. Host callbacks only enqueue [`Inbound`] messages; the
//! driver drains the queue and races it against the deadline. Every terminal
//! transition goes through [`Inner::close`], which detaches all adapters,
//! stops the driver and notifies the waiter, and does nothing for a request
//! that is no longer open.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep};
use tracing::warn;

use crate::config::BridgeConfig;
use crate::host::{HostEnvironment, InboundHandler, RawInbound};
use crate::identity::{classify, IdentityRecord};
use crate::transport::{self, Channel, ProbeOutcome, TransportAdapter};

/// Protocol diagnostics, emitted only when the engine runs with `debug`.
macro_rules! diag {
    ($options:expr, $($arg:tt)+) => {
        if $options.debug {
            tracing::debug!($($arg)+);
        }
    };
}

/// Monotonic identifier of one request on one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    /// Numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a request ended without an identity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// No channel produced a recognizable payload before the deadline.
    #[error("no identity received from the host within {timeout_ms} ms")]
    Timeout {
        /// The deadline that elapsed.
        timeout_ms: u64,
    },
    /// The request was superseded by a newer one or reset.
    #[error("identity request {0} was cancelled")]
    Cancelled(RequestId),
    /// The host exposes none of the known mechanisms.
    #[error("host exposes no identity transport")]
    NoTransport,
    /// The request was started outside a Tokio runtime, or inside one
    /// without the time driver.
    #[error("identity requests must be started inside a Tokio runtime with timers enabled")]
    NoRuntime,
}

/// Whether a request is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// No request open.
    Idle,
    /// A request is waiting for the host.
    Open(RequestId),
}

/// Engine settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Emit a diagnostic trace of every attach, probe, inbound and close.
    pub debug: bool,
    /// How long a request waits before timing out.
    pub timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from(&BridgeConfig::default())
    }
}

impl From<&BridgeConfig> for EngineOptions {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            debug: config.debug,
            timeout: config.timeout(),
        }
    }
}

/// A host message tagged with where it came from.
#[derive(Debug)]
struct Inbound {
    request: RequestId,
    channel: Channel,
    raw: RawInbound,
}

enum Close {
    Resolved(IdentityRecord, Channel),
    TimedOut,
    Cancelled,
}

type Outcome = Result<IdentityRecord, RequestError>;

struct Pending {
    id: RequestId,
    adapters: Vec<Box<dyn TransportAdapter>>,
    deadline: Instant,
    driver: Option<JoinHandle<()>>,
    waiter: Option<oneshot::Sender<Outcome>>,
}

#[derive(Default)]
struct Inner {
    last_id: u64,
    pending: Option<Pending>,
    identity: Option<IdentityRecord>,
    last_error: Option<RequestError>,
}

impl Inner {
    fn open_request(&self) -> Option<RequestId> {
        self.pending.as_ref().map(|pending| pending.id)
    }

    fn is_open(&self, id: RequestId) -> bool {
        self.open_request() == Some(id)
    }

    /// The one terminal transition. Returns `false` if `id` is not open.
    fn close(&mut self, id: RequestId, close: Close, options: &EngineOptions) -> bool {
        if !self.is_open(id) {
            return false;
        }
        let Some(mut pending) = self.pending.take() else {
            return false;
        };

        for adapter in &mut pending.adapters {
            adapter.detach();
            diag!(options, request = %id, channel = %adapter.channel(), "listener detached");
        }
        if let Some(driver) = pending.driver.take() {
            driver.abort();
        }

        let outcome = match close {
            Close::Resolved(record, channel) => {
                diag!(options, request = %id, %channel, user = record.id(), "identity resolved");
                self.identity = Some(record.clone());
                Ok(record)
            }
            Close::TimedOut => {
                let error = RequestError::Timeout {
                    timeout_ms: u64::try_from(options.timeout.as_millis()).unwrap_or(u64::MAX),
                };
                warn!(request = %id, error = %error, "identity request timed out");
                self.last_error = Some(error.clone());
                Err(error)
            }
            Close::Cancelled => {
                diag!(options, request = %id, "identity request cancelled");
                Err(RequestError::Cancelled(id))
            }
        };

        if let Some(waiter) = pending.waiter.take() {
            // The caller may have stopped waiting; the state above still holds.
            let _ = waiter.send(outcome);
        }
        true
    }

    /// Classify one inbound message for request `id`; resolve on a match.
    fn accept(
        &mut self,
        id: RequestId,
        channel: Channel,
        raw: &RawInbound,
        options: &EngineOptions,
    ) -> bool {
        if !self.is_open(id) {
            diag!(options, request = %id, %channel, "ignoring message for closed request");
            return false;
        }
        match classify(raw) {
            Some((shape, record)) => {
                diag!(options, request = %id, %channel, ?shape, "payload recognized");
                self.close(id, Close::Resolved(record, channel), options)
            }
            None => {
                diag!(options, request = %id, %channel, "payload not recognized");
                false
            }
        }
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle on one started request.
#[derive(Debug)]
pub struct PendingIdentity {
    request: RequestId,
    outcome: oneshot::Receiver<Outcome>,
}

impl PendingIdentity {
    /// Which request this handle belongs to.
    pub fn request(&self) -> RequestId {
        self.request
    }

    /// Wait for the request to end.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] on timeout, cancellation, or when the request
    /// could not open at all.
    pub async fn wait(self) -> Result<IdentityRecord, RequestError> {
        let request = self.request;
        self.outcome
            .await
            .unwrap_or(Err(RequestError::Cancelled(request)))
    }
}

/// Identity request engine bound to one host.
///
/// Dropping the engine cancels any open request and releases its listeners.
pub struct Correlator {
    host: Arc<dyn HostEnvironment>,
    options: EngineOptions,
    inner: Arc<Mutex<Inner>>,
}

impl Correlator {
    /// Create an idle engine.
    pub fn new(host: Arc<dyn HostEnvironment>, options: EngineOptions) -> Self {
        Self {
            host,
            options,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Engine settings.
    pub fn options(&self) -> EngineOptions {
        self.options
    }

    /// Start a request and wait for its outcome.
    ///
    /// # Errors
    ///
    /// See [`PendingIdentity::wait`].
    pub async fn request_identity(&self) -> Result<IdentityRecord, RequestError> {
        self.start().wait().await
    }

    /// Open a new request, superseding any open one.
    ///
    /// Must be called from within a Tokio runtime with the time driver
    /// enabled; otherwise the request fails with
    /// [`RequestError::NoRuntime`] before any listener is attached.
    pub fn start(&self) -> PendingIdentity {
        let (waiter, outcome) = oneshot::channel();
        let mut inner = lock(&self.inner);

        if let Some(previous) = inner.open_request() {
            diag!(self.options, request = %previous, "superseding open request");
            inner.close(previous, Close::Cancelled, &self.options);
        }

        inner.last_id = inner.last_id.saturating_add(1);
        let id = RequestId(inner.last_id);
        inner.identity = None;
        inner.last_error = None;
        let pending = PendingIdentity {
            request: id,
            outcome,
        };

        let Ok(runtime) = Handle::try_current() else {
            fail_to_open(&mut inner, waiter, RequestError::NoRuntime);
            return pending;
        };

        let mut adapters = transport::discover(self.host.as_ref());
        adapters.retain(|adapter| adapter.is_available());
        if adapters.is_empty() {
            fail_to_open(&mut inner, waiter, RequestError::NoTransport);
            return pending;
        }

        let Some(timer) = arm_timer(self.options.timeout) else {
            fail_to_open(&mut inner, waiter, RequestError::NoRuntime);
            return pending;
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        for adapter in &mut adapters {
            let channel = adapter.channel();
            let sender = sender.clone();
            let handler: InboundHandler = Arc::new(move |raw| {
                // A closed receiver means the request already ended.
                let _ = sender.send(Inbound {
                    request: id,
                    channel,
                    raw,
                });
            });
            let attached = adapter.attach(handler);
            diag!(self.options, request = %id, %channel, attached, "listener attached");
        }
        drop(sender);

        let deadline = timer.deadline();
        let driver = runtime.spawn(drive(
            Arc::clone(&self.inner),
            id,
            receiver,
            timer,
            self.options,
        ));
        inner.pending = Some(Pending {
            id,
            adapters,
            deadline,
            driver: Some(driver),
            waiter: Some(waiter),
        });
        diag!(
            self.options,
            request = %id,
            timeout_ms = u64::try_from(self.options.timeout.as_millis()).unwrap_or(u64::MAX),
            "identity request open"
        );

        self.probe_all(&mut inner, id);
        pending
    }

    /// Send every probe in adapter order, stopping as soon as the request
    /// resolves.
    fn probe_all(&self, inner: &mut Inner, id: RequestId) {
        let count = inner
            .pending
            .as_ref()
            .map_or(0, |pending| pending.adapters.len());
        for index in 0..count {
            let Some(adapter) = inner
                .pending
                .as_mut()
                .filter(|pending| pending.id == id)
                .and_then(|pending| pending.adapters.get_mut(index))
            else {
                break;
            };
            let channel = adapter.channel();
            match adapter.probe() {
                Ok(ProbeOutcome::Sent) => {
                    diag!(self.options, request = %id, %channel, "probe sent");
                }
                Ok(ProbeOutcome::Skipped) => {
                    diag!(self.options, request = %id, %channel, "probe skipped");
                }
                Ok(ProbeOutcome::Immediate(raw)) => {
                    diag!(self.options, request = %id, %channel, "host answered synchronously");
                    if inner.accept(id, channel, &raw, &self.options) {
                        break;
                    }
                }
                Err(e) => {
                    diag!(self.options, request = %id, %channel, error = %e, "probe failed");
                }
            }
        }
    }

    /// Cancel any open request and clear the last identity and error.
    pub fn reset(&self) {
        let mut inner = lock(&self.inner);
        if let Some(id) = inner.open_request() {
            inner.close(id, Close::Cancelled, &self.options);
        }
        inner.identity = None;
        inner.last_error = None;
    }

    /// Whether a request is in flight.
    pub fn state(&self) -> RequestState {
        match lock(&self.inner).open_request() {
            Some(id) => RequestState::Open(id),
            None => RequestState::Idle,
        }
    }

    /// Id of the open request, if any.
    pub fn current_request(&self) -> Option<RequestId> {
        lock(&self.inner).open_request()
    }

    /// Identity from the most recent resolved request.
    pub fn identity(&self) -> Option<IdentityRecord> {
        lock(&self.inner).identity.clone()
    }

    /// Error from the most recent failed request.
    pub fn last_error(&self) -> Option<RequestError> {
        lock(&self.inner).last_error.clone()
    }

    /// Deadline of the open request.
    pub fn deadline(&self) -> Option<Instant> {
        lock(&self.inner)
            .pending
            .as_ref()
            .map(|pending| pending.deadline)
    }
}

impl Drop for Correlator {
    fn drop(&mut self) {
        self.reset();
    }
}

fn fail_to_open(inner: &mut Inner, waiter: oneshot::Sender<Outcome>, error: RequestError) {
    warn!(error = %error, "identity request could not open");
    inner.last_error = Some(error.clone());
    let _ = waiter.send(Err(error));
}

/// Create the deadline timer, or `None` when the current runtime was built
/// without the time driver (tokio panics on `sleep` there).
fn arm_timer(timeout: Duration) -> Option<Sleep> {
    panic::catch_unwind(AssertUnwindSafe(|| tokio::time::sleep(timeout))).ok()
}

/// Timeout controller and inbound pump for one request.
async fn drive(
    inner: Arc<Mutex<Inner>>,
    id: RequestId,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
    timer: Sleep,
    options: EngineOptions,
) {
    tokio::pin!(timer);
    loop {
        tokio::select! {
            biased;

            Some(message) = inbound.recv() => {
                if !on_inbound(&inner, id, message, &options) {
                    return;
                }
            }
            _ = &mut timer => {
                lock(&inner).close(id, Close::TimedOut, &options);
                return;
            }
        }
    }
}

/// Returns whether request `id` is still open afterwards.
fn on_inbound(inner: &Mutex<Inner>, id: RequestId, message: Inbound, options: &EngineOptions) -> bool {
    let mut guard = lock(inner);
    guard.accept(message.request, message.channel, &message.raw, options);
    guard.is_open(id)
}
