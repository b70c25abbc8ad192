//! Event system shared by every component in this crate.
//!
//! All state-machine transitions (breaker, controller, pacer) are surfaced
//! through typed events delivered to listeners registered on the `Engine`.
//! Listener panics are caught so a misbehaving subscriber can never stall
//! the control loop (see §7 "Propagation" in the design doc).

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Marker trait for events emitted by a component.
pub trait EngineEvent: Send + Sync + fmt::Debug {
    /// Short machine-readable event kind, e.g. `"breaker_state_change"`.
    fn event_type(&self) -> &'static str;
}

/// Implemented by anything that wants to observe engine events.
pub trait EventListener<E: EngineEvent>: Send + Sync {
    fn on_event(&self, event: &E);
}

type BoxedListener<E> = Arc<dyn EventListener<E>>;

/// A collection of listeners for one event type.
///
/// Cloning an `EventListeners<E>` is cheap: listeners are reference-counted,
/// not duplicated.
pub struct EventListeners<E: EngineEvent> {
    listeners: Vec<BoxedListener<E>>,
}

impl<E: EngineEvent> EventListeners<E> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    pub fn add<L>(&mut self, listener: L)
    where
        L: EventListener<E> + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    /// Emits an event to every registered listener.
    ///
    /// A listener that panics does not prevent the remaining listeners from
    /// running, and never propagates into the caller (a component's own
    /// control loop). This is the re-entrancy and isolation contract in
    /// spec.md §5 and §9.
    pub fn emit(&self, event: &E) {
        for listener in &self.listeners {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_event(event);
            }));

            if result.is_err() {
                #[cfg(feature = "tracing")]
                tracing::warn!(event_type = event.event_type(), "event listener panicked");

                #[cfg(feature = "metrics")]
                metrics::counter!("outbox_throttle_listener_panics_total").increment(1);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl<E: EngineEvent> Default for EventListeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: EngineEvent> Clone for EventListeners<E> {
    fn clone(&self) -> Self {
        Self {
            listeners: self.listeners.clone(),
        }
    }
}

impl<E: EngineEvent> fmt::Debug for EventListeners<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventListeners")
            .field("count", &self.listeners.len())
            .finish()
    }
}

/// A listener built from a plain closure.
pub struct FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    f: F,
    _phantom: std::marker::PhantomData<E>,
}

impl<E, F> FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<E, F> EventListener<E> for FnListener<E, F>
where
    E: EngineEvent,
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        (self.f)(event)
    }
}

/// Breaker state, duplicated here (rather than imported from `breaker`) so
/// this module has no dependency on the rest of the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerPhase {
    Closed,
    Open,
    HalfOpen,
}

/// Emitted on every circuit breaker state transition.
#[derive(Debug, Clone)]
pub struct BreakerTransition {
    pub from: BreakerPhase,
    pub to: BreakerPhase,
    pub at: Instant,
}

impl EngineEvent for BreakerTransition {
    fn event_type(&self) -> &'static str {
        "breaker_state_change"
    }
}

/// Reason an AIMD controller tick produced a rate change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateChangeReason {
    WarmupComplete,
    Increase,
    Decrease,
    Forced,
}

/// Emitted whenever the controller actually changes the pacer's rate.
#[derive(Debug, Clone)]
pub struct RateChange {
    pub old_rate: u32,
    pub new_rate: u32,
    pub reason: RateChangeReason,
    pub error_rate: f64,
    pub p95_ms: u64,
    pub at: Instant,
}

impl EngineEvent for RateChange {
    fn event_type(&self) -> &'static str {
        "controller_rate_change"
    }
}
