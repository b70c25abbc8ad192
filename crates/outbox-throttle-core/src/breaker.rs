//! Circuit breaker state machine (spec.md §4.3).
//!
//! Three states: `Closed` (all traffic permitted), `Open` (traffic blocked
//! until the open timer elapses), `HalfOpen` (a bounded probe window). The
//! state is stored behind a mutex rather than split across atomics because
//! every transition needs to read-then-write several fields together
//! (consistent with `tower-resilience-circuitbreaker::Circuit`, the pattern
//! this is grounded on, which also keeps its counters alongside the state
//! under one lock rather than as independent atomics).

use crate::events::{BreakerPhase, BreakerTransition, EventListeners};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Public, pure snapshot of the breaker's current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl From<BreakerState> for BreakerPhase {
    fn from(value: BreakerState) -> Self {
        match value {
            BreakerState::Closed => BreakerPhase::Closed,
            BreakerState::Open => BreakerPhase::Open,
            BreakerState::HalfOpen => BreakerPhase::HalfOpen,
        }
    }
}

enum Phase {
    Closed,
    Open { opened_at: Instant },
    HalfOpen { until: Instant },
}

impl Phase {
    fn state(&self) -> BreakerState {
        match self {
            Phase::Closed => BreakerState::Closed,
            Phase::Open { .. } => BreakerState::Open,
            Phase::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }
}

struct Inner {
    phase: Phase,
    consecutive_failures: u32,
}

/// Configuration for the breaker's thresholds and timers.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub open_duration: Duration,
    pub half_open_duration: Duration,
    pub half_open_probe_rate: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 10,
            open_duration: Duration::from_secs(30),
            half_open_duration: Duration::from_secs(10),
            half_open_probe_rate: 3,
        }
    }
}

pub struct Breaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
    listeners: EventListeners<BreakerTransition>,
}

impl Breaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                phase: Phase::Closed,
                consecutive_failures: 0,
            }),
            listeners: EventListeners::new(),
        }
    }

    pub fn add_listener<L>(&mut self, listener: L)
    where
        L: crate::events::EventListener<BreakerTransition> + 'static,
    {
        self.listeners.add(listener);
    }

    /// Pure read of the current state; does not itself advance time-based
    /// transitions (use `should_block` for that).
    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().phase.state()
    }

    /// State-advancing read: returns whether the caller should skip the
    /// transport call right now. May transition `Open -> HalfOpen` as a
    /// side effect once the open timer has elapsed.
    pub fn should_block(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.phase {
            Phase::Closed => false,
            Phase::HalfOpen { .. } => false,
            Phase::Open { opened_at } => {
                if opened_at.elapsed() >= self.config.open_duration {
                    let until = Instant::now() + self.config.half_open_duration;
                    self.transition(&mut inner, Phase::HalfOpen { until });
                    false
                } else {
                    true
                }
            }
        }
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.phase {
            Phase::HalfOpen { until } => {
                if Instant::now() > until {
                    self.transition(&mut inner, Phase::Closed);
                }
            }
            _ => {
                inner.consecutive_failures = 0;
            }
        }

        #[cfg(feature = "metrics")]
        counter!("outbox_throttle_breaker_outcomes_total", "outcome" => "success").increment(1);
    }

    pub fn on_failure(&self) {
        let mut inner = self.inner.lock().unwrap();

        #[cfg(feature = "metrics")]
        counter!("outbox_throttle_breaker_outcomes_total", "outcome" => "failure").increment(1);

        match inner.phase {
            Phase::HalfOpen { .. } => {
                self.transition(&mut inner, Phase::Open {
                    opened_at: Instant::now(),
                });
            }
            Phase::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.transition(&mut inner, Phase::Open {
                        opened_at: Instant::now(),
                    });
                }
            }
            Phase::Open { .. } => {}
        }
    }

    /// Advisory concurrency hint for the controller/dispatcher during a
    /// half-open probe window.
    pub fn half_open_probe_rate(&self) -> u32 {
        self.config.half_open_probe_rate
    }

    fn transition(&self, inner: &mut Inner, to: Phase) {
        let from = inner.phase.state();
        let to_state = to.state();
        inner.phase = to;
        inner.consecutive_failures = 0;

        self.listeners.emit(&BreakerTransition {
            from: from.into(),
            to: to_state.into(),
            at: Instant::now(),
        });

        #[cfg(feature = "tracing")]
        tracing::info!(?from, to = ?to_state, "circuit breaker state transition");

        #[cfg(feature = "metrics")]
        {
            counter!("outbox_throttle_breaker_transitions_total").increment(1);
            gauge!("outbox_throttle_breaker_state").set(match to_state {
                BreakerState::Closed => 0.0,
                BreakerState::Open => 1.0,
                BreakerState::HalfOpen => 2.0,
            });
        }
    }
}
